use indexq_queue::{
    Action, ActionMode, ActionProcessor, ActionQueue, BatchOutcome, DEFAULT_QUEUE_ROOT, DocId,
    IndexError, IndexId, IndexSet, MemoryIndex, ProcessorConfig, QueueError, SearchIndex,
};
use indexq_storage::{Database, StorageError};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

const POLL: Duration = Duration::from_millis(10);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Setup {
    db: Database,
    memory: Arc<MemoryIndex>,
    processor: Arc<ActionProcessor>,
}

fn setup() -> Setup {
    init_tracing();
    let db = Database::in_memory();
    let indexes = Arc::new(IndexSet::new());
    let memory = Arc::new(MemoryIndex::new());
    indexes.insert(memory.clone());
    let processor =
        Arc::new(ActionProcessor::new(db.clone(), indexes, ProcessorConfig::default()).unwrap());
    Setup {
        db,
        memory,
        processor,
    }
}

impl Setup {
    fn queue(&self, actions: Vec<Action>) {
        let mut txn = self.db.begin();
        self.processor.add(&mut txn, actions).unwrap();
        txn.commit().unwrap();
    }

    fn add(&self, docid: u64, object: Value) -> Action {
        Action::add(self.memory.id(), ActionMode::Deferred, docid, object)
    }

    fn remove(&self, docid: u64) -> Action {
        Action::remove(self.memory.id(), ActionMode::Deferred, docid)
    }
}

/// Index whose first write removes the queue in a separate transaction,
/// racing the batch that is being applied.
struct DisengagingIndex {
    id: IndexId,
    db: Database,
    fired: AtomicBool,
}

impl SearchIndex for DisengagingIndex {
    fn id(&self) -> IndexId {
        self.id
    }

    fn index_doc(&self, _docid: DocId, _object: Value) -> Result<(), IndexError> {
        if !self.fired.swap(true, Ordering::SeqCst) {
            let mut txn = self.db.begin();
            txn.remove(DEFAULT_QUEUE_ROOT)
                .map_err(|e| IndexError::Unavailable(e.to_string()))?;
            txn.commit()
                .map_err(|e| IndexError::Unavailable(e.to_string()))?;
        }
        Ok(())
    }

    fn reindex_doc(&self, docid: DocId, object: Value) -> Result<(), IndexError> {
        self.index_doc(docid, object)
    }

    fn unindex_doc(&self, docid: DocId) -> Result<(), IndexError> {
        self.index_doc(docid, Value::Null)
    }
}

/// Index whose first write appends `late` to the queue in a separate
/// transaction, racing the batch that is being applied.
struct AppendingIndex {
    inner: MemoryIndex,
    db: Database,
    late: Mutex<Option<Action>>,
}

impl AppendingIndex {
    fn new(db: &Database, late: impl FnOnce(IndexId) -> Action) -> Self {
        let inner = MemoryIndex::new();
        let late = late(inner.id());
        Self {
            inner,
            db: db.clone(),
            late: Mutex::new(Some(late)),
        }
    }

    fn append_late(&self) -> Result<(), IndexError> {
        let Some(late) = self.late.lock().unwrap().take() else {
            return Ok(());
        };
        let unavailable = |e: QueueError| IndexError::Unavailable(e.to_string());
        let mut txn = self.db.begin();
        let mut queue = ActionQueue::load(&mut txn, DEFAULT_QUEUE_ROOT)
            .map_err(unavailable)?
            .ok_or_else(|| IndexError::Unavailable("queue missing".into()))?;
        queue.extend([late]);
        queue.store(&mut txn, DEFAULT_QUEUE_ROOT).map_err(unavailable)?;
        txn.commit()
            .map_err(|e| IndexError::Unavailable(e.to_string()))
    }
}

impl SearchIndex for AppendingIndex {
    fn id(&self) -> IndexId {
        self.inner.id()
    }

    fn index_doc(&self, docid: DocId, object: Value) -> Result<(), IndexError> {
        self.append_late()?;
        self.inner.index_doc(docid, object)
    }

    fn reindex_doc(&self, docid: DocId, object: Value) -> Result<(), IndexError> {
        self.inner.reindex_doc(docid, object)
    }

    fn unindex_doc(&self, docid: DocId) -> Result<(), IndexError> {
        self.inner.unindex_doc(docid)
    }
}

/// Index that blocks its caller for a while on every operation.
struct SlowIndex {
    inner: MemoryIndex,
    delay: Duration,
}

impl SearchIndex for SlowIndex {
    fn id(&self) -> IndexId {
        self.inner.id()
    }

    fn index_doc(&self, docid: DocId, object: Value) -> Result<(), IndexError> {
        std::thread::sleep(self.delay);
        self.inner.index_doc(docid, object)
    }

    fn reindex_doc(&self, docid: DocId, object: Value) -> Result<(), IndexError> {
        std::thread::sleep(self.delay);
        self.inner.reindex_doc(docid, object)
    }

    fn unindex_doc(&self, docid: DocId) -> Result<(), IndexError> {
        std::thread::sleep(self.delay);
        self.inner.unindex_doc(docid)
    }
}

/// Index that refuses everything.
struct BrokenIndex(IndexId);

impl SearchIndex for BrokenIndex {
    fn id(&self) -> IndexId {
        self.0
    }

    fn index_doc(&self, _docid: DocId, _object: Value) -> Result<(), IndexError> {
        Err(IndexError::Unavailable("disk full".into()))
    }

    fn reindex_doc(&self, _docid: DocId, _object: Value) -> Result<(), IndexError> {
        Err(IndexError::Unavailable("disk full".into()))
    }

    fn unindex_doc(&self, _docid: DocId) -> Result<(), IndexError> {
        Err(IndexError::Unavailable("disk full".into()))
    }
}

// ── Configuration ────────────────────────────────────────────────

#[test]
fn default_config() {
    let config = ProcessorConfig::default();
    assert_eq!(config.queue_root, DEFAULT_QUEUE_ROOT);
    assert_eq!(config.poll_interval, Duration::from_secs(5));
    assert_eq!(config.max_lifecycle_retries, 3);
}

#[test]
fn custom_queue_root_is_used() {
    let db = Database::in_memory();
    let config = ProcessorConfig::default()
        .with_queue_root("custom.queue")
        .with_poll_interval(POLL)
        .with_max_lifecycle_retries(0);
    let processor = ActionProcessor::new(db.clone(), Arc::new(IndexSet::new()), config).unwrap();

    processor.engage().unwrap();
    assert!(db.read("custom.queue").unwrap().is_some());
    assert!(db.read(DEFAULT_QUEUE_ROOT).unwrap().is_none());
    assert!(db.has_resolver("custom.queue").unwrap());
}

// ── Lifecycle ────────────────────────────────────────────────────

#[test]
fn engage_is_idempotent() {
    let s = setup();
    s.processor.engage().unwrap();
    s.queue(vec![s.add(1, json!("a"))]);
    let version = s.db.last_version().unwrap();

    s.processor.engage().unwrap();
    assert!(s.processor.is_engaged().unwrap());
    assert_eq!(s.processor.pending().unwrap(), 1);
    assert_eq!(s.db.last_version().unwrap(), version);
}

#[test]
fn disengage_without_queue_is_noop() {
    let s = setup();
    let version = s.db.last_version().unwrap();
    s.processor.disengage().unwrap();
    s.processor.disengage().unwrap();
    assert!(!s.processor.is_engaged().unwrap());
    assert_eq!(s.db.last_version().unwrap(), version);
}

#[test]
fn disengage_discards_queued_actions() {
    let s = setup();
    s.processor.engage().unwrap();
    s.queue(vec![s.add(1, json!("a"))]);

    s.processor.disengage().unwrap();
    assert!(!s.processor.is_engaged().unwrap());
    assert_eq!(s.processor.pending().unwrap(), 0);
}

#[test]
fn active_follows_transaction_view() {
    let s = setup();
    let mut before = s.db.begin();
    assert!(!s.processor.active(&mut before).unwrap());

    s.processor.engage().unwrap();
    assert!(!s.processor.active(&mut before).unwrap());
    let mut after = s.db.begin();
    assert!(s.processor.active(&mut after).unwrap());
}

// ── Batches ──────────────────────────────────────────────────────

#[test]
fn batch_requires_engaged_queue() {
    let s = setup();
    let err = s.processor.process_batch().unwrap_err();
    assert!(matches!(err, QueueError::NotEngaged));
}

#[test]
fn empty_queue_is_idle() {
    let s = setup();
    s.processor.engage().unwrap();
    let version = s.db.last_version().unwrap();
    assert_eq!(s.processor.process_batch().unwrap(), BatchOutcome::Idle);
    assert_eq!(s.db.last_version().unwrap(), version);
}

#[test]
fn batch_is_optimized_across_transactions() {
    let s = setup();
    s.processor.engage().unwrap();
    s.queue(vec![s.add(1, json!("a")), s.add(2, json!("b"))]);
    s.queue(vec![s.remove(1)]);

    assert_eq!(
        s.processor.process_batch().unwrap(),
        BatchOutcome::Committed {
            drained: 3,
            executed: 1
        }
    );
    assert!(!s.memory.contains(DocId::new(1)));
    assert_eq!(s.memory.get(DocId::new(2)), Some(json!("b")));
}

#[test]
fn cancelled_batch_still_drains_queue() {
    let s = setup();
    s.processor.engage().unwrap();
    s.queue(vec![s.add(1, json!("a")), s.remove(1)]);

    assert_eq!(
        s.processor.process_batch().unwrap(),
        BatchOutcome::Committed {
            drained: 2,
            executed: 0
        }
    );
    assert_eq!(s.processor.pending().unwrap(), 0);
    assert!(s.memory.ops().is_empty());
}

#[test]
fn index_error_leaves_batch_queued() {
    init_tracing();
    let db = Database::in_memory();
    let indexes = Arc::new(IndexSet::new());
    let id = indexes.insert(Arc::new(BrokenIndex(IndexId::new())));
    let processor = ActionProcessor::new(db.clone(), indexes, ProcessorConfig::default()).unwrap();
    processor.engage().unwrap();

    let mut txn = db.begin();
    processor
        .add(&mut txn, vec![Action::add(id, ActionMode::Deferred, 1u64, json!("a"))])
        .unwrap();
    txn.commit().unwrap();

    let err = processor.process_batch().unwrap_err();
    assert!(matches!(err, QueueError::Index(IndexError::Unavailable(_))));
    assert_eq!(processor.pending().unwrap(), 1);
}

#[test]
fn unknown_index_is_reported() {
    let s = setup();
    s.processor.engage().unwrap();
    let stray = IndexId::new();
    s.queue(vec![Action::remove(stray, ActionMode::Deferred, 1u64)]);

    let err = s.processor.process_batch().unwrap_err();
    assert!(matches!(err, QueueError::UnknownIndex(id) if id == stray));
}

#[test]
fn conflicting_batch_commit_is_abandoned() {
    init_tracing();
    let db = Database::in_memory();
    let indexes = Arc::new(IndexSet::new());
    let id = indexes.insert(Arc::new(DisengagingIndex {
        id: IndexId::new(),
        db: db.clone(),
        fired: AtomicBool::new(false),
    }));
    let processor = ActionProcessor::new(db.clone(), indexes, ProcessorConfig::default()).unwrap();
    processor.engage().unwrap();

    let mut txn = db.begin();
    processor
        .add(&mut txn, vec![Action::add(id, ActionMode::Deferred, 1u64, json!("a"))])
        .unwrap();
    txn.commit().unwrap();

    assert_eq!(
        processor.process_batch().unwrap(),
        BatchOutcome::Conflicted { drained: 1 }
    );
    assert!(!processor.is_engaged().unwrap());
}

#[test]
fn append_during_batch_is_not_lost() {
    init_tracing();
    let db = Database::in_memory();
    let indexes = Arc::new(IndexSet::new());
    let index = Arc::new(AppendingIndex::new(&db, |id| {
        Action::add(id, ActionMode::Deferred, 99u64, json!("late"))
    }));
    let id = indexes.insert(index.clone());
    let processor = ActionProcessor::new(db.clone(), indexes, ProcessorConfig::default()).unwrap();
    processor.engage().unwrap();

    let mut txn = db.begin();
    processor
        .add(&mut txn, vec![Action::add(id, ActionMode::Deferred, 1u64, json!("a"))])
        .unwrap();
    txn.commit().unwrap();

    assert!(matches!(
        processor.process_batch().unwrap(),
        BatchOutcome::Committed { drained: 1, executed: 1 }
    ));
    let mut txn = db.begin();
    let queue = ActionQueue::load(&mut txn, DEFAULT_QUEUE_ROOT).unwrap().unwrap();
    assert!(queue.actions().iter().any(|a| a.docid() == DocId::new(99)));
    drop(txn);

    processor.process_batch().unwrap();
    assert_eq!(processor.pending().unwrap(), 0);
    assert_eq!(index.inner.get(DocId::new(99)), Some(json!("late")));
    assert_eq!(index.inner.get(DocId::new(1)), Some(json!("a")));
}

#[test]
fn remove_appended_during_its_add_is_cancelled_by_the_merge() {
    init_tracing();
    let db = Database::in_memory();
    let indexes = Arc::new(IndexSet::new());
    let index = Arc::new(AppendingIndex::new(&db, |id| {
        Action::remove(id, ActionMode::Deferred, 1u64)
    }));
    let id = indexes.insert(index.clone());
    let processor = ActionProcessor::new(db.clone(), indexes, ProcessorConfig::default()).unwrap();
    processor.engage().unwrap();

    let mut txn = db.begin();
    processor
        .add(&mut txn, vec![Action::add(id, ActionMode::Deferred, 1u64, json!("a"))])
        .unwrap();
    txn.commit().unwrap();

    processor.process_batch().unwrap();
    assert_eq!(processor.pending().unwrap(), 2);

    // The merged queue replays the add ahead of the remove, and the pair
    // cancels out, so the document stays indexed.
    assert_eq!(
        processor.process_batch().unwrap(),
        BatchOutcome::Committed {
            drained: 2,
            executed: 0
        }
    );
    assert_eq!(index.inner.get(DocId::new(1)), Some(json!("a")));
}

#[test]
fn corrupt_queue_state_is_a_storage_error() {
    let s = setup();
    let mut txn = s.db.begin();
    txn.put(DEFAULT_QUEUE_ROOT, json!("garbage")).unwrap();
    txn.commit().unwrap();

    let err = s.processor.pending().unwrap_err();
    assert!(matches!(
        err,
        QueueError::Storage(StorageError::Serialization(_))
    ));
}

// ── Processing loop ──────────────────────────────────────────────

#[tokio::test]
async fn run_once_applies_queue_and_disengages() {
    let s = setup();
    s.processor.engage().unwrap();
    s.queue(vec![s.add(1, json!("a")), s.add(2, json!("b"))]);

    let (_tx, rx) = watch::channel(false);
    s.processor.process(POLL, true, rx).await.unwrap();

    assert_eq!(s.memory.len(), 2);
    assert!(!s.processor.is_engaged().unwrap());
    assert!(s.db.read(DEFAULT_QUEUE_ROOT).unwrap().is_none());
}

#[tokio::test]
async fn run_once_engages_when_needed() {
    let s = setup();
    let (_tx, rx) = watch::channel(false);
    s.processor.process(POLL, true, rx).await.unwrap();
    assert!(!s.processor.is_engaged().unwrap());
}

#[tokio::test]
async fn index_error_stops_loop_and_disengages() {
    init_tracing();
    let db = Database::in_memory();
    let indexes = Arc::new(IndexSet::new());
    let id = indexes.insert(Arc::new(BrokenIndex(IndexId::new())));
    let processor =
        Arc::new(ActionProcessor::new(db.clone(), indexes, ProcessorConfig::default()).unwrap());
    processor.engage().unwrap();

    let mut txn = db.begin();
    processor
        .add(&mut txn, vec![Action::remove(id, ActionMode::Deferred, 1u64)])
        .unwrap();
    txn.commit().unwrap();

    let (_tx, rx) = watch::channel(false);
    let err = processor.process(POLL, false, rx).await.unwrap_err();
    assert!(matches!(err, QueueError::Index(_)));
    assert!(!processor.is_engaged().unwrap());
}

#[tokio::test]
async fn shutdown_before_start_skips_processing() {
    let s = setup();
    s.processor.engage().unwrap();
    s.queue(vec![s.add(1, json!("a"))]);

    let (_tx, rx) = watch::channel(true);
    s.processor.process(POLL, false, rx).await.unwrap();

    assert!(s.memory.is_empty());
    assert!(!s.processor.is_engaged().unwrap());
}

#[tokio::test]
async fn dropped_shutdown_sender_stops_loop() {
    let s = setup();
    let (tx, rx) = watch::channel(false);
    drop(tx);
    s.processor.process(POLL, false, rx).await.unwrap();
    assert!(!s.processor.is_engaged().unwrap());
}

#[tokio::test]
async fn continuous_loop_picks_up_new_commits_until_shutdown() {
    let s = setup();
    let (tx, rx) = watch::channel(false);
    let processor = s.processor.clone();
    let handle = tokio::spawn(async move { processor.process(POLL, false, rx).await });

    for _ in 0..200 {
        if s.processor.is_engaged().unwrap() {
            break;
        }
        tokio::time::sleep(POLL).await;
    }
    assert!(s.processor.is_engaged().unwrap());

    s.queue(vec![s.add(1, json!("a"))]);
    for _ in 0..200 {
        if s.memory.contains(DocId::new(1)) {
            break;
        }
        tokio::time::sleep(POLL).await;
    }
    assert_eq!(s.memory.get(DocId::new(1)), Some(json!("a")));

    tx.send(true).unwrap();
    handle.await.unwrap().unwrap();
    assert!(!s.processor.is_engaged().unwrap());
}

#[tokio::test]
async fn slow_index_does_not_stall_the_runtime() {
    init_tracing();
    let db = Database::in_memory();
    let indexes = Arc::new(IndexSet::new());
    let index = Arc::new(SlowIndex {
        inner: MemoryIndex::new(),
        delay: Duration::from_millis(60),
    });
    let id = indexes.insert(index.clone());
    let processor =
        Arc::new(ActionProcessor::new(db.clone(), indexes, ProcessorConfig::default()).unwrap());
    processor.engage().unwrap();

    let mut txn = db.begin();
    let actions = (1..=5u64)
        .map(|docid| Action::add(id, ActionMode::Deferred, docid, json!(docid)))
        .collect();
    processor.add(&mut txn, actions).unwrap();
    txn.commit().unwrap();

    let ticks = Arc::new(AtomicUsize::new(0));
    let ticker = {
        let ticks = ticks.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(5)).await;
                ticks.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    let (_tx, rx) = watch::channel(false);
    processor.process(POLL, true, rx).await.unwrap();
    ticker.abort();

    assert_eq!(index.inner.len(), 5);
    assert!(ticks.load(Ordering::SeqCst) >= 5);
}
