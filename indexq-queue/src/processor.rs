//! Background processing of deferred actions.
//!
//! An [`ActionProcessor`] owns the lifecycle of the persistent queue. While
//! the queue exists ("engaged"), transaction buffers hand their deferred
//! actions to it instead of running them; the processor later drains the
//! queue, optimizes the batch, applies it and commits the drained queue.
//!
//! ```text
//! engage ──► ┌─ begin (fresh view) ─► popall ─► optimize ─► execute ─► commit ─┐
//!            └──────────────── sleep(poll_interval) ◄─────────────────────────────┘
//!                     │ run_once / shutdown / error
//!                     ▼
//!                 disengage
//! ```

use crate::action::Action;
use crate::config::ProcessorConfig;
use crate::error::{QueueError, QueueResult};
use crate::optimize::optimize;
use crate::queue::{ActionQueue, QueueConflictResolver};
use crate::registry::IndexSet;
use indexq_storage::{Database, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Result of a single poll of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The queue was empty; nothing was committed.
    Idle,
    /// Drained actions were optimized, applied and the drain committed.
    Committed { drained: usize, executed: usize },
    /// The commit conflicted and was abandoned; the actions stay queued.
    Conflicted { drained: usize },
}

/// Drains the persistent action queue and applies the actions.
pub struct ActionProcessor {
    db: Database,
    indexes: Arc<IndexSet>,
    config: ProcessorConfig,
}

impl ActionProcessor {
    /// Creates a processor and registers the queue's conflict resolver with
    /// the database.
    pub fn new(db: Database, indexes: Arc<IndexSet>, config: ProcessorConfig) -> QueueResult<Self> {
        db.register_resolver(&config.queue_root, Arc::new(QueueConflictResolver))?;
        Ok(Self {
            db,
            indexes,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    #[must_use]
    pub fn queue_root(&self) -> &str {
        &self.config.queue_root
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Creates the persistent queue if it does not exist. Idempotent.
    pub fn engage(&self) -> QueueResult<()> {
        let root = self.queue_root();
        self.retry_on_conflict("engage", |txn| {
            if ActionQueue::load(txn, root)?.is_some() {
                debug!("action queue {} already engaged", root);
                return Ok(false);
            }
            ActionQueue::new().store(txn, root)?;
            Ok(true)
        })?;
        info!("action queue {} engaged", root);
        Ok(())
    }

    /// Removes the persistent queue if it exists. Idempotent.
    ///
    /// Actions still queued are discarded with it.
    pub fn disengage(&self) -> QueueResult<()> {
        let root = self.queue_root();
        self.retry_on_conflict("disengage", |txn| {
            let Some(queue) = ActionQueue::load(txn, root)? else {
                debug!("action queue {} not engaged", root);
                return Ok(false);
            };
            if !queue.is_empty() {
                warn!("disengaging with {} queued action(s)", queue.len());
            }
            Ok(txn.remove(root)?)
        })?;
        info!("action queue {} disengaged", root);
        Ok(())
    }

    /// Whether the queue exists in the view of `txn`.
    pub fn active(&self, txn: &mut Transaction) -> QueueResult<bool> {
        Ok(txn.contains(self.queue_root())?)
    }

    /// Whether the queue exists in a fresh view.
    pub fn is_engaged(&self) -> QueueResult<bool> {
        Ok(self.db.read(self.queue_root())?.is_some())
    }

    /// Number of committed actions waiting in the queue, zero when not
    /// engaged.
    pub fn pending(&self) -> QueueResult<usize> {
        let mut txn = self.db.begin();
        let queue = ActionQueue::load(&mut txn, self.queue_root())?;
        Ok(queue.map_or(0, |q| q.len()))
    }

    /// Appends actions to the queue as part of `txn`.
    pub fn add(&self, txn: &mut Transaction, actions: Vec<Action>) -> QueueResult<()> {
        let root = self.queue_root();
        let mut queue = ActionQueue::load(txn, root)?.ok_or(QueueError::NotEngaged)?;
        debug!("queueing {} deferred action(s) in txn {}", actions.len(), txn.id());
        queue.extend(actions);
        queue.store(txn, root)
    }

    // ── Processing ───────────────────────────────────────────────

    /// Drains the queue once, applies the optimized batch and commits.
    ///
    /// A commit conflict abandons the batch and reports
    /// [`BatchOutcome::Conflicted`]; the drained actions were never removed
    /// and are picked up by the next poll. Index errors propagate and leave
    /// the queue untouched for the same reason.
    pub fn process_batch(&self) -> QueueResult<BatchOutcome> {
        let root = self.queue_root();
        let mut txn = self.db.begin();
        let mut queue = ActionQueue::load(&mut txn, root)?.ok_or(QueueError::NotEngaged)?;

        let Some(drained) = queue.popall() else {
            debug!("no queued actions");
            return Ok(BatchOutcome::Idle);
        };
        queue.store(&mut txn, root)?;

        let drained_count = drained.len();
        let batch = optimize(drained);
        let executed = batch.len();
        debug!("executing {} of {} drained action(s)", executed, drained_count);
        for action in batch {
            self.indexes.execute(action)?;
        }

        match txn.commit() {
            Ok(()) => {
                info!("committed batch: {} drained, {} executed", drained_count, executed);
                Ok(BatchOutcome::Committed {
                    drained: drained_count,
                    executed,
                })
            }
            Err(e) if e.is_conflict() => {
                warn!("batch commit conflicted, retrying next poll: {}", e);
                Ok(BatchOutcome::Conflicted {
                    drained: drained_count,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Runs the processing loop until `shutdown` turns true (or its sender
    /// goes away), an error occurs, or one pass completes when `run_once` is
    /// set.
    ///
    /// Engages before the first poll and always disengages on the way out.
    /// Store access and index execution run on the blocking pool, so the
    /// loop never stalls the runtime it is polled on.
    pub async fn process(
        self: &Arc<Self>,
        poll_interval: Duration,
        run_once: bool,
        mut shutdown: watch::Receiver<bool>,
    ) -> QueueResult<()> {
        info!("engaging action processor");
        self.blocking("engage", Self::engage).await?;

        let result = self.poll_loop(poll_interval, run_once, &mut shutdown).await;

        info!("disengaging action processor");
        let cleanup = self.blocking("disengage", Self::disengage).await;
        match (result, cleanup) {
            (Ok(()), cleanup) => cleanup,
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup_err)) => {
                warn!("disengage after failed processing also failed: {}", cleanup_err);
                Err(e)
            }
        }
    }

    /// [`ActionProcessor::process`] with the configured poll interval,
    /// running until shut down.
    pub async fn run(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> QueueResult<()> {
        self.process(self.config.poll_interval, false, shutdown).await
    }

    async fn poll_loop(
        self: &Arc<Self>,
        poll_interval: Duration,
        run_once: bool,
        shutdown: &mut watch::Receiver<bool>,
    ) -> QueueResult<()> {
        loop {
            if *shutdown.borrow() {
                info!("shutdown requested");
                return Ok(());
            }

            let outcome = self.blocking("process batch", Self::process_batch).await?;
            if let BatchOutcome::Conflicted { drained } = outcome {
                debug!("{} action(s) left queued after conflict", drained);
            }

            if run_once {
                return Ok(());
            }

            tokio::select! {
                () = tokio::time::sleep(poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("shutdown requested");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Runs a blocking step on tokio's blocking pool.
    async fn blocking<T, F>(self: &Arc<Self>, step: &'static str, f: F) -> QueueResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Self) -> QueueResult<T> + Send + 'static,
    {
        let processor = Arc::clone(self);
        match tokio::task::spawn_blocking(move || f(&processor)).await {
            Ok(result) => result,
            Err(e) => {
                warn!("spawn_blocking failed during {}: {}", step, e);
                Err(e.into())
            }
        }
    }

    /// Runs `stage` in a fresh transaction and commits if it returns true,
    /// retrying on conflict up to the configured limit.
    fn retry_on_conflict<F>(&self, op: &str, mut stage: F) -> QueueResult<()>
    where
        F: FnMut(&mut Transaction) -> QueueResult<bool>,
    {
        let mut attempt = 0;
        loop {
            let mut txn = self.db.begin();
            if !stage(&mut txn)? {
                return Ok(());
            }
            match txn.commit() {
                Ok(()) => return Ok(()),
                Err(e) if e.is_conflict() && attempt < self.config.max_lifecycle_retries => {
                    attempt += 1;
                    warn!("{} conflicted (attempt {}), retrying: {}", op, attempt, e);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
