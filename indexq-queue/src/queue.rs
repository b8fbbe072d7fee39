//! The persistent action queue and its conflict-resolution rule.

use crate::action::Action;
use crate::error::QueueResult;
use indexq_storage::{ConflictError, ResolveConflict, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Root name the queue is stored under unless configured otherwise.
pub const DEFAULT_QUEUE_ROOT: &str = "indexq.action_queue";

const ACTIONS_FIELD: &str = "actions";

/// Durable list of actions waiting for the background processor.
///
/// Writers only ever append. When two transactions append concurrently the
/// commit pipeline merges them with [`QueueConflictResolver`], so appends are
/// never lost; ordering between the two halves is not preserved and does not
/// need to be, because every drained batch is optimized per key before it
/// runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionQueue {
    actions: Vec<Action>,
}

impl ActionQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends actions.
    pub fn extend<I>(&mut self, actions: I)
    where
        I: IntoIterator<Item = Action>,
    {
        self.actions.extend(actions);
    }

    /// Takes every queued action, or `None` if the queue is empty.
    pub fn popall(&mut self) -> Option<Vec<Action>> {
        if self.actions.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.actions))
    }

    /// Queued actions in append order.
    #[must_use]
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Loads the queue stored under `root` in the transaction's view.
    pub fn load(txn: &mut Transaction, root: &str) -> QueueResult<Option<Self>> {
        Ok(txn.get_as(root)?)
    }

    /// Writes the queue under `root` as part of the transaction.
    pub fn store(&self, txn: &mut Transaction, root: &str) -> QueueResult<()> {
        txn.put_as(root, self)?;
        Ok(())
    }
}

/// Merge rule for concurrently committed queue states.
///
/// The committed and new action lists are concatenated. Any other field that
/// differs between the two states cannot be merged and fails the commit with
/// the ordinary conflict error.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueConflictResolver;

impl ResolveConflict for QueueConflictResolver {
    fn resolve(
        &self,
        root: &str,
        _old: &Value,
        committed: &Value,
        new: &Value,
    ) -> Result<Value, ConflictError> {
        let (Some(committed), Some(new)) = (committed.as_object(), new.as_object()) else {
            return Err(ConflictError::new(root, "queue state is not an object"));
        };

        for (field, value) in new {
            if field != ACTIONS_FIELD && committed.get(field) != Some(value) {
                return Err(ConflictError::new(root, format!("field `{field}` diverged")));
            }
        }

        let mut actions = actions_of(root, committed)?;
        let appended = actions_of(root, new)?;
        debug!(
            "resolved action queue conflict: {} committed + {} new action(s)",
            actions.len(),
            appended.len()
        );
        actions.extend(appended);

        let mut merged = committed.clone();
        merged.insert(ACTIONS_FIELD.to_string(), Value::Array(actions));
        Ok(Value::Object(merged))
    }
}

fn actions_of(root: &str, state: &Map<String, Value>) -> Result<Vec<Value>, ConflictError> {
    match state.get(ACTIONS_FIELD) {
        None => Ok(Vec::new()),
        Some(Value::Array(actions)) => Ok(actions.clone()),
        Some(_) => Err(ConflictError::new(root, "`actions` is not a list")),
    }
}
