//! Coalescing of action batches.
//!
//! State chart, previous action for a key against the new one:
//!
//! ```text
//!                       new:  ADD       REMOVE     CHANGE
//!   previous: ADD             add       nothing*   add*
//!             REMOVE          change*   remove     change
//!             CHANGE          add       remove     change
//! ```
//!
//! Unstarred cells keep the new action. Starred cells are the special cases:
//! an add followed by a remove cancels out, an add followed by a change is
//! still an add (the index never saw the document), and a remove followed by
//! an add becomes a change (the index already holds the document). The
//! starred rewrites carry the payload and mode of the newer action.

use crate::action::{Action, ActionKey, ActionKind};
use std::collections::HashMap;

/// What happens to a key's pending action when a new one arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The new action replaces the previous one.
    Supersede,
    /// Both cancel out; the key leaves the batch.
    Cancel,
    /// The new action's payload is kept as an add.
    AddWithNewObject,
    /// The new action's payload is kept as a change.
    ChangeWithNewObject,
}

use Transition::{AddWithNewObject, Cancel, ChangeWithNewObject, Supersede};

/// Indexed by `[previous.priority()][new.priority()]`, i.e. in
/// remove, change, add order on both axes.
const TRANSITIONS: [[Transition; 3]; 3] = [
    // previous: remove
    [Supersede, Supersede, ChangeWithNewObject],
    // previous: change
    [Supersede, Supersede, Supersede],
    // previous: add
    [Cancel, AddWithNewObject, Supersede],
];

/// Looks up the transition for a previous/new pair.
#[must_use]
pub const fn transition(previous: ActionKind, new: ActionKind) -> Transition {
    TRANSITIONS[previous.priority() as usize][new.priority() as usize]
}

/// Collapses a batch to at most one action per key and orders it.
///
/// The result is sorted by index, then priority (removals, changes, adds),
/// then docid, so the same set of surviving actions always executes in the
/// same order regardless of how unrelated keys were interleaved on input.
/// Optimizing an already optimized batch returns it unchanged.
pub fn optimize<I>(actions: I) -> Vec<Action>
where
    I: IntoIterator<Item = Action>,
{
    let mut pending: HashMap<ActionKey, Action> = HashMap::new();

    for action in actions {
        let key = action.key();
        let Some(previous) = pending.remove(&key) else {
            pending.insert(key, action);
            continue;
        };
        let resolved = match transition(previous.kind(), action.kind()) {
            Supersede => Some(action),
            Cancel => None,
            AddWithNewObject => Some(match action {
                Action::Change {
                    index,
                    docid,
                    mode,
                    object,
                } => Action::Add {
                    index,
                    docid,
                    mode,
                    object,
                },
                other => other,
            }),
            ChangeWithNewObject => Some(match action {
                Action::Add {
                    index,
                    docid,
                    mode,
                    object,
                } => Action::Change {
                    index,
                    docid,
                    mode,
                    object,
                },
                other => other,
            }),
        };
        if let Some(resolved) = resolved {
            pending.insert(key, resolved);
        }
    }

    let mut batch: Vec<Action> = pending.into_values().collect();
    batch.sort_by_key(Action::sort_key);
    batch
}
