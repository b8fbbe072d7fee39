//! Index mutation intents.
//!
//! An [`Action`] records that one document of one index has to be added,
//! changed or removed. Actions are plain serializable values: they travel
//! through transaction buffers and the persistent queue and are consumed
//! when executed, so an executed action can never run twice.

use crate::error::IndexError;
use crate::index::SearchIndex;
use indexq_types::{ActionMode, DocId, IndexId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::debug;

/// Discriminant of an [`Action`].
///
/// Variants are declared in execution priority order, so the derived `Ord`
/// sorts removals before changes before adds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActionKind {
    Remove,
    Change,
    Add,
}

impl ActionKind {
    /// Execution priority; lower runs first.
    #[must_use]
    pub const fn priority(self) -> u8 {
        match self {
            Self::Remove => 0,
            Self::Change => 1,
            Self::Add => 2,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Remove => "remove",
            Self::Change => "change",
            Self::Add => "add",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the index entry an action targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActionKey {
    pub index: IndexId,
    pub docid: DocId,
}

/// A pending mutation of one index entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// Index a document the index has not seen.
    Add {
        index: IndexId,
        docid: DocId,
        mode: ActionMode,
        object: Value,
    },
    /// Reindex a document the index already holds.
    Change {
        index: IndexId,
        docid: DocId,
        mode: ActionMode,
        object: Value,
    },
    /// Unindex a document.
    Remove {
        index: IndexId,
        docid: DocId,
        mode: ActionMode,
    },
}

impl Action {
    #[must_use]
    pub fn add(index: IndexId, mode: ActionMode, docid: impl Into<DocId>, object: Value) -> Self {
        Self::Add {
            index,
            docid: docid.into(),
            mode,
            object,
        }
    }

    #[must_use]
    pub fn change(index: IndexId, mode: ActionMode, docid: impl Into<DocId>, object: Value) -> Self {
        Self::Change {
            index,
            docid: docid.into(),
            mode,
            object,
        }
    }

    #[must_use]
    pub fn remove(index: IndexId, mode: ActionMode, docid: impl Into<DocId>) -> Self {
        Self::Remove {
            index,
            docid: docid.into(),
            mode,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ActionKind {
        match self {
            Self::Add { .. } => ActionKind::Add,
            Self::Change { .. } => ActionKind::Change,
            Self::Remove { .. } => ActionKind::Remove,
        }
    }

    #[must_use]
    pub const fn index(&self) -> IndexId {
        match self {
            Self::Add { index, .. } | Self::Change { index, .. } | Self::Remove { index, .. } => {
                *index
            }
        }
    }

    #[must_use]
    pub const fn docid(&self) -> DocId {
        match self {
            Self::Add { docid, .. } | Self::Change { docid, .. } | Self::Remove { docid, .. } => {
                *docid
            }
        }
    }

    #[must_use]
    pub const fn mode(&self) -> ActionMode {
        match self {
            Self::Add { mode, .. } | Self::Change { mode, .. } | Self::Remove { mode, .. } => *mode,
        }
    }

    /// The payload to index; `None` for removals.
    #[must_use]
    pub const fn object(&self) -> Option<&Value> {
        match self {
            Self::Add { object, .. } | Self::Change { object, .. } => Some(object),
            Self::Remove { .. } => None,
        }
    }

    #[must_use]
    pub const fn key(&self) -> ActionKey {
        ActionKey {
            index: self.index(),
            docid: self.docid(),
        }
    }

    /// Execution priority of this action's kind.
    #[must_use]
    pub const fn priority(&self) -> u8 {
        self.kind().priority()
    }

    /// Ordering key of an optimized batch: grouped per index, removals
    /// before changes before adds, then by document.
    #[must_use]
    pub const fn sort_key(&self) -> (IndexId, u8, DocId) {
        (self.index(), self.priority(), self.docid())
    }

    /// Applies the mutation to `index`, consuming the action.
    ///
    /// Index errors are returned untouched; the caller decides whether the
    /// surrounding commit fails.
    pub fn execute(self, index: &dyn SearchIndex) -> Result<(), IndexError> {
        debug_assert_eq!(self.index(), index.id(), "action executed against the wrong index");
        debug!("executing {}", self);
        match self {
            Self::Add { docid, object, .. } => index.index_doc(docid, object),
            Self::Change { docid, object, .. } => index.reindex_doc(docid, object),
            Self::Remove { docid, .. } => index.unindex_doc(docid),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{} action docid {} for index {} ({})>",
            self.kind(),
            self.docid(),
            self.index(),
            self.mode()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryIndex;
    use serde_json::json;

    fn index_id() -> IndexId {
        IndexId::parse("01890a5d-ac96-774b-bcce-b302099a8057").unwrap()
    }

    #[test]
    fn kinds_sort_by_priority() {
        let mut kinds = vec![ActionKind::Add, ActionKind::Remove, ActionKind::Change];
        kinds.sort();
        assert_eq!(kinds, vec![ActionKind::Remove, ActionKind::Change, ActionKind::Add]);
        assert!(kinds.windows(2).all(|w| w[0].priority() < w[1].priority()));
    }

    #[test]
    fn remove_has_no_object() {
        let action = Action::remove(index_id(), ActionMode::Deferred, 3u64);
        assert_eq!(action.kind(), ActionKind::Remove);
        assert!(action.object().is_none());
        assert_eq!(action.key().docid, DocId::new(3));
    }

    #[test]
    fn serialized_form_is_tagged() {
        let action = Action::change(index_id(), ActionMode::Deferred, 5u64, json!({"t": 1}));
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["kind"], "change");
        assert_eq!(value["mode"], "deferred");
        assert_eq!(value["docid"], 5);
        let back: Action = serde_json::from_value(value).unwrap();
        assert_eq!(back, action);
    }

    #[test]
    fn display_names_kind_docid_and_mode() {
        let action = Action::add(index_id(), ActionMode::Immediate, 9u64, json!(null));
        let text = action.to_string();
        assert!(text.starts_with("<add action docid 9"));
        assert!(text.ends_with("(immediate)>"));
    }

    #[test]
    fn execute_dispatches_by_kind() {
        let index = MemoryIndex::with_id(index_id());
        Action::add(index_id(), ActionMode::Immediate, 1u64, json!("a"))
            .execute(&index)
            .unwrap();
        Action::change(index_id(), ActionMode::Immediate, 1u64, json!("b"))
            .execute(&index)
            .unwrap();
        assert_eq!(index.get(DocId::new(1)), Some(json!("b")));
        Action::remove(index_id(), ActionMode::Immediate, 1u64)
            .execute(&index)
            .unwrap();
        assert!(index.is_empty());
    }
}
