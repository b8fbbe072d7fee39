//! Conflict resolution for concurrently written roots.

use crate::error::ConflictError;
use serde_json::Value;

/// Merges divergent states of one root.
///
/// Invoked by the commit pipeline when a root the committing transaction
/// wrote was changed by another commit after it was read. `old` is the state
/// the committing transaction started from, `committed` the state now in the
/// store, `new` the state the committing transaction wants to write. The
/// returned state is written instead of `new`.
///
/// Implementations must be pure: the same three inputs always produce the
/// same result or the same refusal.
pub trait ResolveConflict: Send + Sync {
    /// Produces the merged state or refuses with a conflict.
    fn resolve(
        &self,
        root: &str,
        old: &Value,
        committed: &Value,
        new: &Value,
    ) -> Result<Value, ConflictError>;
}

impl<F> ResolveConflict for F
where
    F: Fn(&str, &Value, &Value, &Value) -> Result<Value, ConflictError> + Send + Sync,
{
    fn resolve(
        &self,
        root: &str,
        old: &Value,
        committed: &Value,
        new: &Value,
    ) -> Result<Value, ConflictError> {
        self(root, old, committed, new)
    }
}
