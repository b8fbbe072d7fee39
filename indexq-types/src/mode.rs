//! Processing mode requested for an index mutation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How an index mutation wants to be processed.
///
/// `Deferred` is only a request: when no background processor is engaged
/// the mutation still runs inline with its transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionMode {
    /// Apply inside the originating transaction's commit.
    #[default]
    Immediate,
    /// Hand off to the background processor when one is engaged.
    Deferred,
}

impl ActionMode {
    /// Returns true for [`ActionMode::Deferred`].
    #[must_use]
    pub const fn is_deferred(self) -> bool {
        matches!(self, Self::Deferred)
    }

    /// Lowercase name, as used in serialized actions.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Deferred => "deferred",
        }
    }
}

impl fmt::Display for ActionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "immediate" => Ok(Self::Immediate),
            "deferred" => Ok(Self::Deferred),
            other => Err(crate::Error::UnknownMode(other.to_string())),
        }
    }
}
