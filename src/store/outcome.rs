//! Explicit results for storage operations.
//!
//! Every gateway call reports one of three things: the value was found (or
//! created), nothing matched, or storage failed. Callers that only need the
//! category default (absent id, empty list, `false`) use the helpers below;
//! callers that must tell "not found" from "failed" match on the variants.

use std::fmt;

use rusqlite::TransactionBehavior;

use super::error::PersistenceError;

/// Intent of a storage operation; decides the degraded default
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCategory {
    /// Single lookups and lists. Degrades to absent / empty.
    Read,
    /// Inserts. Degrades to an absent id.
    Create,
    /// Degrades to `false`.
    Update,
    /// Degrades to `false`.
    Delete,
    /// Degrades to `false`.
    Exists,
}

impl OpCategory {
    /// Writers take the write lock at `BEGIN`
    pub(crate) fn transaction_behavior(&self) -> TransactionBehavior {
        match self {
            OpCategory::Read | OpCategory::Exists => TransactionBehavior::Deferred,
            OpCategory::Create | OpCategory::Update | OpCategory::Delete => {
                TransactionBehavior::Immediate
            }
        }
    }
}

impl fmt::Display for OpCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpCategory::Read => "read",
            OpCategory::Create => "create",
            OpCategory::Update => "update",
            OpCategory::Delete => "delete",
            OpCategory::Exists => "exists",
        };
        f.write_str(name)
    }
}

/// Result of one gateway operation
#[derive(Debug)]
#[must_use]
pub enum StoreOutcome<T> {
    Found(T),
    NotFound,
    Failed(PersistenceError),
}

impl<T> StoreOutcome<T> {
    /// Category default for creates and single reads: `None` unless found
    pub fn into_option(self) -> Option<T> {
        match self {
            StoreOutcome::Found(value) => Some(value),
            StoreOutcome::NotFound | StoreOutcome::Failed(_) => None,
        }
    }

    /// Category default for updates, deletes and existence checks
    pub fn is_found(&self) -> bool {
        matches!(self, StoreOutcome::Found(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StoreOutcome::Failed(_))
    }

    pub fn error(&self) -> Option<&PersistenceError> {
        match self {
            StoreOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Turn back into a `Result` for callers that want `?`
    pub fn into_result(self) -> Result<Option<T>, PersistenceError> {
        match self {
            StoreOutcome::Found(value) => Ok(Some(value)),
            StoreOutcome::NotFound => Ok(None),
            StoreOutcome::Failed(err) => Err(err),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StoreOutcome<U> {
        match self {
            StoreOutcome::Found(value) => StoreOutcome::Found(f(value)),
            StoreOutcome::NotFound => StoreOutcome::NotFound,
            StoreOutcome::Failed(err) => StoreOutcome::Failed(err),
        }
    }
}

impl<T: Default> StoreOutcome<T> {
    /// Category default for lists: empty unless found
    pub fn unwrap_or_default(self) -> T {
        self.into_option().unwrap_or_default()
    }
}

impl<T> From<Result<Option<T>, PersistenceError>> for StoreOutcome<T> {
    fn from(result: Result<Option<T>, PersistenceError>) -> Self {
        match result {
            Ok(Some(value)) => StoreOutcome::Found(value),
            Ok(None) => StoreOutcome::NotFound,
            Err(err) => StoreOutcome::Failed(err),
        }
    }
}
