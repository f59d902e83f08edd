use super::Identity;
use std::fmt;
use thiserror::Error;

/// Broken engine invariants.
///
/// Each variant is a programming error in the caller, never a condition to
/// retry. They surface through [`StateError::InvariantViolation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invariant {
    /// The cell was accessed before `persistent_load` installed a snapshot.
    NotMaterialized,
    /// `persistent_load` found an uncommitted head already in place.
    UncommittedHeadOnLoad,
    /// A snapshot that is no longer pending was opened for mutation.
    CommittedMutation,
    /// A snapshot discarded by rollback was published.
    PublishDiscarded,
    /// A snapshot discarded by rollback was handed to `persistent_load`.
    LoadDiscarded,
    /// A commit failed after some of its writes were already published.
    PartialPublish,
}

impl fmt::Display for Invariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NotMaterialized => "state read before materialization completed",
            Self::UncommittedHeadOnLoad => "persistent load over an uncommitted head",
            Self::CommittedMutation => "mutation of a committed snapshot",
            Self::PublishDiscarded => "publish of a discarded snapshot",
            Self::LoadDiscarded => "persistent load of a discarded snapshot",
            Self::PartialPublish => "commit published only part of its writes",
        };
        write!(f, "{label}")
    }
}

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Invariant violation on {identity}: {invariant}")]
    InvariantViolation {
        identity: Identity,
        invariant: Invariant,
    },

    #[error("Write conflict on {identity} for transaction {tx}")]
    WriteConflict { identity: Identity, tx: u64 },

    #[error("Storage loader failed for {identity}: {source}")]
    Loader {
        identity: Identity,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Relation '{relation}' is not declared for entity kind '{kind}'")]
    UnknownRelation { kind: &'static str, relation: String },

    #[error("Transaction {0} is read-only")]
    ReadOnlyTransaction(u64),

    #[error("Transaction {0} is not active")]
    TransactionNotActive(u64),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl StateError {
    pub fn invariant(identity: Identity, invariant: Invariant) -> Self {
        Self::InvariantViolation {
            identity,
            invariant,
        }
    }

    /// Whether the whole transaction should be re-run from the beginning.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WriteConflict { .. })
    }

    pub fn invariant_kind(&self) -> Option<Invariant> {
        match self {
            Self::InvariantViolation { invariant, .. } => Some(*invariant),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, StateError>;

impl<T> From<std::sync::PoisonError<T>> for StateError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}
