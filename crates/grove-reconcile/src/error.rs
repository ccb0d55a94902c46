//! Errors raised by a reconciliation pass

use grove_core::{EntityId, StoreError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("entity {0} not found")]
    NotFound(String),

    /// Internal bookkeeping went wrong: a second state for one entity, a
    /// parent cycle, a filtered entity left unclassified.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// The inputs ask for something the engine cannot express, such as two
    /// entities competing for one persistent id or one-to-one slot.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl ReconcileError {
    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        ReconcileError::InvariantViolation(message.into())
    }

    pub(crate) fn missing(id: EntityId) -> Self {
        ReconcileError::NotFound(id.to_string())
    }
}

impl From<StoreError> for ReconcileError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => ReconcileError::missing(id),
            StoreError::PersistentIdNotFound(pid) => ReconcileError::NotFound(pid.to_string()),
            StoreError::OneToOneOccupied { .. } | StoreError::DuplicatePersistentId { .. } => {
                ReconcileError::Unsupported(err.to_string())
            }
            other => ReconcileError::InvariantViolation(other.to_string()),
        }
    }
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
