//! Errors raised by the entity store

use thiserror::Error;

use crate::model::{ConnectionId, EntityId, EntityKind, PersistentId};

/// Constraint violation or lookup miss inside an entity store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("entity {0} not found")]
    NotFound(EntityId),

    #[error("no entity with persistent id {0}")]
    PersistentIdNotFound(PersistentId),

    #[error("entity kind {0:?} is not declared in the schema")]
    UnknownKind(EntityKind),

    #[error("connection {0:?} is not declared in the schema")]
    UnknownConnection(ConnectionId),

    #[error("entity {entity} is of kind {actual:?}, expected {expected:?}")]
    KindMismatch {
        entity: EntityId,
        expected: EntityKind,
        actual: EntityKind,
    },

    #[error("required parent connection {connection:?} missing for a {child:?} entity")]
    MissingRequiredParent {
        child: EntityKind,
        connection: ConnectionId,
    },

    #[error("connection {connection:?} given more than one parent")]
    DuplicateConnection { connection: ConnectionId },

    #[error("parent {parent} already holds a child through one-to-one connection {connection:?}")]
    OneToOneOccupied {
        parent: EntityId,
        connection: ConnectionId,
    },

    #[error("persistent id {pid} already used by {existing}")]
    DuplicatePersistentId { pid: PersistentId, existing: EntityId },

    #[error("linking {child} under {parent} would create a parent cycle")]
    ParentCycle { parent: EntityId, child: EntityId },
}

pub type StoreResult<T> = Result<T, StoreError>;
