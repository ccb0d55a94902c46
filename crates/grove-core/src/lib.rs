//! Grove Core: typed entity graph, snapshots, builders and change sets

pub mod model;
pub mod schema;
pub mod persistent;
pub mod store;
pub mod diff;
pub mod error;


#[cfg(test)]
pub mod test_utils;

pub use model::{
    AttrValue, Cardinality, ConnectionId, ConnectionKind, EntityContent, EntityData, EntityId, EntityKind,
    EntitySource, Optionality, PersistentId,
};
pub use schema::{KindDef, Schema, SchemaBuilder};
pub use persistent::PersistentIdTable;
pub use store::{Builder, EntitiesBySource, EntityGraph, Snapshot};
pub use diff::{ChangeSet, DiffEngine, EntityChange};
pub use error::{StoreError, StoreResult};
