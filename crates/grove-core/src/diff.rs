//! Change sets between two graph states, consumed by change observers

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;

use crate::model::*;
use crate::schema::Schema;
use crate::store::EntityGraph;

/// One entity-level change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum EntityChange {
    Added {
        id: EntityId,
        entity: EntityData,
    },
    Removed {
        id: EntityId,
        entity: EntityData,
    },
    Replaced {
        id: EntityId,
        old: EntityData,
        new: EntityData,
        /// Attributes whose value differs, sorted by name.
        changed_attributes: Vec<String>,
        /// Whether the parent links of the entity changed.
        parents_changed: bool,
    },
}

impl EntityChange {
    pub fn id(&self) -> EntityId {
        match self {
            EntityChange::Added { id, .. }
            | EntityChange::Removed { id, .. }
            | EntityChange::Replaced { id, .. } => *id,
        }
    }
}

/// Changes grouped by entity kind.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChangeSet {
    /// Monotonically increasing sequence number, assigned by [`DiffEngine`].
    pub sequence: u64,
    pub changes: BTreeMap<EntityKind, Vec<EntityChange>>,
}

impl ChangeSet {
    /// Create an empty change set with given sequence number.
    pub fn new(sequence: u64) -> Self {
        ChangeSet {
            sequence,
            changes: BTreeMap::new(),
        }
    }

    /// Compute the entity changes that turn `before` into `after`.
    pub fn between(before: &EntityGraph, after: &EntityGraph) -> Self {
        let mut set = ChangeSet::new(0);

        for (id, entity) in before.entities() {
            if !after.contains(id) {
                set.push(EntityChange::Removed {
                    id,
                    entity: entity.clone(),
                });
            }
        }

        for id in after.ids() {
            let Ok(new) = after.entity_arc(id) else { continue };
            let Ok(old) = before.entity_arc(id) else {
                set.push(EntityChange::Added {
                    id,
                    entity: (**new).clone(),
                });
                continue;
            };
            let parents_changed = before.parents_of(id).ok() != after.parents_of(id).ok();
            if Arc::ptr_eq(old, new) && !parents_changed {
                continue;
            }
            if **old != **new || parents_changed {
                set.push(EntityChange::Replaced {
                    id,
                    changed_attributes: old.changed_attributes(new),
                    old: (**old).clone(),
                    new: (**new).clone(),
                    parents_changed,
                });
            }
        }

        set
    }

    fn push(&mut self, change: EntityChange) {
        self.changes.entry(change.id().kind).or_default().push(change);
    }

    /// Check if this change set is empty (no changes).
    pub fn is_empty(&self) -> bool {
        self.changes.values().all(|c| c.is_empty())
    }

    /// Total number of entity changes.
    pub fn len(&self) -> usize {
        self.changes.values().map(|c| c.len()).sum()
    }

    /// Changes for one kind.
    pub fn of_kind(&self, kind: EntityKind) -> &[EntityChange] {
        self.changes.get(&kind).map_or(&[], |c| c.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityChange> {
        self.changes.values().flatten()
    }

    /// One line per change, for terminals and snapshot tests.
    pub fn render(&self, schema: &Schema) -> String {
        let mut out = String::new();
        for change in self.iter() {
            let _ = match change {
                EntityChange::Added { id, entity } => {
                    writeln!(out, "+ {} {} ({})", schema.name(id.kind), id, entity.source)
                }
                EntityChange::Removed { id, entity } => {
                    writeln!(out, "- {} {} ({})", schema.name(id.kind), id, entity.source)
                }
                EntityChange::Replaced {
                    id,
                    old,
                    new,
                    changed_attributes,
                    parents_changed,
                } => {
                    let mut changed = changed_attributes.clone();
                    if old.source != new.source {
                        changed.push("<source>".to_string());
                    }
                    if *parents_changed {
                        changed.push("<parents>".to_string());
                    }
                    writeln!(
                        out,
                        "~ {} {} ({}) {}",
                        schema.name(id.kind),
                        id,
                        new.source,
                        changed.join(", ")
                    )
                }
            };
        }
        out
    }
}

/// Stamps change sets with sequence numbers for observers.
pub struct DiffEngine {
    sequence: u64,
}

impl DiffEngine {
    pub fn new() -> Self {
        DiffEngine { sequence: 0 }
    }

    /// Compute the difference between two graph states.
    /// Returns a ChangeSet with the sequence number incremented.
    pub fn compute_diff(&mut self, before: &EntityGraph, after: &EntityGraph) -> ChangeSet {
        let mut set = ChangeSet::between(before, after);
        self.sequence += 1;
        set.sequence = self.sequence;
        set
    }

    /// Get current sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new()
    }
}
