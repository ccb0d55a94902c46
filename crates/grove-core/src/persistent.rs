//! Persistent id table for natural-key lookup and soft references

use std::collections::{BTreeSet, HashMap};

use crate::model::{EntityId, PersistentId};

/// Maps persistent ids to entities, and persistent ids to the entities
/// holding a soft reference to them.
#[derive(Debug, Clone, Default)]
pub struct PersistentIdTable {
    ids: HashMap<PersistentId, EntityId>,
    /// Referenced id -> referring entities. Entries may point at ids that do
    /// not resolve; soft references are allowed to dangle.
    referrers: HashMap<PersistentId, BTreeSet<EntityId>>,
}

impl PersistentIdTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `pid` for `entity`. Returns the previous owner, if any.
    pub fn insert(&mut self, pid: PersistentId, entity: EntityId) -> Option<EntityId> {
        self.ids.insert(pid, entity)
    }

    pub fn lookup(&self, pid: &PersistentId) -> Option<EntityId> {
        self.ids.get(pid).copied()
    }

    /// Drop `pid` if it is still owned by `entity`.
    pub fn remove(&mut self, pid: &PersistentId, entity: EntityId) {
        if self.ids.get(pid) == Some(&entity) {
            self.ids.remove(pid);
        }
    }

    pub fn add_referrer(&mut self, target: PersistentId, referrer: EntityId) {
        self.referrers.entry(target).or_default().insert(referrer);
    }

    pub fn remove_referrer(&mut self, target: &PersistentId, referrer: EntityId) {
        if let Some(set) = self.referrers.get_mut(target) {
            set.remove(&referrer);
            if set.is_empty() {
                self.referrers.remove(target);
            }
        }
    }

    /// Entities holding a soft reference to `target`, in id order.
    pub fn referrers(&self, target: &PersistentId) -> Vec<EntityId> {
        self.referrers
            .get(target)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
