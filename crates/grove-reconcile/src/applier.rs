//! Applies a decision table to the target builder: adds, then relabels, then
//! removals, then soft references following renamed persistent ids

use std::collections::{BTreeMap, HashMap, HashSet};

use grove_core::{Builder, Cardinality, ConnectionId, EntityContent, EntityData, EntityGraph, EntityId};

use crate::error::{ReconcileError, ReconcileResult};
use crate::state::{AddSubtree, DecisionTable, Operation, ParentRef, Rename};

/// Counts of what the applier executed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    pub added: usize,
    pub relabeled: usize,
    pub removed: usize,
}

pub struct Applier<'a> {
    target: &'a mut Builder,
    incoming: &'a EntityGraph,
    operations: BTreeMap<EntityId, Operation>,
    /// Incoming id -> id of its copy in the target.
    added: HashMap<EntityId, EntityId>,
    applied: Applied,
}

impl<'a> Applier<'a> {
    pub fn new(target: &'a mut Builder, incoming: &'a EntityGraph) -> Self {
        Applier {
            target,
            incoming,
            operations: BTreeMap::new(),
            added: HashMap::new(),
            applied: Applied::default(),
        }
    }

    pub fn apply(mut self, table: DecisionTable) -> ReconcileResult<Applied> {
        self.operations = table.operations;
        self.apply_adds(table.adds)?;

        let relabels: Vec<(EntityId, EntityId, Option<Vec<(ConnectionId, ParentRef)>>)> = self
            .operations
            .iter()
            .filter_map(|(id, op)| match op {
                Operation::Relabel { counterpart, parents } => Some((*id, *counterpart, parents.clone())),
                Operation::Remove => None,
            })
            .collect();
        for (id, counterpart, parents) in relabels {
            self.relabel(id, counterpart, parents.as_deref())?;
        }

        let removals: Vec<EntityId> = self
            .operations
            .iter()
            .filter(|(_, op)| matches!(op, Operation::Remove))
            .map(|(id, _)| *id)
            .collect();
        for id in removals {
            self.remove(id)?;
        }

        for rename in &table.renames {
            self.follow_rename(rename)?;
        }
        Ok(self.applied)
    }

    /// Adds run in discovery order. An add whose added parent is not in the
    /// target yet waits for a later round.
    fn apply_adds(&mut self, adds: Vec<AddSubtree>) -> ReconcileResult<()> {
        let mut pending = adds;
        while !pending.is_empty() {
            let before = pending.len();
            let mut deferred = Vec::new();
            for add in pending {
                match self.resolve_links(add.parents.as_deref())? {
                    Some(parents) => self.add(add.incoming, &parents)?,
                    None => deferred.push(add),
                }
            }
            if deferred.len() == before {
                let stuck: Vec<String> = deferred.iter().map(|add| add.incoming.to_string()).collect();
                return Err(ReconcileError::invariant(format!(
                    "added parents never materialize for incoming {}",
                    stuck.join(", ")
                )));
            }
            pending = deferred;
        }
        Ok(())
    }

    /// Translate parent references into target ids. `None` while an added
    /// parent has not been copied yet.
    fn resolve_links(
        &self,
        links: Option<&[(ConnectionId, ParentRef)]>,
    ) -> ReconcileResult<Option<Vec<(ConnectionId, EntityId)>>> {
        let mut parents = Vec::new();
        for (connection, parent) in links.unwrap_or_default() {
            let id = match parent {
                ParentRef::Target(id) => *id,
                ParentRef::Added(incoming) => match self.added.get(incoming) {
                    Some(id) => *id,
                    None => return Ok(None),
                },
            };
            parents.push((*connection, id));
        }
        Ok(Some(parents))
    }

    fn add(&mut self, incoming: EntityId, parents: &[(ConnectionId, EntityId)]) -> ReconcileResult<()> {
        let data = self.incoming.entity(incoming)?.clone();
        self.make_room(&data, parents, None)?;
        let id = self.target.add_entity(data, parents)?;
        self.copy_externals(incoming, id)?;
        self.added.insert(incoming, id);
        self.applied.added += 1;
        tracing::debug!("added {} as {}", incoming, id);
        Ok(())
    }

    fn relabel(
        &mut self,
        id: EntityId,
        counterpart: EntityId,
        links: Option<&[(ConnectionId, ParentRef)]>,
    ) -> ReconcileResult<()> {
        let source = self.incoming.entity(counterpart)?.clone();
        self.make_room(&source, &[], Some(id))?;
        self.target.modify_entity(id, |data| data.relabel_from(&source))?;

        if let Some(links) = links {
            let parents = self.resolve_links(Some(links))?.ok_or_else(|| {
                ReconcileError::invariant(format!("relabel of {} refers to a parent that was never added", id))
            })?;
            self.make_room(&source, &parents, Some(id))?;
            self.target.set_parents(id, &parents)?;
        }
        self.copy_externals(counterpart, id)?;
        self.applied.relabeled += 1;
        tracing::debug!("relabeled {} from {}", id, counterpart);
        Ok(())
    }

    fn remove(&mut self, id: EntityId) -> ReconcileResult<()> {
        if !self.target.contains(id) {
            tracing::warn!("{} was already removed by a cascade", id);
            return Ok(());
        }
        let removed = self.target.remove_entity(id)?;
        self.applied.removed += removed.len();
        tracing::debug!("removed {} ({} with cascade)", id, removed.len());
        Ok(())
    }

    /// Point soft references held by entities the pass left alone at the
    /// new persistent id. Relabeled and added entities already carry the
    /// incoming side's references.
    fn follow_rename(&mut self, rename: &Rename) -> ReconcileResult<()> {
        let copies: HashSet<EntityId> = self.added.values().copied().collect();
        for referrer in self.target.referrers(&rename.from) {
            if !self.target.contains(referrer) || self.operations.contains_key(&referrer) || copies.contains(&referrer) {
                continue;
            }
            self.target.modify_entity(referrer, |data| {
                data.rewrite_refs(&rename.from, &rename.to);
            })?;
            tracing::debug!("soft reference in {} follows {} -> {}", referrer, rename.from, rename.to);
        }
        Ok(())
    }

    /// Free the persistent id and one-to-one slots `data` is about to take,
    /// when their current holder is scheduled for removal anyway. Any other
    /// holder is a conflict the store reports as unsupported.
    fn make_room(
        &mut self,
        data: &EntityData,
        parents: &[(ConnectionId, EntityId)],
        moving: Option<EntityId>,
    ) -> ReconcileResult<()> {
        let mut displaced = Vec::new();
        if let Some(pid) = self.target.schema().persistent_id(data) {
            if let Some(holder) = self.target.resolve(&pid) {
                if Some(holder) != moving {
                    displaced.push(holder);
                }
            }
        }
        for (connection, parent) in parents {
            if connection.kind.cardinality != Cardinality::One {
                continue;
            }
            for occupant in self.target.children_of(*parent, connection)? {
                if Some(occupant) != moving {
                    displaced.push(occupant);
                }
            }
        }

        for holder in displaced {
            if !self.target.contains(holder) {
                continue;
            }
            match self.operations.get(&holder) {
                Some(Operation::Remove) => {
                    tracing::debug!("removing {} early to make room", holder);
                    self.remove(holder)?;
                }
                _ => {
                    return Err(ReconcileError::Unsupported(format!(
                        "{} already holds the slot or persistent id wanted by a {} entity",
                        holder,
                        self.target.schema().name(data.kind)
                    )))
                }
            }
        }
        Ok(())
    }

    fn copy_externals(&mut self, from: EntityId, to: EntityId) -> ReconcileResult<()> {
        let incoming = self.incoming;
        for (mapping, value) in incoming.externals_of(from) {
            self.target.set_external(mapping, to, value.clone())?;
        }
        Ok(())
    }
}
