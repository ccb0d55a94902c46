//! Entity store: petgraph-backed graph wrapped as immutable snapshots and mutable builders

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::ops::Deref;
use std::sync::Arc;

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde_json::Value;

use crate::diff::ChangeSet;
use crate::error::{StoreError, StoreResult};
use crate::model::*;
use crate::persistent::PersistentIdTable;
use crate::schema::Schema;

#[derive(Debug, Clone)]
struct Node {
    id: EntityId,
    data: Arc<EntityData>,
}

/// Entities grouped by kind, then by source.
pub type EntitiesBySource = BTreeMap<EntityKind, BTreeMap<EntitySource, Vec<EntityId>>>;

/// The entity graph. Edges point from parent to child and carry the connection.
///
/// Payloads are reference counted, so cloning a graph only copies the
/// topology; a payload is cloned the first time it is modified.
#[derive(Clone)]
pub struct EntityGraph {
    schema: Arc<Schema>,
    inner: StableDiGraph<Node, ConnectionId>,
    index: BTreeMap<EntityId, NodeIndex>,
    next_index: BTreeMap<EntityKind, u32>,
    persistent: PersistentIdTable,
    external: BTreeMap<String, BTreeMap<EntityId, Value>>,
}

impl std::fmt::Debug for EntityGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityGraph")
            .field("entity_count", &self.inner.node_count())
            .field("link_count", &self.inner.edge_count())
            .finish()
    }
}

impl EntityGraph {
    pub fn new(schema: Arc<Schema>) -> Self {
        EntityGraph {
            schema,
            inner: StableDiGraph::new(),
            index: BTreeMap::new(),
            next_index: BTreeMap::new(),
            persistent: PersistentIdTable::new(),
            external: BTreeMap::new(),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Total number of entities.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Total number of parent-child links.
    pub fn link_count(&self) -> usize {
        self.inner.edge_count()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.index.contains_key(&id)
    }

    fn node_index(&self, id: EntityId) -> StoreResult<NodeIndex> {
        self.index.get(&id).copied().ok_or(StoreError::NotFound(id))
    }

    fn id_at(&self, idx: NodeIndex) -> EntityId {
        self.inner[idx].id
    }

    /// Get an entity by id.
    pub fn entity(&self, id: EntityId) -> StoreResult<&EntityData> {
        self.entity_arc(id).map(|data| data.as_ref())
    }

    pub(crate) fn entity_arc(&self, id: EntityId) -> StoreResult<&Arc<EntityData>> {
        let idx = self.node_index(id)?;
        Ok(&self.inner[idx].data)
    }

    /// All entity ids, ordered by kind then index.
    pub fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.index.keys().copied()
    }

    /// Iterate over all entities in id order.
    pub fn entities(&self) -> impl Iterator<Item = (EntityId, &EntityData)> {
        self.index
            .iter()
            .map(move |(id, idx)| (*id, self.inner[*idx].data.as_ref()))
    }

    /// Get all entities of a specific kind, in index order.
    pub fn entities_of_kind(&self, kind: EntityKind) -> impl Iterator<Item = EntityId> + '_ {
        self.index
            .range(EntityId::new(kind, 0)..=EntityId::new(kind, u32::MAX))
            .map(|(id, _)| *id)
    }

    /// Entities whose source satisfies `filter`, grouped by kind then source.
    /// Within a group ids keep index order.
    pub fn entities_by_source<F>(&self, filter: F) -> EntitiesBySource
    where
        F: Fn(&EntitySource) -> bool,
    {
        let mut grouped = EntitiesBySource::new();
        for (id, data) in self.entities() {
            if filter(&data.source) {
                grouped
                    .entry(id.kind)
                    .or_default()
                    .entry(data.source.clone())
                    .or_default()
                    .push(id);
            }
        }
        grouped
    }

    /// Find the entity carrying `pid`.
    pub fn resolve(&self, pid: &PersistentId) -> Option<EntityId> {
        self.persistent.lookup(pid)
    }

    pub fn persistent_id(&self, id: EntityId) -> StoreResult<Option<PersistentId>> {
        Ok(self.schema.persistent_id(self.entity(id)?))
    }

    /// Entities holding a soft reference to `pid`.
    pub fn referrers(&self, pid: &PersistentId) -> Vec<EntityId> {
        self.persistent.referrers(pid)
    }

    /// Parents of `child`, one per connection, in the child kind's declaration order.
    pub fn parents_of(&self, child: EntityId) -> StoreResult<Vec<(ConnectionId, EntityId)>> {
        let idx = self.node_index(child)?;
        let mut parents: Vec<(ConnectionId, EntityId)> = self
            .inner
            .edges_directed(idx, Direction::Incoming)
            .map(|edge| (*edge.weight(), self.id_at(edge.source())))
            .collect();
        let declared = self.schema.parent_connections(child.kind);
        parents.sort_by_key(|(connection, parent)| {
            let position = declared
                .iter()
                .position(|c| c == connection)
                .unwrap_or(usize::MAX);
            (position, *parent)
        });
        Ok(parents)
    }

    /// Children of `parent` linked through `connection`, in index order.
    pub fn children_of(&self, parent: EntityId, connection: &ConnectionId) -> StoreResult<Vec<EntityId>> {
        let idx = self.node_index(parent)?;
        let mut children: Vec<EntityId> = self
            .inner
            .edges_directed(idx, Direction::Outgoing)
            .filter(|edge| edge.weight() == connection)
            .map(|edge| self.id_at(edge.target()))
            .collect();
        children.sort();
        Ok(children)
    }

    /// Every child of `parent`, ordered by connection then index.
    pub fn children(&self, parent: EntityId) -> StoreResult<Vec<(ConnectionId, EntityId)>> {
        let idx = self.node_index(parent)?;
        let mut children: Vec<(ConnectionId, EntityId)> = self
            .inner
            .edges_directed(idx, Direction::Outgoing)
            .map(|edge| (*edge.weight(), self.id_at(edge.target())))
            .collect();
        children.sort();
        Ok(children)
    }

    /// External metadata attached to `id` under `mapping`.
    pub fn external(&self, mapping: &str, id: EntityId) -> Option<&Value> {
        self.external.get(mapping)?.get(&id)
    }

    /// All external metadata attached to `id`, by mapping name.
    pub fn externals_of(&self, id: EntityId) -> Vec<(&str, &Value)> {
        self.external
            .iter()
            .filter_map(|(mapping, values)| values.get(&id).map(|v| (mapping.as_str(), v)))
            .collect()
    }

    fn check_parents(
        &self,
        kind: EntityKind,
        parents: &[(ConnectionId, EntityId)],
        moving: Option<EntityId>,
    ) -> StoreResult<()> {
        if self.schema.kind(kind).is_none() {
            return Err(StoreError::UnknownKind(kind));
        }
        let mut seen = HashSet::new();
        for (connection, parent) in parents {
            if connection.child != kind || !self.schema.has_connection(connection) {
                return Err(StoreError::UnknownConnection(*connection));
            }
            if !seen.insert(*connection) {
                return Err(StoreError::DuplicateConnection { connection: *connection });
            }
            let parent_data = self.entity(*parent)?;
            if parent_data.kind != connection.parent {
                return Err(StoreError::KindMismatch {
                    entity: *parent,
                    expected: connection.parent,
                    actual: parent_data.kind,
                });
            }
            if connection.kind.cardinality == Cardinality::One {
                let occupied = self
                    .children_of(*parent, connection)?
                    .into_iter()
                    .any(|child| Some(child) != moving);
                if occupied {
                    return Err(StoreError::OneToOneOccupied {
                        parent: *parent,
                        connection: *connection,
                    });
                }
            }
        }
        if let Some(missing) = self
            .schema
            .required_connections(kind)
            .find(|required| !seen.contains(*required))
        {
            return Err(StoreError::MissingRequiredParent {
                child: kind,
                connection: *missing,
            });
        }
        Ok(())
    }

    fn is_descendant(&self, root: EntityId, candidate: EntityId) -> StoreResult<bool> {
        let mut stack = vec![self.node_index(root)?];
        let mut visited = HashSet::new();
        while let Some(idx) = stack.pop() {
            if !visited.insert(idx) {
                continue;
            }
            if self.id_at(idx) == candidate {
                return Ok(true);
            }
            stack.extend(self.inner.neighbors_directed(idx, Direction::Outgoing));
        }
        Ok(false)
    }

    fn add_entity(&mut self, data: EntityData, parents: &[(ConnectionId, EntityId)]) -> StoreResult<EntityId> {
        self.check_parents(data.kind, parents, None)?;
        let pid = self.schema.persistent_id(&data);
        if let Some(pid) = &pid {
            if let Some(existing) = self.persistent.lookup(pid) {
                return Err(StoreError::DuplicatePersistentId {
                    pid: pid.clone(),
                    existing,
                });
            }
        }

        let counter = self.next_index.entry(data.kind).or_insert(0);
        let id = EntityId::new(data.kind, *counter);
        *counter += 1;

        for target in data.soft_refs() {
            self.persistent.add_referrer(target.clone(), id);
        }
        if let Some(pid) = pid {
            self.persistent.insert(pid, id);
        }
        let idx = self.inner.add_node(Node {
            id,
            data: Arc::new(data),
        });
        self.index.insert(id, idx);
        for (connection, parent) in parents {
            let parent_idx = self.node_index(*parent)?;
            self.inner.add_edge(parent_idx, idx, *connection);
        }
        tracing::trace!("added entity {}", id);
        Ok(id)
    }

    fn remove_entity(&mut self, id: EntityId) -> StoreResult<Vec<EntityId>> {
        self.node_index(id)?;
        // Collect the entity and everything that requires it, parents first.
        let mut doomed = Vec::new();
        let mut seen = BTreeSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            doomed.push(current);
            for (connection, child) in self.children(current)?.into_iter().rev() {
                if connection.is_required() {
                    stack.push(child);
                }
            }
        }

        for current in &doomed {
            let idx = self.node_index(*current)?;
            let data = Arc::clone(&self.inner[idx].data);
            if let Some(pid) = self.schema.persistent_id(&data) {
                self.persistent.remove(&pid, *current);
            }
            for target in data.soft_refs() {
                self.persistent.remove_referrer(target, *current);
            }
            for values in self.external.values_mut() {
                values.remove(current);
            }
            self.inner.remove_node(idx);
            self.index.remove(current);
        }
        tracing::trace!("removed entity {} ({} total with cascade)", id, doomed.len());
        Ok(doomed)
    }

    fn modify_entity<F>(&mut self, id: EntityId, f: F) -> StoreResult<()>
    where
        F: FnOnce(&mut EntityData),
    {
        let idx = self.node_index(id)?;
        let old = Arc::clone(&self.inner[idx].data);
        let mut updated = (*old).clone();
        f(&mut updated);
        if updated.kind != old.kind {
            return Err(StoreError::KindMismatch {
                entity: id,
                expected: old.kind,
                actual: updated.kind,
            });
        }

        let old_pid = self.schema.persistent_id(&old);
        let new_pid = self.schema.persistent_id(&updated);
        if old_pid != new_pid {
            if let Some(pid) = &new_pid {
                if let Some(existing) = self.persistent.lookup(pid).filter(|e| *e != id) {
                    return Err(StoreError::DuplicatePersistentId {
                        pid: pid.clone(),
                        existing,
                    });
                }
            }
        }

        for target in old.soft_refs() {
            self.persistent.remove_referrer(target, id);
        }
        for target in updated.soft_refs() {
            self.persistent.add_referrer(target.clone(), id);
        }
        self.inner[idx].data = Arc::new(updated);

        if old_pid != new_pid {
            if let Some(pid) = &old_pid {
                self.persistent.remove(pid, id);
            }
            if let Some(pid) = &new_pid {
                self.persistent.insert(pid.clone(), id);
            }
            if let (Some(old_pid), Some(new_pid)) = (old_pid, new_pid) {
                self.propagate_rename(&old_pid, &new_pid)?;
            }
        }
        Ok(())
    }

    /// Rewrite soft references after a persistent id changed.
    fn propagate_rename(&mut self, old: &PersistentId, new: &PersistentId) -> StoreResult<()> {
        for referrer in self.persistent.referrers(old) {
            let idx = self.node_index(referrer)?;
            let data = Arc::make_mut(&mut self.inner[idx].data);
            if data.rewrite_refs(old, new) {
                tracing::debug!("soft reference in {} follows {} -> {}", referrer, old, new);
            }
            self.persistent.remove_referrer(old, referrer);
            self.persistent.add_referrer(new.clone(), referrer);
        }
        Ok(())
    }

    fn set_parents(&mut self, id: EntityId, parents: &[(ConnectionId, EntityId)]) -> StoreResult<()> {
        let idx = self.node_index(id)?;
        self.check_parents(id.kind, parents, Some(id))?;
        for (_, parent) in parents {
            if *parent == id || self.is_descendant(id, *parent)? {
                return Err(StoreError::ParentCycle { parent: *parent, child: id });
            }
        }
        let incoming: Vec<_> = self
            .inner
            .edges_directed(idx, Direction::Incoming)
            .map(|edge| edge.id())
            .collect();
        for edge in incoming {
            self.inner.remove_edge(edge);
        }
        for (connection, parent) in parents {
            let parent_idx = self.node_index(*parent)?;
            self.inner.add_edge(parent_idx, idx, *connection);
        }
        Ok(())
    }

    fn set_external(&mut self, mapping: &str, id: EntityId, value: Value) -> StoreResult<()> {
        self.node_index(id)?;
        self.external
            .entry(mapping.to_string())
            .or_default()
            .insert(id, value);
        Ok(())
    }
}

/// Immutable point-in-time view of an entity graph. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Snapshot {
    graph: Arc<EntityGraph>,
}

impl Snapshot {
    pub fn empty(schema: Arc<Schema>) -> Self {
        Snapshot {
            graph: Arc::new(EntityGraph::new(schema)),
        }
    }

    /// Start a builder whose change tracking is relative to this snapshot.
    pub fn to_builder(&self) -> Builder {
        Builder {
            graph: (*self.graph).clone(),
            origin: self.clone(),
        }
    }
}

impl Deref for Snapshot {
    type Target = EntityGraph;

    fn deref(&self) -> &EntityGraph {
        &self.graph
    }
}

/// Mutable graph under construction.
#[derive(Debug, Clone)]
pub struct Builder {
    graph: EntityGraph,
    origin: Snapshot,
}

impl Builder {
    pub fn new(schema: Arc<Schema>) -> Self {
        Snapshot::empty(schema).to_builder()
    }

    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            graph: Arc::new(self.graph.clone()),
        }
    }

    /// Read-only access to the graph being built.
    pub fn graph(&self) -> &EntityGraph {
        &self.graph
    }

    /// Add an entity linked under `parents`. Returns the assigned id.
    pub fn add_entity(&mut self, data: EntityData, parents: &[(ConnectionId, EntityId)]) -> StoreResult<EntityId> {
        self.graph.add_entity(data, parents)
    }

    /// Remove an entity and every entity that requires it. Returns all removed ids.
    pub fn remove_entity(&mut self, id: EntityId) -> StoreResult<Vec<EntityId>> {
        self.graph.remove_entity(id)
    }

    /// Mutate an entity in place. Soft references to a changed persistent id are rewritten.
    pub fn modify_entity<F>(&mut self, id: EntityId, f: F) -> StoreResult<()>
    where
        F: FnOnce(&mut EntityData),
    {
        self.graph.modify_entity(id, f)
    }

    /// Replace all parent links of `id`.
    pub fn set_parents(&mut self, id: EntityId, parents: &[(ConnectionId, EntityId)]) -> StoreResult<()> {
        self.graph.set_parents(id, parents)
    }

    pub fn set_external(&mut self, mapping: &str, id: EntityId, value: Value) -> StoreResult<()> {
        self.graph.set_external(mapping, id, value)
    }

    /// Changes since this builder was created from its origin snapshot.
    pub fn changes(&self) -> ChangeSet {
        ChangeSet::between(&self.origin, &self.graph)
    }

    /// Make the current state the new baseline for [`Builder::changes`].
    pub fn reset_changes(&mut self) {
        self.origin = self.to_snapshot();
    }
}

impl Deref for Builder {
    type Target = EntityGraph;

    fn deref(&self) -> &EntityGraph {
        &self.graph
    }
}
