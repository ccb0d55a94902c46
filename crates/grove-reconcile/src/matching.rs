//! Counterpart search: source-agnostic content lookup and child search

use std::collections::HashMap;

use grove_core::{
    ConnectionId, EntityContent, EntityData, EntityGraph, EntityId, EntityKind, PersistentId, Schema,
};

use crate::error::ReconcileResult;
use crate::state::{DecisionTable, Operation, Rename};

/// Per-kind buckets of entity ids keyed by content hash, built lazily.
/// Buckets keep index order, which is the tie-break among equal candidates.
#[derive(Debug, Default)]
pub struct ContentIndex {
    by_kind: HashMap<EntityKind, HashMap<u64, Vec<EntityId>>>,
}

impl ContentIndex {
    /// Ids in `graph` whose content hash equals that of `data`.
    pub fn candidates(&mut self, graph: &EntityGraph, data: &EntityData) -> &[EntityId] {
        let buckets = self.by_kind.entry(data.kind).or_insert_with(|| {
            let mut buckets: HashMap<u64, Vec<EntityId>> = HashMap::new();
            for (id, entity) in graph.entities_of_kind(data.kind).filter_map(|id| Some((id, graph.entity(id).ok()?))) {
                buckets.entry(entity.content_hash()).or_default().push(id);
            }
            buckets
        });
        buckets.get(&data.content_hash()).map_or(&[], |ids| ids.as_slice())
    }

    /// Number of kinds indexed so far.
    pub fn indexed_kinds(&self) -> usize {
        self.by_kind.len()
    }
}

/// First entity of `graph` content-equal to `data` that `skip` does not reject.
pub fn find_by_content<S>(
    index: &mut ContentIndex,
    graph: &EntityGraph,
    data: &EntityData,
    skip: S,
) -> ReconcileResult<Option<EntityId>>
where
    S: Fn(EntityId) -> bool,
{
    for &candidate in index.candidates(graph, data) {
        if skip(candidate) {
            continue;
        }
        if graph.entity(candidate)?.content_eq(data) {
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}

/// First child of `parent` through `connection` content-equal to `data`,
/// ignoring children that `skip` rejects.
pub fn find_child<S>(
    graph: &EntityGraph,
    parent: EntityId,
    connection: &ConnectionId,
    data: &EntityData,
    skip: S,
) -> ReconcileResult<Option<EntityId>>
where
    S: Fn(EntityId) -> bool,
{
    for child in graph.children_of(parent, connection)? {
        if skip(child) {
            continue;
        }
        if graph.entity(child)?.content_eq(data) {
            return Ok(Some(child));
        }
    }
    Ok(None)
}

/// Pair each removed persistent-id holder whose id is gone from `incoming`
/// with an added entity of the same kind whose id is new to `target` and
/// whose other attributes are equal. Pairs go by ascending index and use
/// each entity at most once.
pub fn find_renames(
    target: &EntityGraph,
    incoming: &EntityGraph,
    table: &DecisionTable,
) -> ReconcileResult<Vec<Rename>> {
    let schema = target.schema();
    let mut fresh: Vec<(EntityId, PersistentId)> = Vec::new();
    for add in &table.adds {
        if let Some(pid) = schema.persistent_id(incoming.entity(add.incoming)?) {
            if target.resolve(&pid).is_none() {
                fresh.push((add.incoming, pid));
            }
        }
    }
    fresh.sort();

    let mut renames = Vec::new();
    for (&removed, operation) in &table.operations {
        if fresh.is_empty() {
            break;
        }
        if !matches!(operation, Operation::Remove) {
            continue;
        }
        let data = target.entity(removed)?;
        let Some(from) = schema.persistent_id(data) else { continue };
        if incoming.resolve(&from).is_some() {
            continue;
        }
        let position = fresh.iter().position(|(added, _)| {
            added.kind == removed.kind
                && incoming
                    .entity(*added)
                    .is_ok_and(|other| equal_apart_from_key(schema, data, other))
        });
        if let Some(position) = position {
            let (added, to) = fresh.remove(position);
            renames.push(Rename { removed, added, from, to });
        }
    }
    Ok(renames)
}

fn equal_apart_from_key(schema: &Schema, a: &EntityData, b: &EntityData) -> bool {
    let key = schema.kind(a.kind).map(|def| def.persistent_id.as_slice()).unwrap_or_default();
    fn annotate<F: for<'a> Fn(&'a EntityData) -> Vec<(&'a String, &'a grove_core::AttrValue)>>(f: F) -> F {
        f
    }
    let rest = annotate(|data: &EntityData| {
        data.attributes
            .iter()
            .filter(|(name, _)| !key.contains(*name))
            .collect::<Vec<_>>()
    });
    rest(a) == rest(b)
}
