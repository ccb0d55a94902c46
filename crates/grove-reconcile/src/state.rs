//! Classification state and the decision table shared by both passes

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use grove_core::{ConnectionId, EntityGraph, EntityId, EntitySource, PersistentId};
use serde::{Serialize, Serializer};

use crate::error::{ReconcileError, ReconcileResult};
use crate::matching::ContentIndex;

/// A parent as seen from the target: an existing target entity, or an
/// incoming entity that the applier will add first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "ref", content = "id", rename_all = "snake_case")]
pub enum ParentRef {
    Target(EntityId),
    Added(EntityId),
}

impl fmt::Display for ParentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParentRef::Target(id) => write!(f, "target {}", id),
            ParentRef::Added(id) => write!(f, "added {}", id),
        }
    }
}

/// Resolved parents, at most one per connection.
pub type ParentLinks = Vec<(ConnectionId, ParentRef)>;

/// Record `parent` under `connection` unless the connection already has one.
pub(crate) fn link_parent(links: &mut ParentLinks, connection: ConnectionId, parent: ParentRef) {
    if !links.iter().any(|(c, _)| *c == connection) {
        links.push((connection, parent));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetState {
    NoChange(Option<EntityId>),
    Relabel {
        counterpart: EntityId,
        parents: Option<ParentLinks>,
    },
    Remove,
}

impl TargetState {
    /// The incoming entity this target entity maps to, if it survives.
    pub fn counterpart(&self) -> Option<EntityId> {
        match self {
            TargetState::NoChange(counterpart) => *counterpart,
            TargetState::Relabel { counterpart, .. } => Some(*counterpart),
            TargetState::Remove => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingState {
    NoChange(EntityId),
    Relabel(EntityId),
    ElementMoved,
    TraceLost,
}

impl IncomingState {
    /// How a child of this incoming entity refers to it from the target side.
    pub fn as_parent_ref(&self, incoming: EntityId) -> Option<ParentRef> {
        match self {
            IncomingState::NoChange(target) | IncomingState::Relabel(target) => Some(ParentRef::Target(*target)),
            IncomingState::ElementMoved => Some(ParentRef::Added(incoming)),
            IncomingState::TraceLost => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Relabel {
        counterpart: EntityId,
        parents: Option<ParentLinks>,
    },
    Remove,
}

/// Copy the incoming entity into the target under `parents`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddSubtree {
    pub parents: Option<ParentLinks>,
    pub incoming: EntityId,
}

/// A removed persistent-id holder and the incoming entity that replaces it
/// under a new persistent id. Soft references left outside the pass follow
/// `from` -> `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rename {
    pub removed: EntityId,
    pub added: EntityId,
    pub from: PersistentId,
    pub to: PersistentId,
}

/// Everything the applier will do, written by the matchers only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecisionTable {
    /// Additions in discovery order.
    pub adds: Vec<AddSubtree>,
    /// Relabels and removals keyed by target id.
    #[serde(serialize_with = "operations_as_list")]
    pub operations: BTreeMap<EntityId, Operation>,
    /// Removal and addition pairs that are one entity changing its
    /// persistent id.
    pub renames: Vec<Rename>,
}

// JSON maps only take string keys.
fn operations_as_list<S: Serializer>(operations: &BTreeMap<EntityId, Operation>, s: S) -> Result<S::Ok, S::Error> {
    #[derive(Serialize)]
    struct Entry<'a> {
        target: &'a EntityId,
        #[serde(flatten)]
        operation: &'a Operation,
    }
    s.collect_seq(operations.iter().map(|(target, operation)| Entry { target, operation }))
}

impl DecisionTable {
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.operations.is_empty()
    }

    pub fn relabel_count(&self) -> usize {
        self.operations
            .values()
            .filter(|op| matches!(op, Operation::Relabel { .. }))
            .count()
    }

    pub fn remove_count(&self) -> usize {
        self.operations.len() - self.relabel_count()
    }
}

/// State of one reconciliation call, threaded through both passes.
pub struct ReconcileContext<'a> {
    pub(crate) target: &'a EntityGraph,
    pub(crate) incoming: &'a EntityGraph,
    filter: &'a dyn Fn(&EntitySource) -> bool,
    pub(crate) target_state: HashMap<EntityId, TargetState>,
    pub(crate) incoming_state: HashMap<EntityId, IncomingState>,
    pub(crate) table: DecisionTable,
    /// Content index over the incoming side, for target roots.
    pub(crate) incoming_index: ContentIndex,
    /// Content index over the target side, for incoming roots.
    pub(crate) target_index: ContentIndex,
}

impl<'a> ReconcileContext<'a> {
    pub fn new(
        target: &'a EntityGraph,
        incoming: &'a EntityGraph,
        filter: &'a dyn Fn(&EntitySource) -> bool,
    ) -> Self {
        ReconcileContext {
            target,
            incoming,
            filter,
            target_state: HashMap::new(),
            incoming_state: HashMap::new(),
            table: DecisionTable::default(),
            incoming_index: ContentIndex::default(),
            target_index: ContentIndex::default(),
        }
    }

    pub(crate) fn target_matches(&self, id: EntityId) -> ReconcileResult<bool> {
        Ok((self.filter)(&self.target.entity(id)?.source))
    }

    pub(crate) fn incoming_matches(&self, id: EntityId) -> ReconcileResult<bool> {
        Ok((self.filter)(&self.incoming.entity(id)?.source))
    }

    pub(crate) fn set_target_state(&mut self, id: EntityId, state: TargetState) -> ReconcileResult<()> {
        if let Some(existing) = self.target_state.get(&id) {
            return Err(ReconcileError::invariant(format!(
                "target {} already classified as {:?}, got {:?}",
                id, existing, state
            )));
        }
        self.target_state.insert(id, state);
        Ok(())
    }

    pub(crate) fn set_incoming_state(&mut self, id: EntityId, state: IncomingState) -> ReconcileResult<()> {
        if let Some(existing) = self.incoming_state.get(&id) {
            return Err(ReconcileError::invariant(format!(
                "incoming {} already classified as {:?}, got {:?}",
                id, existing, state
            )));
        }
        self.incoming_state.insert(id, state);
        Ok(())
    }

    fn schedule(&mut self, target: EntityId, operation: Operation) -> ReconcileResult<()> {
        if self.table.operations.contains_key(&target) {
            return Err(ReconcileError::invariant(format!(
                "operation already scheduled for {}",
                target
            )));
        }
        self.table.operations.insert(target, operation);
        Ok(())
    }

    /// `target` takes over the data of `incoming`, keeping its id.
    pub(crate) fn relabel(
        &mut self,
        target: EntityId,
        incoming: EntityId,
        parents: Option<ParentLinks>,
    ) -> ReconcileResult<()> {
        tracing::debug!("relabel target {} from incoming {}", target, incoming);
        self.schedule(
            target,
            Operation::Relabel {
                counterpart: incoming,
                parents: parents.clone(),
            },
        )?;
        self.set_target_state(
            target,
            TargetState::Relabel {
                counterpart: incoming,
                parents,
            },
        )?;
        self.set_incoming_state(incoming, IncomingState::Relabel(target))
    }

    /// Delete `target`; its counterpart, if any, is no longer traceable.
    pub(crate) fn remove(&mut self, target: EntityId, incoming: Option<EntityId>) -> ReconcileResult<()> {
        tracing::debug!("remove target {}", target);
        self.schedule(target, Operation::Remove)?;
        self.set_target_state(target, TargetState::Remove)?;
        if let Some(incoming) = incoming {
            self.set_incoming_state(incoming, IncomingState::TraceLost)?;
        }
        Ok(())
    }

    pub(crate) fn no_change(&mut self, target: EntityId, incoming: Option<EntityId>) -> ReconcileResult<()> {
        tracing::debug!("keep target {} (counterpart {:?})", target, incoming);
        self.set_target_state(target, TargetState::NoChange(incoming))?;
        if let Some(incoming) = incoming {
            self.set_incoming_state(incoming, IncomingState::NoChange(target))?;
        }
        Ok(())
    }

    pub(crate) fn trace_lost(&mut self, incoming: EntityId) -> ReconcileResult<()> {
        tracing::debug!("incoming {} cannot be traced into the target", incoming);
        self.set_incoming_state(incoming, IncomingState::TraceLost)
    }

    pub(crate) fn schedule_add(&mut self, parents: Option<ParentLinks>, incoming: EntityId) -> ReconcileResult<()> {
        tracing::debug!("add incoming {} under {:?}", incoming, parents);
        self.table.adds.push(AddSubtree { parents, incoming });
        self.set_incoming_state(incoming, IncomingState::ElementMoved)
    }

    /// Number of target entities left in place.
    pub(crate) fn untouched_count(&self) -> usize {
        self.target_state
            .values()
            .filter(|state| matches!(state, TargetState::NoChange(_)))
            .count()
    }

    pub(crate) fn trace_lost_count(&self) -> usize {
        self.incoming_state
            .values()
            .filter(|state| matches!(state, IncomingState::TraceLost))
            .count()
    }

    /// Hand the decisions to the applier.
    pub fn into_table(self) -> DecisionTable {
        self.table
    }
}
