//! Ancestor tracks: for one entity, the tree of its parents up to every root

use grove_core::{ConnectionId, EntityGraph, EntityId};

use crate::error::{ReconcileError, ReconcileResult};

/// Index of a node inside a [`Track`].
pub type TrackIdx = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackNode {
    pub entity: EntityId,
    /// Connection linking this node to its `child`. `None` at the start node.
    pub connection: Option<ConnectionId>,
    /// The node that asked for this one as a parent.
    pub child: Option<TrackIdx>,
    /// Parent nodes, in the child kind's connection declaration order.
    pub parents: Vec<TrackIdx>,
}

/// Arena holding the ancestor tree of one entity. Node 0 is that entity.
///
/// An ancestor reachable along two paths appears once per path.
#[derive(Debug, Clone)]
pub struct Track {
    nodes: Vec<TrackNode>,
}

impl Track {
    /// Build the track of `entity` in `graph`. Fails on parent cycles.
    pub fn build(graph: &EntityGraph, entity: EntityId) -> ReconcileResult<Track> {
        Track::from_parents(entity, |id| Ok(graph.parents_of(id)?))
    }

    /// Build a track by asking `parents_of` for the parents of each entity
    /// on the way up. A parent already on the current path is a cycle.
    pub fn from_parents<P>(entity: EntityId, parents_of: P) -> ReconcileResult<Track>
    where
        P: Fn(EntityId) -> ReconcileResult<Vec<(ConnectionId, EntityId)>>,
    {
        let mut track = Track {
            nodes: vec![TrackNode {
                entity,
                connection: None,
                child: None,
                parents: Vec::new(),
            }],
        };
        let mut path = vec![entity];
        track.attach_parents(&parents_of, 0, &mut path)?;
        Ok(track)
    }

    fn attach_parents<P>(&mut self, parents_of: &P, idx: TrackIdx, path: &mut Vec<EntityId>) -> ReconcileResult<()>
    where
        P: Fn(EntityId) -> ReconcileResult<Vec<(ConnectionId, EntityId)>>,
    {
        let entity = self.nodes[idx].entity;
        for (connection, parent) in parents_of(entity)? {
            if path.contains(&parent) {
                return Err(ReconcileError::invariant(format!(
                    "parent cycle through {} while tracking {}",
                    parent, path[0]
                )));
            }
            let parent_idx = self.nodes.len();
            self.nodes.push(TrackNode {
                entity: parent,
                connection: Some(connection),
                child: Some(idx),
                parents: Vec::new(),
            });
            self.nodes[idx].parents.push(parent_idx);

            path.push(parent);
            self.attach_parents(parents_of, parent_idx, path)?;
            path.pop();
        }
        Ok(())
    }

    /// The node of the entity the track was built for.
    pub fn start(&self) -> TrackIdx {
        0
    }

    pub fn node(&self, idx: TrackIdx) -> &TrackNode {
        &self.nodes[idx]
    }

    pub fn entity(&self, idx: TrackIdx) -> EntityId {
        self.nodes[idx].entity
    }

    pub fn parents(&self, idx: TrackIdx) -> &[TrackIdx] {
        &self.nodes[idx].parents
    }

    /// Connection between `idx` and its child. Errors at the start node.
    pub fn connection(&self, idx: TrackIdx) -> ReconcileResult<ConnectionId> {
        self.nodes[idx]
            .connection
            .ok_or_else(|| ReconcileError::invariant(format!("track node {} has no child", self.nodes[idx].entity)))
    }

    pub fn is_root(&self, idx: TrackIdx) -> bool {
        self.nodes[idx].parents.is_empty()
    }

    /// Follow single-parent links up to the root. Errors if any node on the
    /// way has more than one parent.
    pub fn single_root(&self) -> ReconcileResult<EntityId> {
        let mut idx = self.start();
        loop {
            match self.nodes[idx].parents.as_slice() {
                [] => return Ok(self.nodes[idx].entity),
                [parent] => idx = *parent,
                _ => {
                    return Err(ReconcileError::invariant(format!(
                        "{} has more than one parent",
                        self.nodes[idx].entity
                    )))
                }
            }
        }
    }

    /// Number of nodes, duplicates included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
