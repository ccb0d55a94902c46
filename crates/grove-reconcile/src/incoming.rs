//! Incoming pass: place every filtered incoming entity into the target,
//! scheduling additions for whatever has no counterpart there.

use grove_core::{ConnectionId, EntityData, EntityId};

use crate::error::{ReconcileError, ReconcileResult};
use crate::matching::{find_by_content, find_child};
use crate::state::{link_parent, IncomingState, ParentLinks, ParentRef, ReconcileContext, TargetState};
use crate::target::process_target;
use crate::track::{Track, TrackIdx};

/// Classify one incoming entity along with every ancestor it depends on.
pub(crate) fn process_incoming(ctx: &mut ReconcileContext<'_>, entity: EntityId) -> ReconcileResult<()> {
    if ctx.incoming_state.contains_key(&entity) {
        return Ok(());
    }
    let track = Track::build(ctx.incoming, entity)?;
    place(ctx, &track, track.start())?;
    Ok(())
}

fn place(ctx: &mut ReconcileContext<'_>, track: &Track, node: TrackIdx) -> ReconcileResult<Option<ParentRef>> {
    let entity = track.entity(node);
    if let Some(state) = ctx.incoming_state.get(&entity) {
        return Ok(state.as_parent_ref(entity));
    }
    if track.is_root(node) {
        return resolve_root(ctx, entity);
    }

    let mut resolved = ParentLinks::new();
    for &parent in track.parents(node) {
        if let Some(parent_ref) = place(ctx, track, parent)? {
            link_parent(&mut resolved, track.connection(parent)?, parent_ref);
        }
    }
    // Adding a parent's subtree may already have taken this entity along.
    if let Some(state) = ctx.incoming_state.get(&entity) {
        return Ok(state.as_parent_ref(entity));
    }
    if resolved.is_empty() {
        ctx.trace_lost(entity)?;
        return Ok(None);
    }

    let incoming = ctx.incoming;
    let data = incoming.entity(entity)?;
    let Some(found) = first_target_child(ctx, &resolved, data)? else {
        if ctx.incoming_matches(entity)? {
            add_subtree(ctx, Some(resolved), entity)?;
            return Ok(Some(ParentRef::Added(entity)));
        }
        ctx.trace_lost(entity)?;
        return Ok(None);
    };

    if ctx.target_matches(found)? {
        return Err(ReconcileError::invariant(format!(
            "filtered target {} was not classified before the incoming pass",
            found
        )));
    }
    if ctx.incoming_matches(entity)? {
        ctx.relabel(found, entity, Some(resolved))?;
    } else {
        ctx.no_change(found, Some(entity))?;
    }
    Ok(Some(ParentRef::Target(found)))
}

/// Find the target counterpart of an incoming root and classify both.
fn resolve_root(ctx: &mut ReconcileContext<'_>, entity: EntityId) -> ReconcileResult<Option<ParentRef>> {
    let target = ctx.target;
    let incoming = ctx.incoming;
    let data = incoming.entity(entity)?;

    let found = match target.schema().persistent_id(data) {
        Some(pid) => target.resolve(&pid),
        None => {
            let classified = &ctx.target_state;
            match find_by_content(&mut ctx.target_index, target, data, |id| classified.contains_key(&id))? {
                Some(found) => Some(found),
                None => find_by_content(&mut ctx.target_index, target, data, |_| false)?,
            }
        }
    };

    let Some(found) = found else {
        if ctx.incoming_matches(entity)? {
            add_subtree(ctx, None, entity)?;
            return Ok(Some(ParentRef::Added(entity)));
        }
        ctx.trace_lost(entity)?;
        return Ok(None);
    };

    // Reached from the target pass before `found` had its turn.
    if !ctx.target_state.contains_key(&found) && ctx.target_matches(found)? {
        process_target(ctx, found)?;
    }

    match ctx.target_state.get(&found) {
        Some(TargetState::Remove) => {
            if !ctx.incoming_state.contains_key(&entity) {
                ctx.trace_lost(entity)?;
            }
            return Ok(None);
        }
        Some(_) => {
            if !ctx.incoming_state.contains_key(&entity) {
                ctx.set_incoming_state(entity, IncomingState::NoChange(found))?;
            }
            return Ok(Some(ParentRef::Target(found)));
        }
        None => {}
    }

    if ctx.target_matches(found)? {
        return Err(ReconcileError::invariant(format!(
            "filtered target {} was not classified before the incoming pass",
            found
        )));
    }
    if ctx.incoming_matches(entity)? {
        ctx.relabel(found, entity, None)?;
    } else {
        ctx.no_change(found, Some(entity))?;
    }
    Ok(Some(ParentRef::Target(found)))
}

/// Schedule `entity` for addition, then every filtered descendant that has
/// no counterpart in the target.
pub(crate) fn add_subtree(
    ctx: &mut ReconcileContext<'_>,
    parents: Option<ParentLinks>,
    entity: EntityId,
) -> ReconcileResult<()> {
    match ctx.incoming_state.get(&entity) {
        Some(IncomingState::ElementMoved) => return Ok(()),
        Some(state) => {
            return Err(ReconcileError::invariant(format!(
                "cannot add incoming {} already classified as {:?}",
                entity, state
            )))
        }
        None => {}
    }
    ctx.schedule_add(parents, entity)?;

    let incoming = ctx.incoming;
    for (connection, child) in incoming.children(entity)? {
        if ctx.incoming_state.contains_key(&child) {
            continue;
        }
        if !ctx.incoming_matches(child)? {
            ctx.trace_lost(child)?;
            continue;
        }

        let track = Track::build(incoming, child)?;
        if let Some(ParentRef::Target(_)) = find_same_in_target(ctx, &track, track.start())? {
            continue;
        }
        // Resolving other parents may have added the child already.
        if ctx.incoming_state.contains_key(&child) {
            continue;
        }

        let mut child_parents = ParentLinks::new();
        link_parent(&mut child_parents, connection, ParentRef::Added(entity));
        for &parent in track.parents(track.start()) {
            if track.entity(parent) == entity {
                continue;
            }
            if let Some(parent_ref) = find_same_in_target(ctx, &track, parent)? {
                link_parent(&mut child_parents, track.connection(parent)?, parent_ref);
            }
        }
        add_subtree(ctx, Some(child_parents), child)?;
    }
    Ok(())
}

/// Map the incoming entity at `node` to a target reference without
/// classifying it, except for roots which classify as they resolve.
pub(crate) fn find_same_in_target(
    ctx: &mut ReconcileContext<'_>,
    track: &Track,
    node: TrackIdx,
) -> ReconcileResult<Option<ParentRef>> {
    let entity = track.entity(node);
    if let Some(state) = ctx.incoming_state.get(&entity) {
        return Ok(state.as_parent_ref(entity));
    }
    if track.is_root(node) {
        return resolve_root(ctx, entity);
    }

    let mut resolved = ParentLinks::new();
    for &parent in track.parents(node) {
        if let Some(parent_ref) = find_same_in_target(ctx, track, parent)? {
            link_parent(&mut resolved, track.connection(parent)?, parent_ref);
        }
    }
    if let Some(state) = ctx.incoming_state.get(&entity) {
        return Ok(state.as_parent_ref(entity));
    }

    let incoming = ctx.incoming;
    let data = incoming.entity(entity)?;
    if let Some(found) = first_target_child(ctx, &resolved, data)? {
        return Ok(Some(ParentRef::Target(found)));
    }
    // Under a parent being added, a filtered entity will be added as well.
    let under_added = resolved.iter().any(|(_, parent)| matches!(parent, ParentRef::Added(_)));
    if under_added && ctx.incoming_matches(entity)? {
        return Ok(Some(ParentRef::Added(entity)));
    }
    Ok(None)
}

/// First unclassified target child content-equal to `data` under any of the
/// existing target parents, visited in link order.
fn first_target_child(
    ctx: &ReconcileContext<'_>,
    parents: &[(ConnectionId, ParentRef)],
    data: &EntityData,
) -> ReconcileResult<Option<EntityId>> {
    for (connection, parent) in parents {
        let ParentRef::Target(parent) = parent else { continue };
        let found = find_child(ctx.target, *parent, connection, data, |id| {
            ctx.target_state.contains_key(&id)
        })?;
        if found.is_some() {
            return Ok(found);
        }
    }
    Ok(None)
}
