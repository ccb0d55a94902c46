//! Target pass: find the incoming counterpart of every filtered target entity

use grove_core::EntityId;

use crate::error::ReconcileResult;
use crate::incoming::find_same_in_target;
use crate::matching::{find_by_content, find_child};
use crate::state::{link_parent, ParentLinks, ParentRef, ReconcileContext};
use crate::track::{Track, TrackIdx};

/// Classify one target entity along with every ancestor it depends on.
pub(crate) fn process_target(ctx: &mut ReconcileContext<'_>, entity: EntityId) -> ReconcileResult<()> {
    if ctx.target_state.contains_key(&entity) {
        return Ok(());
    }
    let track = Track::build(ctx.target, entity)?;
    find_same_entity(ctx, &track, track.start())?;
    Ok(())
}

/// Returns the incoming counterpart of the target entity at `node`, or
/// `None` when it has none or is going away.
fn find_same_entity(
    ctx: &mut ReconcileContext<'_>,
    track: &Track,
    node: TrackIdx,
) -> ReconcileResult<Option<EntityId>> {
    // Parents first: their counterparts are where the children get searched.
    let mut resolved = Vec::with_capacity(track.parents(node).len());
    for &parent in track.parents(node) {
        resolved.push((parent, find_same_entity(ctx, track, parent)?));
    }

    let entity = track.entity(node);
    if let Some(state) = ctx.target_state.get(&entity) {
        return Ok(state.counterpart());
    }
    if track.is_root(node) {
        return find_root(ctx, entity);
    }

    let target = ctx.target;
    let incoming = ctx.incoming;
    let data = target.entity(entity)?;

    let mut parents = ParentLinks::new();
    let mut counterpart = None;
    let mut first_hit = resolved.len();
    for (position, (parent, incoming_parent)) in resolved.iter().enumerate() {
        let Some(incoming_parent) = incoming_parent else { continue };
        let connection = track.connection(*parent)?;
        let found = find_child(incoming, *incoming_parent, &connection, data, |id| {
            ctx.incoming_state.contains_key(&id)
        })?;
        if let Some(found) = found {
            link_parent(&mut parents, connection, ParentRef::Target(track.entity(*parent)));
            counterpart = Some(found);
            first_hit = position;
            break;
        }
    }

    if let Some(counterpart) = counterpart {
        // Later parents count only when they hold the very same counterpart.
        for (parent, incoming_parent) in resolved.iter().skip(first_hit + 1) {
            let Some(incoming_parent) = incoming_parent else { continue };
            let connection = track.connection(*parent)?;
            if incoming.children_of(*incoming_parent, &connection)?.contains(&counterpart) {
                link_parent(&mut parents, connection, ParentRef::Target(track.entity(*parent)));
            }
        }

        // The counterpart's own parents, mapped back into the target.
        let counterpart_track = Track::build(incoming, counterpart)?;
        for &parent in counterpart_track.parents(counterpart_track.start()) {
            let connection = counterpart_track.connection(parent)?;
            if let Some(parent_ref) = find_same_in_target(ctx, &counterpart_track, parent)? {
                link_parent(&mut parents, connection, parent_ref);
            }
        }
    }

    let required_missing = target
        .schema()
        .required_connections(entity.kind)
        .any(|required| !parents.iter().any(|(connection, _)| connection == required));
    let target_matches = ctx.target_matches(entity)?;

    let counterpart = match counterpart {
        Some(counterpart) if !required_missing => counterpart,
        _ => {
            if target_matches {
                ctx.remove(entity, None)?;
            } else {
                ctx.no_change(entity, None)?;
            }
            return Ok(None);
        }
    };

    // A counterpart classified while resolving its parents cannot be claimed twice.
    if ctx.incoming_state.contains_key(&counterpart) {
        if target_matches {
            ctx.remove(entity, None)?;
        } else {
            ctx.no_change(entity, None)?;
        }
        return Ok(None);
    }

    decide(ctx, entity, counterpart, target_matches, Some(parents))
}

/// Root entities match by persistent id, or by content among unclaimed
/// incoming entities of the same kind.
fn find_root(ctx: &mut ReconcileContext<'_>, entity: EntityId) -> ReconcileResult<Option<EntityId>> {
    let target = ctx.target;
    let incoming = ctx.incoming;
    let data = target.entity(entity)?;

    let counterpart = match target.schema().persistent_id(data) {
        Some(pid) => incoming
            .resolve(&pid)
            .filter(|id| !ctx.incoming_state.contains_key(id)),
        None => {
            let claimed = &ctx.incoming_state;
            find_by_content(&mut ctx.incoming_index, incoming, data, |id| claimed.contains_key(&id))?
        }
    };

    let target_matches = ctx.target_matches(entity)?;
    match counterpart {
        Some(counterpart) => decide(ctx, entity, counterpart, target_matches, None),
        None => {
            if target_matches {
                ctx.remove(entity, None)?;
            } else {
                ctx.no_change(entity, None)?;
            }
            Ok(None)
        }
    }
}

/// Apply the filtered-target by filtered-counterpart matrix.
fn decide(
    ctx: &mut ReconcileContext<'_>,
    entity: EntityId,
    counterpart: EntityId,
    target_matches: bool,
    parents: Option<ParentLinks>,
) -> ReconcileResult<Option<EntityId>> {
    let incoming_matches = ctx.incoming_matches(counterpart)?;
    match (target_matches, incoming_matches) {
        (true, true) | (false, true) => {
            ctx.relabel(entity, counterpart, parents)?;
            Ok(Some(counterpart))
        }
        (true, false) => {
            ctx.remove(entity, Some(counterpart))?;
            Ok(None)
        }
        (false, false) => {
            ctx.no_change(entity, Some(counterpart))?;
            Ok(Some(counterpart))
        }
    }
}
