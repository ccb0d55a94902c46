//! Grove Reconcile: replace-by-source merging of one entity graph into another

pub mod applier;
pub mod error;
pub mod incoming;
pub mod matching;
pub mod options;
pub mod state;
pub mod target;
pub mod track;


#[cfg(test)]
pub mod test_utils;

use grove_core::{Builder, EntityGraph, EntityId, EntitySource, Snapshot};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

pub use applier::{Applied, Applier};
pub use error::{ReconcileError, ReconcileResult};
pub use options::{ReconcileOptions, ReconcileReport};
pub use state::{
    AddSubtree, DecisionTable, IncomingState, Operation, ParentRef, ReconcileContext, Rename, TargetState,
};
pub use track::{Track, TrackNode};

/// Replace everything in `target` that comes from a source accepted by
/// `filter` with the matching entities of `incoming`. Entities from other
/// sources stay as they are.
pub fn reconcile<F>(target: &mut Builder, incoming: &Snapshot, filter: F) -> ReconcileResult<()>
where
    F: Fn(&EntitySource) -> bool,
{
    Reconciler::new().run(target, incoming, filter).map(|_| ())
}

/// Runs reconciliation passes with fixed options.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    options: ReconcileOptions,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ReconcileOptions) -> Self {
        Reconciler { options }
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Classify both sides, then apply the decisions to `target`.
    /// On error the target is left partially modified.
    pub fn run<F>(&self, target: &mut Builder, incoming: &Snapshot, filter: F) -> ReconcileResult<ReconcileReport>
    where
        F: Fn(&EntitySource) -> bool,
    {
        let (table, untouched, trace_lost) = self.plan(target.graph(), incoming, &filter)?;
        let applied = Applier::new(target, incoming).apply(table)?;

        let report = ReconcileReport {
            added: applied.added,
            relabeled: applied.relabeled,
            removed: applied.removed,
            untouched,
            trace_lost,
        };
        tracing::info!("reconcile finished: {}", report);
        Ok(report)
    }

    /// Run both classification passes without touching the target.
    pub fn decide<F>(&self, target: &EntityGraph, incoming: &EntityGraph, filter: F) -> ReconcileResult<DecisionTable>
    where
        F: Fn(&EntitySource) -> bool,
    {
        self.plan(target, incoming, &filter).map(|(table, _, _)| table)
    }

    fn plan(
        &self,
        target: &EntityGraph,
        incoming: &EntityGraph,
        filter: &dyn Fn(&EntitySource) -> bool,
    ) -> ReconcileResult<(DecisionTable, usize, usize)> {
        if target.schema() != incoming.schema() {
            return Err(ReconcileError::Unsupported(
                "target and incoming graphs use different schemas".to_string(),
            ));
        }

        let target_order = self.visit_order(target, filter);
        let incoming_order = self.visit_order(incoming, filter);
        tracing::debug!(
            "reconciling {} target and {} incoming entities",
            target_order.len(),
            incoming_order.len()
        );

        let mut ctx = ReconcileContext::new(target, incoming, filter);
        // Every filtered target entity is classified before the incoming side
        // is looked at.
        for id in target_order {
            target::process_target(&mut ctx, id)?;
        }
        for id in incoming_order {
            incoming::process_incoming(&mut ctx, id)?;
        }

        let untouched = ctx.untouched_count();
        let trace_lost = ctx.trace_lost_count();
        let mut table = ctx.into_table();
        table.renames = matching::find_renames(target, incoming, &table)?;
        tracing::debug!(
            "planned {} adds, {} relabels, {} removals, {} renames",
            table.adds.len(),
            table.relabel_count(),
            table.remove_count(),
            table.renames.len()
        );
        Ok((table, untouched, trace_lost))
    }

    /// Filtered entities by kind, then source, then index, shuffled when a
    /// seed is set.
    fn visit_order(&self, graph: &EntityGraph, filter: &dyn Fn(&EntitySource) -> bool) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = graph
            .entities_by_source(filter)
            .into_values()
            .flat_map(|by_source| by_source.into_values().flatten())
            .collect();
        if let Some(seed) = self.options.shuffle_seed {
            let mut rng = StdRng::seed_from_u64(seed);
            ids.shuffle(&mut rng);
        }
        ids
    }
}
