//! Pass options and the post-pass report

use std::fmt;

use serde::{Deserialize, Serialize};

/// Knobs for a single reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileOptions {
    /// Shuffle the visitation order of both passes with this seed.
    /// `None` visits in kind, source, then index order.
    pub shuffle_seed: Option<u64>,
}

impl ReconcileOptions {
    pub fn with_seed(seed: u64) -> Self {
        ReconcileOptions {
            shuffle_seed: Some(seed),
        }
    }
}

/// What a pass did to the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Entities copied from the incoming snapshot.
    pub added: usize,
    /// Target entities that took over an incoming entity's data.
    pub relabeled: usize,
    /// Target entities deleted, cascades included.
    pub removed: usize,
    /// Target entities classified but left alone.
    pub untouched: usize,
    /// Incoming entities that could not be traced into the target.
    pub trace_lost: usize,
}

impl ReconcileReport {
    /// True when the pass left the target as it was.
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.relabeled == 0 && self.removed == 0
    }
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} added, {} relabeled, {} removed, {} untouched, {} trace lost",
            self.added, self.relabeled, self.removed, self.untouched, self.trace_lost
        )
    }
}
