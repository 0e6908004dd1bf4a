//! Partner ordering strategies.
//!
//! A strategy decides which of two partners the request queue serves first.
//! It sees only a [`PartnerState`] snapshot, never the ledger, so every
//! strategy is a pure function that can be tested without an engine.
//! Reciprocity enters the picture through the freeze value, which the
//! engine's freeze policy maintains.
//!
//! Any strategy must be a strict weak ordering (irreflexive and transitive,
//! with transitive incomparability) because it backs a binary heap.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// The per-partner facts a strategy may order on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PartnerState {
    /// Requests awaiting dispatch.
    pub pending: usize,
    /// Penalty counter.
    pub freeze: u32,
    /// Tasks dispatched to workers and not yet done.
    pub active: usize,
    /// Task queue length, cancelled entries included.
    pub backlog: usize,
}

/// Returns `true` when partner `a` should be served before partner `b`.
pub trait Strategy: Send + Sync {
    fn before(&self, a: &PartnerState, b: &PartnerState) -> bool;
}

impl<F> Strategy for F
where
    F: Fn(&PartnerState, &PartnerState) -> bool + Send + Sync,
{
    fn before(&self, a: &PartnerState, b: &PartnerState) -> bool {
        self(a, b)
    }
}

/// Default fairness ordering.
///
/// 1. Partners with nothing pending sink below everyone else.
/// 2. Lower freeze value first.
/// 3. Fewer tasks in flight first, spreading workers across partners.
/// 4. Longer backlog first, so cancelled entries get cleared out.
pub fn fair(a: &PartnerState, b: &PartnerState) -> bool {
    // Both checks are needed for a stable sort.
    if a.pending == 0 {
        return false;
    }
    if b.pending == 0 {
        return true;
    }

    if a.freeze != b.freeze {
        return a.freeze < b.freeze;
    }

    if a.active == b.active {
        return a.backlog > b.backlog;
    }
    a.active < b.active
}

/// Backlog-only ordering: drains the partner with the most queued work.
pub fn backlog_first(a: &PartnerState, b: &PartnerState) -> bool {
    if a.pending == 0 {
        return false;
    }
    if b.pending == 0 {
        return true;
    }
    a.backlog > b.backlog
}

/// Strategies selectable from configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[default]
    Fair,
    Backlog,
}

impl StrategyKind {
    pub fn build(self) -> Arc<dyn Strategy> {
        match self {
            Self::Fair => Arc::new(fair),
            Self::Backlog => Arc::new(backlog_first),
        }
    }
}
