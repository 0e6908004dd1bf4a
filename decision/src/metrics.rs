//! Prometheus metrics for the decision engine.
//!
//! [`EngineMetrics`] owns a dedicated [`Registry`] so that several engines
//! in one process (as in tests) never collide on metric names. An embedding
//! node can gather it into its own exposition endpoint.

use prometheus::{
    register_histogram_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Histogram, HistogramOpts, IntCounter, IntGauge, Opts,
    Registry,
};

pub struct EngineMetrics {
    /// The Prometheus registry that owns every metric below.
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    /// Blocks handed to the transport successfully.
    pub blocks_sent: IntCounter,
    /// Payload bytes handed to the transport successfully.
    pub bytes_sent: IntCounter,
    /// Payload bytes received from peers.
    pub bytes_received: IntCounter,
    /// Tasks dropped because the block was not held.
    pub blocks_not_found: IntCounter,
    pub store_errors: IntCounter,
    pub transport_errors: IntCounter,
    pub tasks_retried: IntCounter,
    /// Tasks abandoned after exhausting their retries.
    pub tasks_dropped: IntCounter,
    pub freezes: IntCounter,
    pub thaws: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    pub active_partners: IntGauge,
    pub frozen_partners: IntGauge,

    // ── Histograms ──────────────────────────────────────────────────────
    /// Time from pop to done for a single task, in milliseconds.
    pub serve_time_ms: Histogram,
}

impl EngineMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let blocks_sent = register_int_counter_with_registry!(
            Opts::new("bitswap_blocks_sent_total", "Blocks delivered to peers"),
            registry
        )
        .expect("failed to register blocks_sent counter");

        let bytes_sent = register_int_counter_with_registry!(
            Opts::new("bitswap_bytes_sent_total", "Block payload bytes delivered to peers"),
            registry
        )
        .expect("failed to register bytes_sent counter");

        let bytes_received = register_int_counter_with_registry!(
            Opts::new("bitswap_bytes_received_total", "Block payload bytes received from peers"),
            registry
        )
        .expect("failed to register bytes_received counter");

        let blocks_not_found = register_int_counter_with_registry!(
            Opts::new(
                "bitswap_blocks_not_found_total",
                "Tasks dropped because the block is not held locally"
            ),
            registry
        )
        .expect("failed to register blocks_not_found counter");

        let store_errors = register_int_counter_with_registry!(
            Opts::new("bitswap_store_errors_total", "Blockstore failures while serving"),
            registry
        )
        .expect("failed to register store_errors counter");

        let transport_errors = register_int_counter_with_registry!(
            Opts::new("bitswap_transport_errors_total", "Transport failures while serving"),
            registry
        )
        .expect("failed to register transport_errors counter");

        let tasks_retried = register_int_counter_with_registry!(
            Opts::new("bitswap_tasks_retried_total", "Tasks requeued after a failure"),
            registry
        )
        .expect("failed to register tasks_retried counter");

        let tasks_dropped = register_int_counter_with_registry!(
            Opts::new("bitswap_tasks_dropped_total", "Tasks dropped after exhausting retries"),
            registry
        )
        .expect("failed to register tasks_dropped counter");

        let freezes = register_int_counter_with_registry!(
            Opts::new("bitswap_partner_freezes_total", "Partners moved to the frozen set"),
            registry
        )
        .expect("failed to register freezes counter");

        let thaws = register_int_counter_with_registry!(
            Opts::new("bitswap_partner_thaws_total", "Partners returned from the frozen set"),
            registry
        )
        .expect("failed to register thaws counter");

        let active_partners = register_int_gauge_with_registry!(
            Opts::new("bitswap_active_partners", "Registered partners not frozen"),
            registry
        )
        .expect("failed to register active_partners gauge");

        let frozen_partners = register_int_gauge_with_registry!(
            Opts::new("bitswap_frozen_partners", "Partners excluded from scheduling"),
            registry
        )
        .expect("failed to register frozen_partners gauge");

        let serve_time_ms = register_histogram_with_registry!(
            HistogramOpts::new("bitswap_serve_time_ms", "Time to serve one task in milliseconds")
                .buckets(vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0]),
            registry
        )
        .expect("failed to register serve_time_ms histogram");

        Self {
            registry,
            blocks_sent,
            bytes_sent,
            bytes_received,
            blocks_not_found,
            store_errors,
            transport_errors,
            tasks_retried,
            tasks_dropped,
            freezes,
            thaws,
            active_partners,
            frozen_partners,
            serve_time_ms,
        }
    }

    /// Update the partner gauges from a fresh count.
    pub fn set_partners(&self, active: usize, frozen: usize) {
        self.active_partners.set(active as i64);
        self.frozen_partners.set(frozen as i64);
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_without_collision() {
        let m = EngineMetrics::new();
        m.blocks_sent.inc();
        m.bytes_sent.inc_by(512);
        m.set_partners(3, 1);

        let families = m.registry.gather();
        assert_eq!(families.len(), 13);
        assert_eq!(m.bytes_sent.get(), 512);
        assert_eq!(m.active_partners.get(), 3);
        assert_eq!(m.frozen_partners.get(), 1);
    }

    #[test]
    fn separate_instances_are_independent() {
        let a = EngineMetrics::new();
        let b = EngineMetrics::new();
        a.freezes.inc();
        assert_eq!(a.freezes.get(), 1);
        assert_eq!(b.freezes.get(), 0);
    }
}
