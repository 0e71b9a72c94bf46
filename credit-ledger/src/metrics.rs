//! Metrics collection for observability
//!
//! Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `ledger_entries_total` - Entries appended
//! - `ledger_duplicate_refs_total` - Replays absorbed by ref uniqueness
//! - `ledger_seconds_billed_total` - Whole seconds billed across all calls
//! - `ledger_calls_finalized_total` - Calls finalized
//! - `ledger_apply_duration_seconds` - Histogram of mutation latencies

use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Entries appended
    pub entries_total: IntCounter,

    /// Duplicate refs absorbed
    pub duplicate_refs_total: IntCounter,

    /// Whole seconds billed
    pub seconds_billed_total: IntCounter,

    /// Calls finalized
    pub calls_finalized_total: IntCounter,

    /// Mutation latency histogram
    pub apply_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let entries_total = IntCounter::with_opts(Opts::new(
            "ledger_entries_total",
            "Total number of ledger entries appended",
        ))?;
        registry.register(Box::new(entries_total.clone()))?;

        let duplicate_refs_total = IntCounter::with_opts(Opts::new(
            "ledger_duplicate_refs_total",
            "Total number of replays absorbed by idempotency ref uniqueness",
        ))?;
        registry.register(Box::new(duplicate_refs_total.clone()))?;

        let seconds_billed_total = IntCounter::with_opts(Opts::new(
            "ledger_seconds_billed_total",
            "Total whole seconds billed across all calls",
        ))?;
        registry.register(Box::new(seconds_billed_total.clone()))?;

        let calls_finalized_total = IntCounter::with_opts(Opts::new(
            "ledger_calls_finalized_total",
            "Total number of calls finalized",
        ))?;
        registry.register(Box::new(calls_finalized_total.clone()))?;

        let apply_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_apply_duration_seconds",
                "Histogram of mutation latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(apply_duration.clone()))?;

        Ok(Self {
            entries_total,
            duplicate_refs_total,
            seconds_billed_total,
            calls_finalized_total,
            apply_duration,
            registry,
        })
    }

    /// Record an applied entry (or an absorbed duplicate)
    pub fn record_applied(&self, newly_applied: bool) {
        if newly_applied {
            self.entries_total.inc();
        } else {
            self.duplicate_refs_total.inc();
        }
    }

    /// Record billed seconds
    pub fn record_seconds_billed(&self, seconds: u64) {
        self.seconds_billed_total.inc_by(seconds);
    }

    /// Record a call finalization
    pub fn record_call_finalized(&self) {
        self.calls_finalized_total.inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
