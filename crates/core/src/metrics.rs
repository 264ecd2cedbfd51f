//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Message channel (produced and consumed events, decode failures)
//! - Reconciliation (outcomes, failovers, terminal failures, notifications)
//! - Expiry sweeps

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Message Channel
// =============================================================================

/// Events produced to the broker by kind and result.
pub static EVENTS_PRODUCED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ticketgate_events_produced_total",
            "Total ticket events produced to the broker",
        ),
        &["kind", "result"], // result: "ok", "error"
    )
    .unwrap()
});

/// Events consumed from the broker by kind.
pub static EVENTS_CONSUMED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ticketgate_events_consumed_total",
            "Total ticket events consumed from the broker",
        ),
        &["kind"],
    )
    .unwrap()
});

/// Consumed payloads that could not be decoded.
pub static DECODE_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "ticketgate_decode_failures_total",
        "Consumed messages dropped because they could not be decoded",
    )
    .unwrap()
});

// =============================================================================
// Reconciliation
// =============================================================================

/// Reconciliation outcomes.
pub static RECONCILIATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ticketgate_reconciliations_total",
            "Backend replies reconciled, by outcome",
        ),
        &["outcome"], // "accepted", "rerouted", "exhausted", "forwarded", "closed", "reopened", "dropped", "failed"
    )
    .unwrap()
});

/// Reconciliation duration in seconds.
pub static RECONCILE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "ticketgate_reconcile_duration_seconds",
            "Duration of a single reconciliation",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
        &["kind"],
    )
    .unwrap()
});

/// One-shot failovers to the alternate backend.
pub static FAILOVERS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "ticketgate_failovers_total",
        "Rejected creates resubmitted to the alternate backend",
    )
    .unwrap()
});

/// Creates rejected by every backend.
pub static TERMINAL_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "ticketgate_terminal_failures_total",
        "Creates rejected by both the primary and the alternate backend",
    )
    .unwrap()
});

/// Notifications delivered to sources by result.
pub static NOTIFICATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ticketgate_notifications_total",
            "Notifications posted to originating sources",
        ),
        &["source", "result"], // result: "ok", "error"
    )
    .unwrap()
});

/// Events waiting in reconciler worker queues.
pub static RECONCILER_QUEUED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "ticketgate_reconciler_queued",
        "Events waiting in reconciler worker queues",
    )
    .unwrap()
});

// =============================================================================
// Expiry Sweeper
// =============================================================================

/// Completed sweeps.
pub static SWEEPS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("ticketgate_sweeps_total", "Total expiry sweeps completed").unwrap()
});

/// Stale records flagged by sweeps.
pub static STALE_RECORDS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "ticketgate_stale_records_total",
        "Records flagged as stale while awaiting a backend reply",
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Channel
        Box::new(EVENTS_PRODUCED.clone()),
        Box::new(EVENTS_CONSUMED.clone()),
        Box::new(DECODE_FAILURES.clone()),
        // Reconciliation
        Box::new(RECONCILIATIONS.clone()),
        Box::new(RECONCILE_DURATION.clone()),
        Box::new(FAILOVERS.clone()),
        Box::new(TERMINAL_FAILURES.clone()),
        Box::new(NOTIFICATIONS.clone()),
        Box::new(RECONCILER_QUEUED.clone()),
        // Sweeper
        Box::new(SWEEPS.clone()),
        Box::new(STALE_RECORDS.clone()),
    ]
}
