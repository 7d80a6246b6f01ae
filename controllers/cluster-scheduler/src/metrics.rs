//! # Metrics
//!
//! Prometheus series exported by the scheduler.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILE_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("fleet_reconcile_total", "Reconciliations by reconciler and outcome"),
        &["reconciler", "outcome"],
    )
    .expect("Failed to create RECONCILE_TOTAL metric - this should never happen")
});

static DEDUP_DROPPED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "fleet_dedup_dropped_total",
        "Events dropped by the deduplicating queue because no consumer was ready",
    )
    .expect("Failed to create DEDUP_DROPPED_TOTAL metric - this should never happen")
});

static QUEUE_REQUEUES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "fleet_queue_requeues_total",
        "Cluster events re-added through the rate limiter",
    )
    .expect("Failed to create QUEUE_REQUEUES_TOTAL metric - this should never happen")
});

static CERTIFICATES_SIGNED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "fleet_certificates_signed_total",
        "Agent certificates issued",
    )
    .expect("Failed to create CERTIFICATES_SIGNED_TOTAL metric - this should never happen")
});

/// Register all series with [`REGISTRY`]
pub fn register_metrics() -> Result<(), prometheus::Error> {
    REGISTRY.register(Box::new(RECONCILE_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DEDUP_DROPPED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(QUEUE_REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CERTIFICATES_SIGNED_TOTAL.clone()))?;
    Ok(())
}

pub fn record_reconcile(reconciler: &str, ok: bool) {
    let outcome = if ok { "success" } else { "error" };
    RECONCILE_TOTAL.with_label_values(&[reconciler, outcome]).inc();
}

pub fn increment_requeues() {
    QUEUE_REQUEUES_TOTAL.inc();
}

pub fn increment_certificates_signed() {
    CERTIFICATES_SIGNED_TOTAL.inc();
}

/// Catch the counter up with the queue's running drop total
pub fn observe_dedup_dropped(total: u64) {
    let seen = DEDUP_DROPPED_TOTAL.get();
    if total > seen {
        DEDUP_DROPPED_TOTAL.inc_by(total - seen);
    }
}

/// Text exposition of every registered series
pub fn gather() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
