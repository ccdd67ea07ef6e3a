//! Prometheus metrics for the engine
//!
//! Counters and histograms are process-wide statics registered in a
//! dedicated registry; `gather()` renders the text exposition format.

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::LazyLock;

use ade_rl::Action;

use crate::selector::Strategy;

/// Prometheus registry for engine metrics
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(|| {
    let registry = Registry::new();

    let collectors: [Box<dyn prometheus::core::Collector>; 7] = [
        Box::new(ANSWERS_TOTAL.clone()),
        Box::new(ACTIONS_TOTAL.clone()),
        Box::new(REWARD.clone()),
        Box::new(UNLOCKS_TOTAL.clone()),
        Box::new(MILESTONES_TOTAL.clone()),
        Box::new(QCACHE_HITS.clone()),
        Box::new(QCACHE_MISSES.clone()),
    ];
    for collector in collectors {
        if let Err(e) = registry.register(collector) {
            tracing::warn!("Failed to register metric: {}", e);
        }
    }

    registry
});

// =============================================================================
// Answer processing
// =============================================================================

/// Answers by outcome: processed, duplicate or error
pub static ANSWERS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("answers_total", "Answers submitted to the engine")
            .namespace("ade")
            .subsystem("engine"),
        &["outcome"],
    )
    .expect("valid metric definition")
});

/// Chosen actions by action and strategy
pub static ACTIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("actions_total", "Actions chosen")
            .namespace("ade")
            .subsystem("policy"),
        &["action", "strategy"],
    )
    .expect("valid metric definition")
});

pub static REWARD: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new("reward", "Reward per transition")
            .namespace("ade")
            .subsystem("policy")
            .buckets(vec![-15.0, -10.0, -5.0, -2.0, 0.0, 2.0, 5.0, 10.0, 15.0, 20.0, 25.0, 35.0]),
    )
    .expect("valid metric definition")
});

// =============================================================================
// Progression
// =============================================================================

pub static UNLOCKS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::with_opts(
        Opts::new("unlocks_total", "Units unlocked")
            .namespace("ade")
            .subsystem("progression"),
    )
    .expect("valid metric definition")
});

/// Mastery milestones by level
pub static MILESTONES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("milestones_total", "Mastery milestones reached")
            .namespace("ade")
            .subsystem("progression"),
        &["level"],
    )
    .expect("valid metric definition")
});

// =============================================================================
// Q-table cache
// =============================================================================

pub static QCACHE_HITS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::with_opts(
        Opts::new("hits_total", "Q-table cache hits")
            .namespace("ade")
            .subsystem("qcache"),
    )
    .expect("valid metric definition")
});

pub static QCACHE_MISSES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::with_opts(
        Opts::new("misses_total", "Q-table cache misses")
            .namespace("ade")
            .subsystem("qcache"),
    )
    .expect("valid metric definition")
});

// =============================================================================
// Helper Functions
// =============================================================================

/// Render all metrics in Prometheus text format
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_else(|e| format!("# Error encoding metrics: {e}"))
}

pub fn record_answer(outcome: &str) {
    ANSWERS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_decision(action: Action, strategy: Strategy, reward: f64) {
    ACTIONS_TOTAL
        .with_label_values(&[action.as_str(), strategy.as_str()])
        .inc();
    REWARD.observe(reward);
}

pub fn record_unlock() {
    UNLOCKS_TOTAL.inc();
}

pub fn record_milestone(level: &str) {
    MILESTONES_TOTAL.with_label_values(&[level]).inc();
}

pub fn record_cache_lookup(hit: bool) {
    if hit {
        QCACHE_HITS.inc();
    } else {
        QCACHE_MISSES.inc();
    }
}
