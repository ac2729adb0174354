//! Prometheus metrics for the delivery engine.
//!
//! Counters cover attempts by channel and outcome, retries, finalized pairs by
//! terminal status, escalations by trigger, and per-run totals, plus a
//! delivery latency histogram.

mod helpers;

pub use helpers::{encode_metrics, DeliveryMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "courier";

lazy_static! {
    /// Total notification runs processed
    pub static ref RUNS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_runs_total", METRIC_PREFIX),
        "Total notification runs processed"
    ).unwrap();

    /// Delivery attempts by channel and outcome
    pub static ref ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_attempts_total", METRIC_PREFIX),
        "Delivery attempts",
        &["channel", "outcome"]
    ).unwrap();

    /// Retries scheduled after transient failures
    pub static ref RETRIES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_retries_total", METRIC_PREFIX),
        "Retries scheduled after transient failures"
    ).unwrap();

    /// Pairs finalized by terminal status
    pub static ref PAIRS_FINALIZED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_pairs_finalized_total", METRIC_PREFIX),
        "Delivery records closed, by terminal status",
        &["status"]
    ).unwrap();

    /// Recipient/channel pairs excluded by validation
    pub static ref VALIDATION_REJECTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_validation_rejected_total", METRIC_PREFIX),
        "Recipient/channel pairs excluded by validation"
    ).unwrap();

    /// Escalation decisions by trigger
    pub static ref ESCALATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_escalations_total", METRIC_PREFIX),
        "Escalation decisions fired, by trigger",
        &["trigger"]
    ).unwrap();

    /// Latency of successful delivery attempts
    pub static ref DELIVERY_LATENCY: Histogram = register_histogram!(
        format!("{}_delivery_latency_seconds", METRIC_PREFIX),
        "Latency of successful delivery attempts in seconds",
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    ).unwrap();
}
