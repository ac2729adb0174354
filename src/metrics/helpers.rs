//! Metrics helper struct for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use crate::channel::{Channel, SendStatus};
use crate::delivery::DeliveryStatus;

use super::{
    ATTEMPTS_TOTAL, DELIVERY_LATENCY, ESCALATIONS_TOTAL, PAIRS_FINALIZED_TOTAL, RETRIES_TOTAL,
    RUNS_TOTAL, VALIDATION_REJECTED_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording delivery metrics
pub struct DeliveryMetrics;

impl DeliveryMetrics {
    /// Record a processed run
    pub fn record_run() {
        RUNS_TOTAL.inc();
    }

    /// Record one delivery attempt and its outcome
    pub fn record_attempt(channel: Channel, outcome: SendStatus) {
        let outcome_label = match outcome {
            SendStatus::Success => "success",
            SendStatus::TransientFailure => "transient_failure",
            SendStatus::PermanentFailure => "permanent_failure",
        };
        ATTEMPTS_TOTAL
            .with_label_values(&[channel.as_str(), outcome_label])
            .inc();
    }

    /// Record a retry scheduled after a transient failure
    pub fn record_retry() {
        RETRIES_TOTAL.inc();
    }

    /// Record a pair reaching its terminal status
    pub fn record_finalized(status: DeliveryStatus) {
        PAIRS_FINALIZED_TOTAL
            .with_label_values(&[status.as_str()])
            .inc();
    }

    /// Record a pair excluded by validation
    pub fn record_validation_rejected() {
        VALIDATION_REJECTED_TOTAL.inc();
    }

    /// Record an escalation decision
    pub fn record_escalation(trigger: &str) {
        ESCALATIONS_TOTAL.with_label_values(&[trigger]).inc();
    }

    /// Observe the latency of a successful attempt
    pub fn observe_delivery_latency(latency_ms: u64) {
        DELIVERY_LATENCY.observe(latency_ms as f64 / 1000.0);
    }
}
