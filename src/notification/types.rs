use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analytics::AnalyticsSnapshot;
use crate::channel::Channel;
use crate::delivery::DeliveryRecord;
use crate::escalation::{EscalationDecision, EscalationRule};
use crate::recipient::Recipient;
use crate::template::Template;

/// Immutable per-run input describing one notification run.
///
/// Owned by the caller; the engine never mutates it. Validated once at the
/// entry boundary, not defensively re-checked throughout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfiguration {
    /// Caller-assigned configuration identifier
    pub id: String,

    /// Configuration version, echoed into audit events
    #[serde(default)]
    pub version: u32,

    /// Channels to dispatch on, in order. Duplicates are ignored.
    pub channels: Vec<Channel>,

    /// The message template, rendered once per run
    pub template: Template,

    /// Recipients to fan out to
    pub recipients: Vec<Recipient>,

    /// Priority level
    #[serde(default)]
    pub priority: Priority,

    /// Retry behavior for transient failures
    #[serde(default)]
    pub retry_policy: RetryPolicy,

    /// Escalation rules evaluated after dispatch
    #[serde(default)]
    pub escalation_rules: Vec<EscalationRule>,

    /// Load shaping; absent means one batch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batching: Option<BatchOptions>,

    /// Consent and validation-mode settings
    #[serde(default)]
    pub compliance: ComplianceSettings,
}

/// Priority levels for notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub enum Priority {
    /// Low priority, can be delayed
    Low,
    /// Normal priority (default)
    #[default]
    Normal,
    /// High priority, should be delivered promptly
    High,
    /// Critical priority, immediate delivery required
    Critical,
}

impl Priority {
    /// Get numeric value for priority comparison
    pub fn as_weight(&self) -> u8 {
        match self {
            Priority::Low => 1,
            Priority::Normal => 2,
            Priority::High => 3,
            Priority::Critical => 4,
        }
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_weight().cmp(&other.as_weight())
    }
}

/// Retry behavior for transient delivery failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts per pair, including the first (>= 1)
    pub max_attempts: u32,

    /// Base delay between attempts in milliseconds
    pub retry_delay_ms: u64,

    /// When set, attempt k waits `retry_delay_ms * 2^(k-1)`
    #[serde(default)]
    pub exponential_backoff: bool,

    /// When non-empty, only the listed channels retry automatically;
    /// pairs on other channels get a single attempt.
    #[serde(default)]
    pub retry_channels: Vec<Channel>,

    /// Jitter factor (0.0 to 1.0). Zero keeps delays deterministic.
    #[serde(default)]
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 1_000,
            exponential_backoff: true,
            retry_channels: Vec::new(),
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Whether pairs on this channel may retry after a transient failure.
    pub fn allows_retry_on(&self, channel: Channel) -> bool {
        self.retry_channels.is_empty() || self.retry_channels.contains(&channel)
    }
}

/// Load shaping: recipients are processed in fixed-size groups with a delay
/// between groups, bounding peak concurrent load on the channel sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOptions {
    /// Recipients per batch (>= 1)
    pub batch_size: usize,

    /// Delay between consecutive batches in milliseconds
    pub batch_interval_ms: u64,
}

/// Consent requirements for the run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ComplianceSettings {
    /// Whether an active compliance framework requires explicit consent
    #[serde(default)]
    pub require_consent: bool,

    #[serde(default)]
    pub validation_mode: ValidationMode,
}

/// How consent gaps are treated during validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// Missing consent invalidates the pair
    #[default]
    Strict,
    /// Missing consent is flagged but the pair proceeds
    Lenient,
}

/// Everything a run produced, returned to the caller as one value.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationResult {
    /// Engine-assigned run identifier
    pub run_id: Uuid,

    /// True when at least one pair reached a delivered-class state
    pub success: bool,

    /// Terminal delivery record per dispatched (recipient, channel) pair
    pub delivery_records: Vec<DeliveryRecord>,

    /// Escalation rules that fired, in rule order
    pub escalation_decisions: Vec<EscalationDecision>,

    /// Aggregated metrics over the run window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analytics: Option<AnalyticsSnapshot>,

    /// Placeholder names the template could not resolve
    pub missing_variables: Vec<String>,

    /// Recoverable errors recorded during the run (validation exclusions,
    /// consent flags). These never abort the run.
    pub errors: Vec<RunError>,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// A recoverable error recorded against a run, with enough context to
/// reconstruct what happened without replaying the run.
#[derive(Debug, Clone, Serialize)]
pub struct RunError {
    /// Stable machine-readable code (`validation_failed`, `no_usable_channel`,
    /// `consent_flagged`)
    pub code: String,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
}

impl RunError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            recipient_id: None,
            channel: None,
        }
    }

    pub fn for_pair(
        code: impl Into<String>,
        message: impl Into<String>,
        recipient_id: impl Into<String>,
        channel: Channel,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            recipient_id: Some(recipient_id.into()),
            channel: Some(channel),
        }
    }

    pub fn for_recipient(
        code: impl Into<String>,
        message: impl Into<String>,
        recipient_id: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            recipient_id: Some(recipient_id.into()),
            channel: None,
        }
    }
}
