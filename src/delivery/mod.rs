//! Delivery state tracking: the per-pair status machine, attempts and records.

pub mod backoff;
mod orchestrator;

pub use orchestrator::{CancelToken, DispatchLimits, Orchestrator, RecipientPlan};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

use crate::channel::Channel;

/// Delivery-specific error type
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Invalid status transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: DeliveryStatus,
        to: DeliveryStatus,
    },

    #[error("Engagement requires a delivered notification, record is {status:?}")]
    NotDelivered { status: DeliveryStatus },
}

/// State of one (recipient, channel) pair.
///
/// `Pending -> Sending -> {Delivered | Failed | Bounced | Blocked | Spam}`,
/// with `Delivered -> Read -> Clicked -> Converted` driven by engagement
/// events (monotonic, forward-only). `Cancelled` is reachable from `Pending`
/// and `Sending` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Pending,
    Sending,
    Delivered,
    Read,
    Clicked,
    Converted,
    Failed,
    Bounced,
    Blocked,
    Spam,
    Cancelled,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sending => "sending",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Read => "read",
            DeliveryStatus::Clicked => "clicked",
            DeliveryStatus::Converted => "converted",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Bounced => "bounced",
            DeliveryStatus::Blocked => "blocked",
            DeliveryStatus::Spam => "spam",
            DeliveryStatus::Cancelled => "cancelled",
        }
    }

    /// The message reached the recipient (possibly with further engagement).
    pub fn is_delivered_class(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Delivered
                | DeliveryStatus::Read
                | DeliveryStatus::Clicked
                | DeliveryStatus::Converted
        )
    }

    /// Terminal without delivery.
    pub fn is_failure_class(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Failed
                | DeliveryStatus::Bounced
                | DeliveryStatus::Blocked
                | DeliveryStatus::Spam
        )
    }

    /// No further automatic transition occurs from this state. Engagement
    /// transitions out of delivered-class states are externally driven.
    pub fn is_terminal(&self) -> bool {
        self.is_delivered_class() || self.is_failure_class() || *self == DeliveryStatus::Cancelled
    }

    /// Position on the engagement ladder, for delivered-class states only.
    pub fn engagement_rank(&self) -> Option<u8> {
        match self {
            DeliveryStatus::Delivered => Some(0),
            DeliveryStatus::Read => Some(1),
            DeliveryStatus::Clicked => Some(2),
            DeliveryStatus::Converted => Some(3),
            _ => None,
        }
    }

    /// Whether the state machine permits moving from `self` to `to`.
    pub fn can_transition(&self, to: DeliveryStatus) -> bool {
        match self {
            DeliveryStatus::Pending => {
                matches!(to, DeliveryStatus::Sending | DeliveryStatus::Cancelled)
            }
            DeliveryStatus::Sending => {
                to == DeliveryStatus::Delivered
                    || to.is_failure_class()
                    || to == DeliveryStatus::Cancelled
            }
            // Engagement moves strictly forward; skipping levels is allowed.
            _ => match (self.engagement_rank(), to.engagement_rank()) {
                (Some(from_rank), Some(to_rank)) => to_rank > from_rank,
                _ => false,
            },
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Post-delivery engagement reported by the sender or a later event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Engagement {
    Read,
    Clicked,
    Converted,
}

impl Engagement {
    pub fn as_status(&self) -> DeliveryStatus {
        match self {
            Engagement::Read => DeliveryStatus::Read,
            Engagement::Clicked => DeliveryStatus::Clicked,
            Engagement::Converted => DeliveryStatus::Converted,
        }
    }
}

/// One delivery try for one (recipient, channel) pair. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    /// 1-based attempt number
    pub attempt_number: u32,

    pub attempted_at: DateTime<Utc>,

    /// Status this attempt produced (`Delivered`, or the failure it mapped to)
    pub status: DeliveryStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Provider-reported latency for this attempt
    pub response_time_ms: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_ref: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

/// Terminal state of one (recipient, channel) pair, with its full attempt
/// history. Owned exclusively by the orchestrator while a run is in flight
/// and returned to the caller by value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub recipient_id: String,
    pub channel: Channel,

    /// Attempts in order; never overwritten or discarded
    pub attempts: SmallVec<[DeliveryAttempt; 4]>,

    pub status: DeliveryStatus,

    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Wall-clock time from dispatch start to the terminal state
    pub elapsed_ms: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clicked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub converted_at: Option<DateTime<Utc>>,
}

impl DeliveryRecord {
    /// Open a record for a pair about to be dispatched.
    pub fn new(recipient_id: impl Into<String>, channel: Channel) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            channel,
            attempts: SmallVec::new(),
            status: DeliveryStatus::Pending,
            started_at: Utc::now(),
            finished_at: None,
            elapsed_ms: 0,
            opened_at: None,
            clicked_at: None,
            converted_at: None,
        }
    }

    /// A pair that was never started because the run was cancelled.
    pub fn cancelled(recipient_id: impl Into<String>, channel: Channel, at: DateTime<Utc>) -> Self {
        let mut record = Self::new(recipient_id, channel);
        record.started_at = at;
        record.finalize(DeliveryStatus::Cancelled, at);
        record
    }

    pub fn begin_sending(&mut self) {
        self.status = DeliveryStatus::Sending;
    }

    /// Append an attempt. Attempts accumulate; none is ever dropped.
    pub fn push_attempt(&mut self, attempt: DeliveryAttempt) {
        self.attempts.push(attempt);
    }

    /// Close the record with its terminal status.
    pub fn finalize(&mut self, status: DeliveryStatus, at: DateTime<Utc>) {
        self.status = status;
        self.finished_at = Some(at);
        self.elapsed_ms = (at - self.started_at).num_milliseconds().max(0) as u64;
    }

    /// Apply a post-delivery engagement event. Only delivered-class records
    /// accept engagement, and only strictly forward on the ladder.
    pub fn record_engagement(
        &mut self,
        engagement: Engagement,
        at: DateTime<Utc>,
    ) -> Result<(), DeliveryError> {
        let target = engagement.as_status();

        if self.status.engagement_rank().is_none() {
            return Err(DeliveryError::NotDelivered {
                status: self.status,
            });
        }

        if !self.status.can_transition(target) {
            return Err(DeliveryError::InvalidTransition {
                from: self.status,
                to: target,
            });
        }

        self.status = target;
        match engagement {
            Engagement::Read => self.opened_at = Some(at),
            Engagement::Clicked => self.clicked_at = Some(at),
            Engagement::Converted => self.converted_at = Some(at),
        }
        Ok(())
    }

    /// Whether the recipient engaged with the message beyond delivery.
    pub fn has_engagement(&self) -> bool {
        self.status.engagement_rank().map(|r| r > 0).unwrap_or(false)
    }

    /// The error recorded on the last attempt, if any.
    pub fn last_error(&self) -> Option<(&str, &str)> {
        let last = self.attempts.last()?;
        match (&last.error_code, &last.error_message) {
            (Some(code), Some(message)) => Some((code.as_str(), message.as_str())),
            _ => None,
        }
    }
}
