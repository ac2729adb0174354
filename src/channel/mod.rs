//! Delivery channels and the channel sender capability.
//!
//! The engine never talks to SMTP servers, SMS gateways or chat APIs itself.
//! It drives an injected [`ChannelSender`] and interprets the returned
//! [`SendOutcome`]; provider adapters live outside this crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::recipient::Recipient;
use crate::template::RenderedMessage;

/// A delivery medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
    Voice,
    Fax,
    Slack,
    Teams,
    InApp,
    Push,
}

impl Channel {
    /// Stable lowercase name, used for metric labels and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Voice => "voice",
            Channel::Fax => "fax",
            Channel::Slack => "slack",
            Channel::Teams => "teams",
            Channel::InApp => "in_app",
            Channel::Push => "push",
        }
    }

    /// Channels delivered over the phone network.
    pub fn requires_phone(&self) -> bool {
        matches!(self, Channel::Sms | Channel::Voice | Channel::Fax)
    }

    /// Chat-style channels addressed by an opaque user reference.
    pub fn requires_user_ref(&self) -> bool {
        matches!(
            self,
            Channel::Slack | Channel::Teams | Channel::InApp | Channel::Push
        )
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of one send attempt as reported by the provider adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    /// Message accepted and delivered.
    Success,
    /// Retryable failure (timeout, provider 5xx-equivalent).
    TransientFailure,
    /// Non-retryable failure (invalid recipient, hard bounce).
    PermanentFailure,
}

/// Outcome of a single delivery attempt over one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendOutcome {
    pub status: SendStatus,
    /// Provider-reported latency for the attempt.
    pub latency_ms: u64,
    /// Provider message reference, when the provider issued one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_ref: Option<String>,
    /// Cost charged for the attempt, in the caller's currency unit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl SendOutcome {
    /// Successful delivery.
    pub fn success(latency_ms: u64) -> Self {
        Self {
            status: SendStatus::Success,
            latency_ms,
            provider_ref: None,
            cost: None,
            error_code: None,
            error_message: None,
        }
    }

    /// Retryable failure.
    pub fn transient(latency_ms: u64, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: SendStatus::TransientFailure,
            latency_ms,
            provider_ref: None,
            cost: None,
            error_code: Some(code.into()),
            error_message: Some(message.into()),
        }
    }

    /// Non-retryable failure. The `code` selects the terminal delivery state:
    /// `hard_bounce` maps to BOUNCED, `blocked`/`suppressed` to BLOCKED,
    /// `spam`/`spam_report` to SPAM, anything else to FAILED.
    pub fn permanent(latency_ms: u64, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: SendStatus::PermanentFailure,
            latency_ms,
            provider_ref: None,
            cost: None,
            error_code: Some(code.into()),
            error_message: Some(message.into()),
        }
    }

    /// Attach a provider message reference.
    pub fn with_provider_ref(mut self, provider_ref: impl Into<String>) -> Self {
        self.provider_ref = Some(provider_ref.into());
        self
    }

    /// Attach the attempt cost.
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }
}

/// Capability that attempts delivery of one rendered message to one recipient
/// over one channel.
///
/// The engine works against any implementation of this trait: a real provider
/// adapter in production, a scripted mock in tests. Implementations are
/// expected to enforce their own wire-level timeouts; the orchestrator applies
/// an overall per-attempt timeout on top and treats it as a transient failure.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(
        &self,
        recipient: &Recipient,
        channel: Channel,
        message: &RenderedMessage,
    ) -> SendOutcome;
}
