//! Recipients and per-channel contact validation.

mod validator;

pub use validator::{validate, ValidationOutcome};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channel::Channel;

/// A notification recipient with their contact data and consent state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    /// Caller-assigned recipient identifier
    pub id: String,

    /// Email address (for the email channel)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Phone number in E.164-like form (for sms/voice/fax channels)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    /// Opaque user identifier (for chat and push channels)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_ref: Option<String>,

    /// Channel the recipient prefers, informational for the caller
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_channel: Option<Channel>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,

    /// An opted-out recipient is invalid for every channel.
    #[serde(default)]
    pub opted_out: bool,

    /// Whether the recipient has recorded explicit consent.
    #[serde(default)]
    pub consent_granted: bool,

    /// When consent was recorded, if it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consent_at: Option<DateTime<Utc>>,
}

impl Recipient {
    /// Minimal constructor; contact methods are attached with the builders below.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            phone: None,
            user_ref: None,
            preferred_channel: None,
            timezone: None,
            locale: None,
            opted_out: false,
            consent_granted: false,
            consent_at: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_user_ref(mut self, user_ref: impl Into<String>) -> Self {
        self.user_ref = Some(user_ref.into());
        self
    }

    pub fn with_consent(mut self, at: DateTime<Utc>) -> Self {
        self.consent_granted = true;
        self.consent_at = Some(at);
        self
    }

    pub fn opted_out(mut self) -> Self {
        self.opted_out = true;
        self
    }
}
