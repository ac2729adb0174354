//! Per-channel recipient validation.
//!
//! Checks run in precedence order: opt-out first (it overrides everything),
//! then the channel's contact-data requirement, then consent. Consent handling
//! depends on the run's validation mode: strict mode rejects the pair, lenient
//! mode lets it through flagged.

use crate::channel::Channel;
use crate::notification::{ComplianceSettings, ValidationMode};

use super::Recipient;

/// Result of validating one (recipient, channel) pair.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub reason: Option<String>,
    /// Set when consent is missing but the pair proceeds under lenient mode.
    pub consent_flagged: bool,
}

impl ValidationOutcome {
    fn valid() -> Self {
        Self {
            is_valid: true,
            reason: None,
            consent_flagged: false,
        }
    }

    fn invalid(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            reason: Some(reason.into()),
            consent_flagged: false,
        }
    }

    fn flagged(reason: impl Into<String>) -> Self {
        Self {
            is_valid: true,
            reason: Some(reason.into()),
            consent_flagged: true,
        }
    }
}

/// Validate that a recipient can be dispatched on a channel.
pub fn validate(
    recipient: &Recipient,
    channel: Channel,
    compliance: &ComplianceSettings,
) -> ValidationOutcome {
    if recipient.opted_out {
        return ValidationOutcome::invalid("recipient has opted out");
    }

    if let Some(outcome) = check_contact_data(recipient, channel) {
        return outcome;
    }

    if compliance.require_consent && !recipient.consent_granted {
        return match compliance.validation_mode {
            ValidationMode::Strict => ValidationOutcome::invalid("explicit consent not recorded"),
            ValidationMode::Lenient => ValidationOutcome::flagged("explicit consent not recorded"),
        };
    }

    ValidationOutcome::valid()
}

fn check_contact_data(recipient: &Recipient, channel: Channel) -> Option<ValidationOutcome> {
    match channel {
        Channel::Email => match &recipient.email {
            Some(email) if is_valid_email(email) => None,
            Some(_) => Some(ValidationOutcome::invalid("email address is not valid")),
            None => Some(ValidationOutcome::invalid("no email address on record")),
        },
        c if c.requires_phone() => match &recipient.phone {
            Some(phone) if is_valid_phone(phone) => None,
            Some(_) => Some(ValidationOutcome::invalid("phone number is not valid")),
            None => Some(ValidationOutcome::invalid("no phone number on record")),
        },
        _ => match &recipient.user_ref {
            Some(user_ref) if !user_ref.is_empty() => None,
            _ => Some(ValidationOutcome::invalid("no user identifier on record")),
        },
    }
}

/// Syntactic `local@domain` check. Full RFC 5321 parsing belongs to the
/// provider adapter; this only filters obviously undeliverable addresses.
fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };

    !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
        && email.matches('@').count() == 1
}

/// E.164-like: optional `+`, 1-15 digits, no leading zero.
fn is_valid_phone(phone: &str) -> bool {
    let digits = phone.strip_prefix('+').unwrap_or(phone);

    !digits.is_empty()
        && digits.len() <= 15
        && !digits.starts_with('0')
        && digits.chars().all(|c| c.is_ascii_digit())
}
