//! Template types and error definitions

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::channel::Channel;

/// Template-specific error type.
///
/// Syntax errors are configuration-class: no message can be produced, so the
/// whole run is aborted before any dispatch attempt.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Nested placeholder in template field '{field}'")]
    NestedPlaceholder { field: String },

    #[error("Unterminated placeholder in template field '{field}'")]
    UnterminatedPlaceholder { field: String },

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),
}

/// Result type for template operations
pub type TemplateResult<T> = Result<T, TemplateError>;

/// A message template with `{{name}}` / `{{format:name}}` placeholders.
///
/// Supplied whole per run and immutable during processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    /// Unique template identifier (alphanumeric, dash, underscore)
    pub id: String,

    /// Channel this template was authored for, if any. Informational only;
    /// the same rendered output is dispatched on every configured channel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_affinity: Option<Channel>,

    /// Subject line template
    pub subject: String,

    /// Plain-text body template
    pub body: String,

    /// HTML body template (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_body: Option<String>,

    /// Declared variables with defaults and sensitivity flags
    #[serde(default)]
    pub variables: Vec<TemplateVariable>,
}

impl Template {
    /// Validate the template shape (placeholder syntax is checked at render time).
    pub fn validate(&self) -> TemplateResult<()> {
        if self.id.is_empty() || self.id.len() > 64 {
            return Err(TemplateError::InvalidTemplate(
                "ID must be 1-64 characters".to_string(),
            ));
        }

        if !self
            .id
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            return Err(TemplateError::InvalidTemplate(
                "ID must contain only alphanumeric, dash, or underscore".to_string(),
            ));
        }

        if self.subject.is_empty() && self.body.is_empty() {
            return Err(TemplateError::InvalidTemplate(
                "Template must define a subject or a body".to_string(),
            ));
        }

        Ok(())
    }
}

/// Declared template variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateVariable {
    pub name: String,

    /// Required variables still render as literal placeholders when missing;
    /// the gap is reported through `missing_variables`, not as an error.
    #[serde(default)]
    pub required: bool,

    /// Static value used when the runtime variables do not supply one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<serde_json::Value>,

    /// Sensitive values are redacted from audit events and logs.
    #[serde(default)]
    pub sensitive: bool,
}

/// A template rendered against one variable set, ready for dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_body: Option<String>,

    /// Number of distinct variable names substituted at least once.
    pub resolved_count: usize,

    /// Distinct placeholder names left unresolved, in first-seen order.
    pub missing_variables: Vec<String>,
}
