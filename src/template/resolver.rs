//! Placeholder resolution for message templates.
//!
//! Supports direct `{{name}}` substitution and `{{format:name}}` where the
//! format prefix applies a deterministic, locale-independent formatter before
//! substitution. Resolution order: runtime variables override declared
//! defaults, and system variables fill any slot left unset or empty.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Utc};
use serde_json::Value;

use super::types::{RenderedMessage, Template, TemplateError, TemplateResult};

/// Built-in placeholder formatters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VariableFormat {
    Date,
    Datetime,
    Time,
    Currency,
    Number,
    Percentage,
}

impl VariableFormat {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "date" => Some(Self::Date),
            "datetime" => Some(Self::Datetime),
            "time" => Some(Self::Time),
            "currency" => Some(Self::Currency),
            "number" => Some(Self::Number),
            "percentage" => Some(Self::Percentage),
            _ => None,
        }
    }
}

/// Resolve a template against a runtime variable set.
///
/// Placeholders referencing undefined, non-defaulted variables are left
/// verbatim in the output and reported through
/// [`RenderedMessage::missing_variables`] so a human reviewer can spot the
/// gap; the run proceeds. Nested or unterminated placeholders fail the whole
/// resolution.
///
/// Apart from the once-per-call system clock read, resolution is a pure
/// function of its inputs.
pub fn resolve(
    template: &Template,
    variables: &HashMap<String, Value>,
) -> TemplateResult<RenderedMessage> {
    let vars = build_variable_map(template, variables, Utc::now());
    let mut state = RenderState::default();

    let subject = render_field("subject", &template.subject, &vars, &mut state)?;
    let body = render_field("body", &template.body, &vars, &mut state)?;
    let html_body = match &template.html_body {
        Some(html) => Some(render_field("html_body", html, &vars, &mut state)?),
        None => None,
    };

    Ok(RenderedMessage {
        subject,
        body,
        html_body,
        resolved_count: state.resolved.len(),
        missing_variables: state.missing,
    })
}

/// Merged variable view for one resolution pass.
///
/// Declared defaults first, runtime overrides on top, then system variables
/// for every slot still unset or empty. A runtime override cannot blank out a
/// system variable.
fn build_variable_map(
    template: &Template,
    runtime: &HashMap<String, Value>,
    now: DateTime<Utc>,
) -> HashMap<String, Value> {
    let mut vars: HashMap<String, Value> = HashMap::new();

    for declared in &template.variables {
        if let Some(default) = &declared.default_value {
            vars.insert(declared.name.clone(), default.clone());
        }
    }

    for (name, value) in runtime {
        vars.insert(name.clone(), value.clone());
    }

    for (name, value) in system_variables(now) {
        let overridden = vars.get(name).map(|v| !is_empty_value(v)).unwrap_or(false);
        if !overridden {
            vars.insert(name.to_string(), value);
        }
    }

    vars
}

fn system_variables(now: DateTime<Utc>) -> [(&'static str, Value); 5] {
    [
        ("timestamp", Value::String(now.to_rfc3339())),
        (
            "currentDate",
            Value::String(now.format("%Y-%m-%d").to_string()),
        ),
        ("year", Value::String(now.year().to_string())),
        ("month", Value::String(format!("{:02}", now.month()))),
        ("day", Value::String(format!("{:02}", now.day()))),
    ]
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

#[derive(Default)]
struct RenderState {
    resolved: Vec<String>,
    missing: Vec<String>,
}

impl RenderState {
    fn note_resolved(&mut self, name: &str) {
        if !self.resolved.iter().any(|n| n == name) {
            self.resolved.push(name.to_string());
        }
    }

    fn note_missing(&mut self, name: &str) {
        if !self.missing.iter().any(|n| n == name) {
            self.missing.push(name.to_string());
        }
    }
}

fn render_field(
    field: &str,
    text: &str,
    vars: &HashMap<String, Value>,
    state: &mut RenderState,
) -> TemplateResult<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = match after.find("}}") {
            Some(end) => end,
            None => {
                return Err(TemplateError::UnterminatedPlaceholder {
                    field: field.to_string(),
                })
            }
        };

        let token = &after[..end];
        if token.contains("{{") {
            return Err(TemplateError::NestedPlaceholder {
                field: field.to_string(),
            });
        }

        let (format, name) = split_token(token);
        match vars.get(name) {
            Some(value) => {
                let rendered = match format {
                    Some(f) => apply_format(f, value),
                    None => value_to_string(value),
                };
                out.push_str(&rendered);
                state.note_resolved(name);
            }
            None => {
                // Leave the placeholder visible so the gap is detectable.
                out.push_str("{{");
                out.push_str(token);
                out.push_str("}}");
                state.note_missing(name);
            }
        }

        rest = &after[end + 2..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Split `format:name` tokens. An unknown prefix is not an error: the whole
/// token is treated as a plain variable name.
fn split_token(token: &str) -> (Option<VariableFormat>, &str) {
    if let Some((prefix, name)) = token.split_once(':') {
        if let Some(format) = VariableFormat::parse(prefix.trim()) {
            return (Some(format), name.trim());
        }
    }
    (None, token.trim())
}

fn apply_format(format: VariableFormat, value: &Value) -> String {
    match format {
        VariableFormat::Date => match datetime_of(value) {
            Some(dt) => dt.format("%Y-%m-%d").to_string(),
            None => value_to_string(value),
        },
        VariableFormat::Datetime => match datetime_of(value) {
            Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => value_to_string(value),
        },
        VariableFormat::Time => match datetime_of(value) {
            Some(dt) => dt.format("%H:%M:%S").to_string(),
            None => value_to_string(value),
        },
        VariableFormat::Currency => match number_of(value) {
            Some(n) => format!("${}", group_thousands(n, 2)),
            None => value_to_string(value),
        },
        VariableFormat::Number => match number_of(value) {
            Some(n) if n.fract() == 0.0 => group_thousands(n, 0),
            Some(n) => group_thousands(n, 2),
            None => value_to_string(value),
        },
        VariableFormat::Percentage => match number_of(value) {
            Some(n) => format!("{:.1}%", n),
            None => value_to_string(value),
        },
    }
}

/// Accepts RFC 3339 strings and integer epoch seconds.
fn datetime_of(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(|secs| DateTime::from_timestamp(secs, 0)),
        _ => None,
    }
}

fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        // Arrays and objects substitute as their JSON representation
        _ => value.to_string(),
    }
}

fn group_thousands(n: f64, decimals: usize) -> String {
    let formatted = format!("{:.*}", decimals, n.abs());
    let (int_part, frac_part) = match formatted.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (formatted.as_str(), None),
    };

    let digits = int_part.len();
    let mut grouped = String::with_capacity(digits + digits / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (digits - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    let mut out = String::new();
    if n < 0.0 {
        out.push('-');
    }
    out.push_str(&grouped);
    if let Some(frac) = frac_part {
        out.push('.');
        out.push_str(frac);
    }
    out
}
