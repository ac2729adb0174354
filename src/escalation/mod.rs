//! Escalation rule evaluation.
//!
//! Rules are evaluated independently against the closed delivery records and
//! the run's elapsed wall-clock time; several may fire in one run. Decisions
//! are advisory output for the caller: the evaluator never mutates records or
//! retries deliveries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::delivery::DeliveryRecord;
use crate::notification::Priority;

/// Fraction of failure-class records above which `DeliveryFailed` fires.
const FAILURE_RATE_THRESHOLD: f64 = 0.5;

/// Condition under which a rule fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "snake_case")]
pub enum EscalationTrigger {
    /// Wall-clock time since the run started reached the timeout
    TimeElapsed { timeout_minutes: u32 },
    /// More than half of the records failed or bounced
    DeliveryFailed,
    /// At least one record exists and none was read or clicked
    NoResponse,
    /// The run's declared priority is High or above
    PriorityIncreased,
}

impl EscalationTrigger {
    /// Stable name, used for metric labels and audit events.
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationTrigger::TimeElapsed { .. } => "time_elapsed",
            EscalationTrigger::DeliveryFailed => "delivery_failed",
            EscalationTrigger::NoResponse => "no_response",
            EscalationTrigger::PriorityIncreased => "priority_increased",
        }
    }
}

/// One configured escalation rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRule {
    #[serde(flatten)]
    pub trigger: EscalationTrigger,

    /// Disabled rules are skipped without evaluation
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Who to notify when the rule fires
    #[serde(default)]
    pub targets: Vec<String>,

    /// Priority the caller should escalate to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority_override: Option<Priority>,
}

fn default_enabled() -> bool {
    true
}

impl EscalationRule {
    pub fn new(trigger: EscalationTrigger) -> Self {
        Self {
            trigger,
            enabled: true,
            targets: Vec::new(),
            priority_override: None,
        }
    }

    pub fn with_targets(mut self, targets: Vec<String>) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_priority_override(mut self, priority: Priority) -> Self {
        self.priority_override = Some(priority);
        self
    }
}

/// A rule that fired, with its configured follow-up.
#[derive(Debug, Clone, Serialize)]
pub struct EscalationDecision {
    pub trigger: EscalationTrigger,
    pub reason: String,
    pub targets: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority_override: Option<Priority>,
}

/// Evaluate every active rule against the record set and elapsed time.
pub fn evaluate(
    rules: &[EscalationRule],
    records: &[DeliveryRecord],
    priority: Priority,
    run_started_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Vec<EscalationDecision> {
    rules
        .iter()
        .filter(|rule| rule.enabled)
        .filter_map(|rule| {
            check_trigger(&rule.trigger, records, priority, run_started_at, now).map(|reason| {
                EscalationDecision {
                    trigger: rule.trigger.clone(),
                    reason,
                    targets: rule.targets.clone(),
                    priority_override: rule.priority_override,
                }
            })
        })
        .collect()
}

/// Returns the firing reason when the trigger condition holds.
fn check_trigger(
    trigger: &EscalationTrigger,
    records: &[DeliveryRecord],
    priority: Priority,
    run_started_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<String> {
    match trigger {
        EscalationTrigger::TimeElapsed { timeout_minutes } => {
            let elapsed_minutes = (now - run_started_at).num_minutes();
            if elapsed_minutes >= *timeout_minutes as i64 {
                Some(format!(
                    "{elapsed_minutes} minutes elapsed since the run started (timeout {timeout_minutes})"
                ))
            } else {
                None
            }
        }
        EscalationTrigger::DeliveryFailed => {
            if records.is_empty() {
                return None;
            }
            let failed = records.iter().filter(|r| r.status.is_failure_class()).count();
            let rate = failed as f64 / records.len() as f64;
            if rate > FAILURE_RATE_THRESHOLD {
                Some(format!(
                    "{failed} of {} deliveries failed ({:.0}%)",
                    records.len(),
                    rate * 100.0
                ))
            } else {
                None
            }
        }
        EscalationTrigger::NoResponse => {
            // An empty record set does not escalate: nothing was sent, so
            // there is no response to wait for.
            if records.is_empty() {
                return None;
            }
            if records.iter().any(|r| r.has_engagement()) {
                None
            } else {
                Some(format!(
                    "none of {} delivered notifications was read or clicked",
                    records.len()
                ))
            }
        }
        EscalationTrigger::PriorityIncreased => {
            if priority >= Priority::High {
                Some(format!("run priority is {priority:?}"))
            } else {
                None
            }
        }
    }
}
