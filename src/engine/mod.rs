//! The engine facade: one entry point per notification run.
//!
//! `process` validates the configuration once at the boundary, renders the
//! template, fans out dispatch through the orchestrator, evaluates escalation
//! rules and aggregates analytics, returning everything as one result value.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::analytics;
use crate::audit::{AuditEvent, AuditSink, NoopAuditSink};
use crate::channel::{Channel, ChannelSender};
use crate::config::Settings;
use crate::delivery::{CancelToken, DispatchLimits, Orchestrator, RecipientPlan};
use crate::error::{EngineError, Result};
use crate::escalation;
use crate::metrics::DeliveryMetrics;
use crate::notification::{NotificationConfiguration, NotificationResult, RunError};
use crate::recipient;
use crate::template;

/// Multi-channel notification delivery and escalation engine.
///
/// Stateless between runs: every run is a pure function of the supplied
/// configuration, the runtime variables and the injected channel sender.
pub struct Engine {
    sender: Arc<dyn ChannelSender>,
    audit: Arc<dyn AuditSink>,
    limits: DispatchLimits,
}

impl Engine {
    /// Create an engine without audit wiring.
    pub fn new(sender: Arc<dyn ChannelSender>) -> Self {
        Self {
            sender,
            audit: Arc::new(NoopAuditSink),
            limits: DispatchLimits::default(),
        }
    }

    /// Create an engine that reports audit events to the given sink.
    pub fn with_audit(sender: Arc<dyn ChannelSender>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            sender,
            audit,
            limits: DispatchLimits::default(),
        }
    }

    /// Create an engine with full wiring from loaded settings.
    pub fn with_settings(
        sender: Arc<dyn ChannelSender>,
        audit: Arc<dyn AuditSink>,
        settings: &Settings,
    ) -> Self {
        Self {
            sender,
            audit,
            limits: settings.engine.dispatch_limits(),
        }
    }

    /// Create an engine with explicit dispatch limits.
    pub fn with_limits(
        sender: Arc<dyn ChannelSender>,
        audit: Arc<dyn AuditSink>,
        limits: DispatchLimits,
    ) -> Self {
        Self {
            sender,
            audit,
            limits,
        }
    }

    /// Process one notification run to completion.
    pub async fn process(
        &self,
        config: NotificationConfiguration,
        variables: HashMap<String, Value>,
    ) -> Result<NotificationResult> {
        self.process_with_cancel(config, variables, &CancelToken::new())
            .await
    }

    /// Process one notification run, observing an external cancellation
    /// signal. Cancelling stops new attempts and batches immediately;
    /// in-flight attempts complete and unstarted pairs finalize `CANCELLED`.
    #[tracing::instrument(
        name = "engine.process",
        skip(self, config, variables),
        fields(
            config_id = %config.id,
            channels = config.channels.len(),
            recipients = config.recipients.len(),
            priority = ?config.priority
        )
    )]
    pub async fn process_with_cancel(
        &self,
        config: NotificationConfiguration,
        variables: HashMap<String, Value>,
        cancel: &CancelToken,
    ) -> Result<NotificationResult> {
        validate_config(&config)?;
        config.template.validate()?;

        DeliveryMetrics::record_run();
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        // Template syntax errors abort here, before any dispatch attempt.
        let rendered = template::resolve(&config.template, &variables)?;
        self.audit
            .record(AuditEvent::TemplateResolved {
                run_id,
                template_id: config.template.id.clone(),
                resolved_count: rendered.resolved_count,
                missing_variables: rendered.missing_variables.clone(),
                at: Utc::now(),
            })
            .await;

        tracing::info!(
            run_id = %run_id,
            template_id = %config.template.id,
            resolved = rendered.resolved_count,
            missing = rendered.missing_variables.len(),
            "Template resolved"
        );

        let channels = dedup_channels(&config.channels);
        let mut errors = Vec::new();
        let plans = self
            .validate_recipients(run_id, &config, &channels, &mut errors)
            .await;

        let records = Orchestrator::new(self.sender.clone(), self.audit.clone(), self.limits.clone())
            .dispatch(
                run_id,
                plans,
                &rendered,
                &config.retry_policy,
                config.batching.as_ref(),
                cancel,
            )
            .await;

        let finished_at = Utc::now();

        let escalation_decisions = escalation::evaluate(
            &config.escalation_rules,
            &records,
            config.priority,
            started_at,
            finished_at,
        );
        for decision in &escalation_decisions {
            DeliveryMetrics::record_escalation(decision.trigger.as_str());
            self.audit
                .record(AuditEvent::EscalationFired {
                    run_id,
                    trigger: decision.trigger.as_str().to_string(),
                    reason: decision.reason.clone(),
                    targets: decision.targets.clone(),
                    at: Utc::now(),
                })
                .await;
            tracing::warn!(
                run_id = %run_id,
                trigger = decision.trigger.as_str(),
                reason = %decision.reason,
                "Escalation fired"
            );
        }

        let snapshot = analytics::aggregate(&records, started_at, finished_at);
        self.audit
            .record(AuditEvent::AnalyticsComputed {
                run_id,
                sent: snapshot.sent,
                delivered: snapshot.delivered,
                failed: snapshot.failed,
                at: Utc::now(),
            })
            .await;

        let success = records.iter().any(|r| r.status.is_delivered_class());
        self.audit
            .record(AuditEvent::RunCompleted {
                run_id,
                success,
                records: records.len(),
                at: Utc::now(),
            })
            .await;

        tracing::info!(
            run_id = %run_id,
            success,
            records = records.len(),
            delivered = snapshot.delivered,
            escalations = escalation_decisions.len(),
            "Run completed"
        );

        Ok(NotificationResult {
            run_id,
            success,
            delivery_records: records,
            escalation_decisions,
            analytics: Some(snapshot),
            missing_variables: rendered.missing_variables,
            errors,
            started_at,
            finished_at,
        })
    }

    /// Build per-recipient dispatch plans, excluding invalid pairs and
    /// recipients with no usable channel at all.
    async fn validate_recipients(
        &self,
        run_id: Uuid,
        config: &NotificationConfiguration,
        channels: &[Channel],
        errors: &mut Vec<RunError>,
    ) -> Vec<RecipientPlan> {
        let mut plans = Vec::with_capacity(config.recipients.len());

        for recipient in &config.recipients {
            let mut valid_channels = Vec::new();

            for &channel in channels {
                let outcome = recipient::validate(recipient, channel, &config.compliance);

                if outcome.is_valid {
                    if outcome.consent_flagged {
                        errors.push(RunError::for_pair(
                            "consent_flagged",
                            outcome
                                .reason
                                .clone()
                                .unwrap_or_else(|| "consent missing".to_string()),
                            recipient.id.clone(),
                            channel,
                        ));
                    }
                    valid_channels.push(channel);
                } else {
                    let reason = outcome
                        .reason
                        .unwrap_or_else(|| "validation failed".to_string());
                    DeliveryMetrics::record_validation_rejected();
                    self.audit
                        .record(AuditEvent::ValidationRejected {
                            run_id,
                            recipient_id: recipient.id.clone(),
                            channel,
                            reason: reason.clone(),
                            at: Utc::now(),
                        })
                        .await;
                    errors.push(RunError::for_pair(
                        "validation_failed",
                        reason,
                        recipient.id.clone(),
                        channel,
                    ));
                }
            }

            if valid_channels.is_empty() {
                tracing::warn!(
                    run_id = %run_id,
                    recipient_id = %recipient.id,
                    "Recipient excluded: no usable contact method for any configured channel"
                );
                errors.push(RunError::for_recipient(
                    "no_usable_channel",
                    "no contact method usable by any configured channel",
                    recipient.id.clone(),
                ));
                continue;
            }

            plans.push(RecipientPlan {
                recipient: recipient.clone(),
                channels: valid_channels,
            });
        }

        plans
    }
}

/// Entry-boundary configuration checks. Failures here are non-retryable and
/// abort the run before any dispatch attempt.
fn validate_config(config: &NotificationConfiguration) -> Result<()> {
    if config.channels.is_empty() {
        return Err(EngineError::Config(
            "configuration declares no channels".to_string(),
        ));
    }
    if config.recipients.is_empty() {
        return Err(EngineError::Config(
            "configuration declares no recipients".to_string(),
        ));
    }
    if config.retry_policy.max_attempts == 0 {
        return Err(EngineError::Config(
            "retry policy must allow at least one attempt".to_string(),
        ));
    }
    if let Some(batching) = &config.batching {
        if batching.batch_size == 0 {
            return Err(EngineError::Config(
                "batch size must be at least 1".to_string(),
            ));
        }
    }
    Ok(())
}

fn dedup_channels(channels: &[Channel]) -> Vec<Channel> {
    let mut seen = Vec::with_capacity(channels.len());
    for &channel in channels {
        if !seen.contains(&channel) {
            seen.push(channel);
        }
    }
    seen
}
