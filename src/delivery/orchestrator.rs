//! Dispatch orchestration: fans out validated (recipient, channel) pairs,
//! drives the per-pair attempt/retry loop against the injected channel
//! sender, and shapes load through batches.
//!
//! Concurrency model: pairs within a batch run in parallel up to a bounded
//! window; attempts within one pair are strictly sequential; batches are
//! sequential with an inter-batch delay. The channel sender call is the only
//! I/O boundary and is wrapped in a per-attempt timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::time::timeout;
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditSink};
use crate::channel::{Channel, ChannelSender, SendOutcome, SendStatus};
use crate::metrics::DeliveryMetrics;
use crate::notification::{BatchOptions, RetryPolicy};
use crate::recipient::Recipient;
use crate::template::RenderedMessage;

use super::backoff::retry_delay;
use super::{DeliveryAttempt, DeliveryRecord, DeliveryStatus};

/// Engine-level dispatch tunables, sourced from [`crate::config::Settings`].
#[derive(Debug, Clone)]
pub struct DispatchLimits {
    /// Maximum pairs in flight at once within a batch
    pub max_concurrent_sends: usize,
    /// Overall per-attempt timeout; exceeding it counts as a transient failure
    pub delivery_timeout: Duration,
    /// Ceiling applied to computed retry delays
    pub max_retry_delay_ms: u64,
    /// Hard cap on attempts per pair regardless of the run's retry policy
    pub max_attempts_cap: u32,
}

impl Default for DispatchLimits {
    fn default() -> Self {
        Self {
            max_concurrent_sends: 64,
            delivery_timeout: Duration::from_secs(30),
            max_retry_delay_ms: 300_000,
            max_attempts_cap: 10,
        }
    }
}

/// Run-level cancellation signal.
///
/// Cancelling stops the scheduling of new attempts and batches immediately;
/// in-flight attempts complete and their outcome is still recorded, while
/// unstarted pairs are finalized `Cancelled`.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// One recipient with the channels they passed validation for.
#[derive(Debug, Clone)]
pub struct RecipientPlan {
    pub recipient: Recipient,
    pub channels: Vec<Channel>,
}

/// Drives the attempt/retry state machine for every validated pair.
pub struct Orchestrator {
    sender: Arc<dyn ChannelSender>,
    audit: Arc<dyn AuditSink>,
    limits: DispatchLimits,
}

impl Orchestrator {
    pub fn new(
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

    /// Dispatch all plans, honoring batching and cancellation, and return one
    /// closed record per pair.
    #[tracing::instrument(
        name = "orchestrator.dispatch",
        skip(self, plans, message, policy, batching, cancel),
        fields(run_id = %run_id, recipients = plans.len())
    )]
    pub async fn dispatch(
        &self,
        run_id: Uuid,
        plans: Vec<RecipientPlan>,
        message: &RenderedMessage,
        policy: &RetryPolicy,
        batching: Option<&BatchOptions>,
        cancel: &CancelToken,
    ) -> Vec<DeliveryRecord> {
        let batch_size = batching
            .map(|b| b.batch_size.max(1))
            .unwrap_or(plans.len().max(1));
        let interval = batching
            .map(|b| Duration::from_millis(b.batch_interval_ms))
            .unwrap_or(Duration::ZERO);

        let batches: Vec<Vec<RecipientPlan>> = plans
            .chunks(batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        let total_batches = batches.len();

        let mut records = Vec::new();
        let mut started_batches = 0usize;

        for (index, batch) in batches.into_iter().enumerate() {
            if cancel.is_cancelled() {
                records.extend(self.cancel_batch(run_id, batch).await);
                continue;
            }

            if started_batches > 0 && !interval.is_zero() {
                tokio::time::sleep(interval).await;
                if cancel.is_cancelled() {
                    records.extend(self.cancel_batch(run_id, batch).await);
                    continue;
                }
            }

            tracing::debug!(
                run_id = %run_id,
                batch = index + 1,
                total_batches,
                recipients = batch.len(),
                "Starting dispatch batch"
            );

            let batch_records = self.run_batch(run_id, batch, message, policy, cancel).await;
            records.extend(batch_records);
            started_batches += 1;
        }

        tracing::info!(
            run_id = %run_id,
            records = records.len(),
            batches = started_batches,
            cancelled = cancel.is_cancelled(),
            "Dispatch completed"
        );

        records
    }

    /// Run one batch to completion with bounded parallelism.
    async fn run_batch(
        &self,
        run_id: Uuid,
        plans: Vec<RecipientPlan>,
        message: &RenderedMessage,
        policy: &RetryPolicy,
        cancel: &CancelToken,
    ) -> Vec<DeliveryRecord> {
        let mut futures = FuturesUnordered::new();
        let mut records = Vec::new();
        let mut pending = 0usize;

        for plan in &plans {
            for &channel in &plan.channels {
                if cancel.is_cancelled() {
                    records
                        .push(self.cancel_pair(run_id, plan.recipient.id.clone(), channel).await);
                    continue;
                }

                futures.push(self.dispatch_pair(
                    run_id,
                    plan.recipient.clone(),
                    channel,
                    message,
                    policy,
                    cancel.clone(),
                ));
                pending += 1;

                // Keep at most max_concurrent_sends pairs in flight
                while pending >= self.limits.max_concurrent_sends {
                    if let Some(record) = futures.next().await {
                        pending -= 1;
                        records.push(record);
                    } else {
                        break;
                    }
                }
            }
        }

        while let Some(record) = futures.next().await {
            records.push(record);
        }

        records
    }

    /// Sequential attempt loop for one pair.
    async fn dispatch_pair(
        &self,
        run_id: Uuid,
        recipient: Recipient,
        channel: Channel,
        message: &RenderedMessage,
        policy: &RetryPolicy,
        cancel: CancelToken,
    ) -> DeliveryRecord {
        let mut record = DeliveryRecord::new(recipient.id.clone(), channel);
        record.begin_sending();

        let max_attempts = policy.max_attempts.min(self.limits.max_attempts_cap).max(1);
        let mut attempt_number = 1u32;

        loop {
            let outcome = self.attempt_send(&recipient, channel, message).await;

            let attempt_status = match outcome.status {
                SendStatus::Success => DeliveryStatus::Delivered,
                SendStatus::TransientFailure => DeliveryStatus::Failed,
                SendStatus::PermanentFailure => classify_permanent(outcome.error_code.as_deref()),
            };

            record.push_attempt(DeliveryAttempt {
                attempt_number,
                attempted_at: Utc::now(),
                status: attempt_status,
                error_code: outcome.error_code.clone(),
                error_message: outcome.error_message.clone(),
                response_time_ms: outcome.latency_ms,
                provider_ref: outcome.provider_ref.clone(),
                cost: outcome.cost,
            });

            DeliveryMetrics::record_attempt(channel, outcome.status);
            self.audit
                .record(AuditEvent::AttemptMade {
                    run_id,
                    recipient_id: recipient.id.clone(),
                    channel,
                    attempt_number,
                    status: attempt_status,
                    error_code: outcome.error_code.clone(),
                    at: Utc::now(),
                })
                .await;

            tracing::debug!(
                run_id = %run_id,
                recipient_id = %recipient.id,
                channel = %channel,
                attempt = attempt_number,
                status = %attempt_status,
                latency_ms = outcome.latency_ms,
                "Delivery attempt completed"
            );

            match outcome.status {
                SendStatus::Success => {
                    DeliveryMetrics::observe_delivery_latency(outcome.latency_ms);
                    record.finalize(DeliveryStatus::Delivered, Utc::now());
                    break;
                }
                SendStatus::PermanentFailure => {
                    record.finalize(attempt_status, Utc::now());
                    break;
                }
                SendStatus::TransientFailure => {
                    if attempt_number >= max_attempts || !policy.allows_retry_on(channel) {
                        tracing::warn!(
                            run_id = %run_id,
                            recipient_id = %recipient.id,
                            channel = %channel,
                            attempts = attempt_number,
                            error_code = outcome.error_code.as_deref().unwrap_or(""),
                            "Retries exhausted, pair failed"
                        );
                        record.finalize(DeliveryStatus::Failed, Utc::now());
                        break;
                    }

                    let delay = retry_delay(policy, attempt_number, self.limits.max_retry_delay_ms);
                    DeliveryMetrics::record_retry();
                    tokio::time::sleep(delay).await;

                    if cancel.is_cancelled() {
                        record.finalize(DeliveryStatus::Cancelled, Utc::now());
                        break;
                    }

                    attempt_number += 1;
                }
            }
        }

        self.finalize_audit(run_id, &record).await;
        record
    }

    /// One send through the injected sender, bounded by the attempt timeout.
    async fn attempt_send(
        &self,
        recipient: &Recipient,
        channel: Channel,
        message: &RenderedMessage,
    ) -> SendOutcome {
        match timeout(
            self.limits.delivery_timeout,
            self.sender.send(recipient, channel, message),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => SendOutcome::transient(
                self.limits.delivery_timeout.as_millis() as u64,
                "timeout",
                "delivery attempt exceeded the configured timeout",
            ),
        }
    }

    async fn cancel_batch(&self, run_id: Uuid, plans: Vec<RecipientPlan>) -> Vec<DeliveryRecord> {
        let mut records = Vec::new();
        for plan in plans {
            for channel in plan.channels {
                records
                    .push(self.cancel_pair(run_id, plan.recipient.id.clone(), channel).await);
            }
        }
        records
    }

    async fn cancel_pair(
        &self,
        run_id: Uuid,
        recipient_id: String,
        channel: Channel,
    ) -> DeliveryRecord {
        let record = DeliveryRecord::cancelled(recipient_id, channel, Utc::now());
        self.finalize_audit(run_id, &record).await;
        record
    }

    async fn finalize_audit(&self, run_id: Uuid, record: &DeliveryRecord) {
        DeliveryMetrics::record_finalized(record.status);
        self.audit
            .record(AuditEvent::PairFinalized {
                run_id,
                recipient_id: record.recipient_id.clone(),
                channel: record.channel,
                status: record.status,
                attempts: record.attempts.len(),
                elapsed_ms: record.elapsed_ms,
                at: Utc::now(),
            })
            .await;
    }
}

/// Map a permanent failure's error code to its terminal state.
fn classify_permanent(code: Option<&str>) -> DeliveryStatus {
    match code {
        Some("hard_bounce") => DeliveryStatus::Bounced,
        Some("blocked") | Some("suppressed") => DeliveryStatus::Blocked,
        Some("spam") | Some("spam_report") => DeliveryStatus::Spam,
        _ => DeliveryStatus::Failed,
    }
}
