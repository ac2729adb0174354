//! End-to-end engine tests.
//!
//! These drive `Engine::process` against scripted channel senders, covering
//! the full pipeline: template resolution, validation, dispatch with retries,
//! escalation evaluation and analytics aggregation. No real provider is
//! involved; the sender mocks script every outcome.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use courier_engine::analytics;
use courier_engine::audit::{AuditEvent, MemoryAuditSink};
use courier_engine::channel::{Channel, ChannelSender, SendOutcome};
use courier_engine::delivery::{CancelToken, DeliveryStatus, Engagement};
use courier_engine::engine::Engine;
use courier_engine::error::EngineError;
use courier_engine::escalation::{EscalationRule, EscalationTrigger};
use courier_engine::notification::{
    BatchOptions, ComplianceSettings, NotificationConfiguration, Priority, RetryPolicy,
    ValidationMode,
};
use courier_engine::recipient::Recipient;
use courier_engine::template::{RenderedMessage, Template};

// =============================================================================
// Scripted channel senders
// =============================================================================

/// Succeeds every send with a fixed latency and cost.
struct AlwaysDelivers;

#[async_trait]
impl ChannelSender for AlwaysDelivers {
    async fn send(
        &self,
        _recipient: &Recipient,
        _channel: Channel,
        _message: &RenderedMessage,
    ) -> SendOutcome {
        SendOutcome::success(20).with_provider_ref("ok").with_cost(0.005)
    }
}

/// Fails every send transiently, counting calls.
struct AlwaysTransient {
    calls: AtomicU32,
}

impl AlwaysTransient {
    fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ChannelSender for AlwaysTransient {
    async fn send(
        &self,
        _recipient: &Recipient,
        _channel: Channel,
        _message: &RenderedMessage,
    ) -> SendOutcome {
        self.calls.fetch_add(1, Ordering::Relaxed);
        SendOutcome::transient(5, "provider_unavailable", "simulated outage")
    }
}

/// Returns a scripted outcome per recipient ID, succeeding by default.
struct ScriptedSender {
    by_recipient: HashMap<String, SendOutcome>,
}

#[async_trait]
impl ChannelSender for ScriptedSender {
    async fn send(
        &self,
        recipient: &Recipient,
        _channel: Channel,
        _message: &RenderedMessage,
    ) -> SendOutcome {
        self.by_recipient
            .get(&recipient.id)
            .cloned()
            .unwrap_or_else(|| SendOutcome::success(10))
    }
}

/// Captures every rendered message it is asked to send.
struct CapturingSender {
    messages: Mutex<Vec<RenderedMessage>>,
}

impl CapturingSender {
    fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ChannelSender for CapturingSender {
    async fn send(
        &self,
        _recipient: &Recipient,
        _channel: Channel,
        message: &RenderedMessage,
    ) -> SendOutcome {
        self.messages.lock().unwrap().push(message.clone());
        SendOutcome::success(10)
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn order_template() -> Template {
    Template {
        id: "order-ready".to_string(),
        channel_affinity: None,
        subject: "Order update".to_string(),
        body: "Hi {{name}}, order {{orderId}} ready".to_string(),
        html_body: None,
        variables: vec![],
    }
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        retry_delay_ms: 10,
        exponential_backoff: false,
        retry_channels: Vec::new(),
        jitter_factor: 0.0,
    }
}

fn config_with(recipients: Vec<Recipient>, channels: Vec<Channel>) -> NotificationConfiguration {
    NotificationConfiguration {
        id: "cfg-test".to_string(),
        version: 1,
        channels,
        template: order_template(),
        recipients,
        priority: Priority::Normal,
        retry_policy: fast_retry(3),
        escalation_rules: vec![],
        batching: None,
        compliance: ComplianceSettings::default(),
    }
}

fn email_recipient(id: &str) -> Recipient {
    Recipient::new(id).with_email(format!("{id}@example.com"))
}

fn full_variables() -> HashMap<String, serde_json::Value> {
    HashMap::from([
        ("name".to_string(), json!("Ann")),
        ("orderId".to_string(), json!("ORD-7")),
    ])
}

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test]
async fn test_multi_channel_happy_path() {
    let audit = Arc::new(MemoryAuditSink::new());
    let engine = Engine::with_audit(Arc::new(AlwaysDelivers), audit.clone());

    let recipients = vec![
        email_recipient("r1").with_phone("+15551230001"),
        email_recipient("r2").with_phone("+15551230002"),
    ];
    let config = config_with(recipients, vec![Channel::Email, Channel::Sms]);

    let result = engine.process(config, full_variables()).await.unwrap();

    assert!(result.success);
    assert_eq!(result.delivery_records.len(), 4);
    assert!(result
        .delivery_records
        .iter()
        .all(|r| r.status == DeliveryStatus::Delivered));
    assert!(result.missing_variables.is_empty());
    assert!(result.errors.is_empty());

    let analytics = result.analytics.unwrap();
    assert_eq!(analytics.sent, 4);
    assert_eq!(analytics.delivered, 4);
    assert_eq!(analytics.delivery_rate, 100.0);
    assert_eq!(analytics.by_channel.len(), 2);
    assert!((analytics.total_cost - 0.02).abs() < 1e-9);

    // Audit trail brackets the run and records every attempt.
    let events = audit.events_for(result.run_id);
    assert!(matches!(events.first(), Some(AuditEvent::TemplateResolved { .. })));
    assert!(matches!(events.last(), Some(AuditEvent::RunCompleted { .. })));
    let attempts = events
        .iter()
        .filter(|e| matches!(e, AuditEvent::AttemptMade { .. }))
        .count();
    assert_eq!(attempts, 4);
    let finalized = events
        .iter()
        .filter(|e| matches!(e, AuditEvent::PairFinalized { .. }))
        .count();
    assert_eq!(finalized, 4);
}

#[tokio::test]
async fn test_missing_variable_scenario() {
    let sender = Arc::new(CapturingSender::new());
    let engine = Engine::new(sender.clone());

    let config = config_with(vec![email_recipient("r1")], vec![Channel::Email]);
    let variables = HashMap::from([("name".to_string(), json!("Ann"))]);

    let result = engine.process(config, variables).await.unwrap();

    assert_eq!(result.missing_variables, vec!["orderId".to_string()]);

    let messages = sender.messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    // The unresolved placeholder stays visible in the dispatched body.
    assert_eq!(messages[0].body, "Hi Ann, order {{orderId}} ready");
    assert_eq!(messages[0].resolved_count, 1);
}

// =============================================================================
// Configuration-class failures
// =============================================================================

#[tokio::test]
async fn test_nested_placeholder_aborts_before_dispatch() {
    let sender = Arc::new(AlwaysTransient::new());
    let engine = Engine::new(sender.clone());

    let mut config = config_with(vec![email_recipient("r1")], vec![Channel::Email]);
    config.template.body = "broken {{outer{{inner}}}}".to_string();

    let err = engine.process(config, HashMap::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::Template(_)));
    // No dispatch attempt was made.
    assert_eq!(sender.calls.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn test_missing_recipients_is_config_error() {
    let engine = Engine::new(Arc::new(AlwaysDelivers));
    let config = config_with(vec![], vec![Channel::Email]);

    let err = engine.process(config, HashMap::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}

// =============================================================================
// Validation
// =============================================================================

#[tokio::test]
async fn test_opt_out_excludes_pair_but_run_continues() {
    let engine = Engine::new(Arc::new(AlwaysDelivers));

    let recipients = vec![
        email_recipient("r1"),
        email_recipient("r-optout").opted_out(),
    ];
    let config = config_with(recipients, vec![Channel::Email]);

    let result = engine.process(config, full_variables()).await.unwrap();

    assert!(result.success);
    assert_eq!(result.delivery_records.len(), 1);
    assert_eq!(result.delivery_records[0].recipient_id, "r1");

    let opt_out_errors: Vec<_> = result
        .errors
        .iter()
        .filter(|e| e.recipient_id.as_deref() == Some("r-optout"))
        .collect();
    assert!(opt_out_errors
        .iter()
        .any(|e| e.code == "validation_failed"));
    assert!(opt_out_errors.iter().any(|e| e.code == "no_usable_channel"));
}

#[tokio::test]
async fn test_consent_strict_excludes_lenient_flags() {
    let engine = Engine::new(Arc::new(AlwaysDelivers));

    let mut strict = config_with(vec![email_recipient("r1")], vec![Channel::Email]);
    strict.compliance = ComplianceSettings {
        require_consent: true,
        validation_mode: ValidationMode::Strict,
    };
    let result = engine.process(strict, full_variables()).await.unwrap();
    assert!(!result.success);
    assert!(result.delivery_records.is_empty());

    let engine = Engine::new(Arc::new(AlwaysDelivers));
    let mut lenient = config_with(vec![email_recipient("r1")], vec![Channel::Email]);
    lenient.compliance = ComplianceSettings {
        require_consent: true,
        validation_mode: ValidationMode::Lenient,
    };
    let result = engine.process(lenient, full_variables()).await.unwrap();
    assert!(result.success);
    assert_eq!(result.delivery_records.len(), 1);
    assert!(result.errors.iter().any(|e| e.code == "consent_flagged"));
}

// =============================================================================
// Retry behavior
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_retry_exhaustion_records_every_attempt() {
    let sender = Arc::new(AlwaysTransient::new());
    let engine = Engine::new(sender.clone());

    let mut config = config_with(vec![email_recipient("r1")], vec![Channel::Email]);
    config.retry_policy = fast_retry(3);

    let result = engine.process(config, full_variables()).await.unwrap();

    assert!(!result.success);
    let record = &result.delivery_records[0];
    assert_eq!(record.status, DeliveryStatus::Failed);
    assert_eq!(record.attempts.len(), 3);
    assert_eq!(sender.calls.load(Ordering::Relaxed), 3);
    assert_eq!(
        record.last_error(),
        Some(("provider_unavailable", "simulated outage"))
    );
}

#[tokio::test(start_paused = true)]
async fn test_exponential_backoff_timing() {
    let engine = Engine::new(Arc::new(AlwaysTransient::new()));

    let mut config = config_with(vec![email_recipient("r1")], vec![Channel::Email]);
    config.retry_policy = RetryPolicy {
        max_attempts: 3,
        retry_delay_ms: 300,
        exponential_backoff: true,
        retry_channels: Vec::new(),
        jitter_factor: 0.0,
    };

    let start = tokio::time::Instant::now();
    let result = engine.process(config, full_variables()).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(result.delivery_records[0].attempts.len(), 3);
    // Delays of 300ms then 600ms separate the three attempts.
    assert!(elapsed >= Duration::from_millis(900), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1500), "elapsed {elapsed:?}");
}

// =============================================================================
// Batching
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_batch_shaping_250_recipients() {
    let engine = Engine::new(Arc::new(AlwaysDelivers));

    let recipients: Vec<Recipient> = (0..250).map(|i| email_recipient(&format!("r{i}"))).collect();
    let mut config = config_with(recipients, vec![Channel::Email]);
    config.batching = Some(BatchOptions {
        batch_size: 100,
        batch_interval_ms: 1_000,
    });

    let start = tokio::time::Instant::now();
    let result = engine.process(config, full_variables()).await.unwrap();
    let elapsed = start.elapsed();

    // 3 batches of 100/100/50, all delivered.
    assert_eq!(result.delivery_records.len(), 250);
    assert!(result
        .delivery_records
        .iter()
        .all(|r| r.status == DeliveryStatus::Delivered));
    // Two inter-batch delays separate the three batches.
    assert!(elapsed >= Duration::from_millis(2_000), "elapsed {elapsed:?}");
}

// =============================================================================
// Escalation
// =============================================================================

#[tokio::test]
async fn test_delivery_failed_escalation_fires_at_two_thirds() {
    let sender = ScriptedSender {
        by_recipient: HashMap::from([
            (
                "r1".to_string(),
                SendOutcome::permanent(5, "hard_bounce", "mailbox full"),
            ),
            (
                "r2".to_string(),
                SendOutcome::permanent(5, "hard_bounce", "mailbox full"),
            ),
        ]),
    };
    let engine = Engine::new(Arc::new(sender));

    let recipients = vec![
        email_recipient("r1"),
        email_recipient("r2"),
        email_recipient("r3"),
    ];
    let mut config = config_with(recipients, vec![Channel::Email]);
    config.escalation_rules = vec![EscalationRule::new(EscalationTrigger::DeliveryFailed)
        .with_targets(vec!["oncall@example.com".to_string()])
        .with_priority_override(Priority::Critical)];

    let result = engine.process(config, full_variables()).await.unwrap();

    assert_eq!(result.escalation_decisions.len(), 1);
    let decision = &result.escalation_decisions[0];
    assert_eq!(decision.trigger, EscalationTrigger::DeliveryFailed);
    assert_eq!(decision.targets, vec!["oncall@example.com".to_string()]);
    assert_eq!(decision.priority_override, Some(Priority::Critical));
}

#[tokio::test]
async fn test_delivery_failed_quiet_at_one_third() {
    let sender = ScriptedSender {
        by_recipient: HashMap::from([(
            "r1".to_string(),
            SendOutcome::permanent(5, "hard_bounce", "mailbox full"),
        )]),
    };
    let engine = Engine::new(Arc::new(sender));

    let recipients = vec![
        email_recipient("r1"),
        email_recipient("r2"),
        email_recipient("r3"),
    ];
    let mut config = config_with(recipients, vec![Channel::Email]);
    config.escalation_rules = vec![EscalationRule::new(EscalationTrigger::DeliveryFailed)];

    let result = engine.process(config, full_variables()).await.unwrap();
    assert!(result.escalation_decisions.is_empty());
}

#[tokio::test]
async fn test_no_response_and_priority_escalations() {
    let engine = Engine::new(Arc::new(AlwaysDelivers));

    let mut config = config_with(vec![email_recipient("r1")], vec![Channel::Email]);
    config.priority = Priority::High;
    config.escalation_rules = vec![
        EscalationRule::new(EscalationTrigger::NoResponse),
        EscalationRule::new(EscalationTrigger::PriorityIncreased),
        EscalationRule::new(EscalationTrigger::TimeElapsed { timeout_minutes: 60 }),
    ];

    let result = engine.process(config, full_variables()).await.unwrap();

    // Delivered but never read: NoResponse fires. High priority fires.
    // The one-hour timeout does not.
    let triggers: Vec<&str> = result
        .escalation_decisions
        .iter()
        .map(|d| d.trigger.as_str())
        .collect();
    assert_eq!(triggers, vec!["no_response", "priority_increased"]);
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_cancellation_before_dispatch() {
    let sender = Arc::new(AlwaysTransient::new());
    let engine = Engine::new(sender.clone());

    let config = config_with(
        vec![email_recipient("r1"), email_recipient("r2")],
        vec![Channel::Email],
    );

    let cancel = CancelToken::new();
    cancel.cancel();

    let result = engine
        .process_with_cancel(config, full_variables(), &cancel)
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.delivery_records.len(), 2);
    assert!(result
        .delivery_records
        .iter()
        .all(|r| r.status == DeliveryStatus::Cancelled));
    assert_eq!(sender.calls.load(Ordering::Relaxed), 0);
}

// =============================================================================
// Analytics
// =============================================================================

#[tokio::test]
async fn test_all_failed_run_has_zero_rates() {
    let sender = ScriptedSender {
        by_recipient: HashMap::from([(
            "r1".to_string(),
            SendOutcome::permanent(5, "invalid_recipient", "unknown address"),
        )]),
    };
    let engine = Engine::new(Arc::new(sender));

    let config = config_with(vec![email_recipient("r1")], vec![Channel::Email]);
    let result = engine.process(config, full_variables()).await.unwrap();

    let analytics = result.analytics.unwrap();
    assert_eq!(analytics.sent, 1);
    assert_eq!(analytics.delivered, 0);
    assert_eq!(analytics.delivery_rate, 0.0);
    assert_eq!(analytics.open_rate, 0.0);
    assert_eq!(analytics.click_rate, 0.0);
    assert_eq!(analytics.conversion_rate, 0.0);
    assert_eq!(analytics.average_delivery_time_ms, 0.0);
}

#[tokio::test]
async fn test_engagement_feeds_reaggregation() {
    let engine = Engine::new(Arc::new(AlwaysDelivers));

    let config = config_with(vec![email_recipient("r1")], vec![Channel::Email]);
    let mut result = engine.process(config, full_variables()).await.unwrap();

    // A later engagement event advances the record; re-aggregation picks it up.
    let record = &mut result.delivery_records[0];
    record
        .record_engagement(Engagement::Read, chrono::Utc::now())
        .unwrap();
    record
        .record_engagement(Engagement::Clicked, chrono::Utc::now())
        .unwrap();

    let snapshot = analytics::aggregate(
        &result.delivery_records,
        result.started_at,
        chrono::Utc::now(),
    );

    assert_eq!(snapshot.opened, 1);
    assert_eq!(snapshot.clicked, 1);
    assert_eq!(snapshot.open_rate, 100.0);
    assert_eq!(snapshot.click_rate, 100.0);
}
