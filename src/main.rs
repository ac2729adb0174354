use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use courier_engine::audit::MemoryAuditSink;
use courier_engine::channel::{Channel, ChannelSender, SendOutcome};
use courier_engine::config::Settings;
use courier_engine::engine::Engine;
use courier_engine::metrics::encode_metrics;
use courier_engine::notification::{NotificationConfiguration, Priority, RetryPolicy};
use courier_engine::recipient::Recipient;
use courier_engine::telemetry;
use courier_engine::template::Template;

/// Stand-in sender for the demo run; real deployments inject a provider
/// adapter instead.
struct EchoSender;

#[async_trait]
impl ChannelSender for EchoSender {
    async fn send(
        &self,
        recipient: &Recipient,
        channel: Channel,
        _message: &courier_engine::template::RenderedMessage,
    ) -> SendOutcome {
        tracing::debug!(recipient_id = %recipient.id, channel = %channel, "Echo send");
        SendOutcome::success(12)
            .with_provider_ref(format!("echo-{}-{}", recipient.id, channel))
            .with_cost(0.0001)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration and initialize tracing (with optional OTLP export)
    let settings = Settings::new()?;
    let _telemetry_guard = telemetry::init_telemetry(&settings.otel)?;
    tracing::info!("Configuration loaded");

    let audit = Arc::new(MemoryAuditSink::new());
    let engine = Engine::with_settings(Arc::new(EchoSender), audit.clone(), &settings);

    let config = NotificationConfiguration {
        id: "demo-order-shipped".to_string(),
        version: 1,
        channels: vec![Channel::Email, Channel::Sms],
        template: Template {
            id: "order-shipped".to_string(),
            channel_affinity: None,
            subject: "Order {{orderId}} shipped".to_string(),
            body: "Hi {{name}}, your order {{orderId}} shipped on {{date:shippedAt}}."
                .to_string(),
            html_body: None,
            variables: vec![],
        },
        recipients: vec![
            Recipient::new("r-1")
                .with_email("ann@example.com")
                .with_phone("+15551230001"),
            Recipient::new("r-2")
                .with_email("ben@example.com")
                .with_phone("+15551230002"),
        ],
        priority: Priority::Normal,
        retry_policy: RetryPolicy::default(),
        escalation_rules: vec![],
        batching: None,
        compliance: Default::default(),
    };

    let variables = HashMap::from([
        ("name".to_string(), json!("Ann")),
        ("orderId".to_string(), json!("ORD-1042")),
        ("shippedAt".to_string(), json!("2026-03-04T15:30:00Z")),
    ]);

    let result = engine.process(config, variables).await?;

    tracing::info!(
        run_id = %result.run_id,
        success = result.success,
        records = result.delivery_records.len(),
        audit_events = audit.total_events(),
        "Demo run finished"
    );
    println!("{}", serde_json::to_string_pretty(&result)?);

    if let Ok(metrics) = encode_metrics() {
        tracing::debug!(bytes = metrics.len(), "Prometheus metrics encoded");
    }

    Ok(())
}
