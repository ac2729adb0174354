//! Structured audit events.
//!
//! The engine emits one event per state transition; persisting them is the
//! caller's responsibility via an injected [`AuditSink`]. The engine itself
//! holds no durable store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::channel::Channel;
use crate::delivery::DeliveryStatus;

/// One state transition inside a run.
///
/// Sensitive template variable values never appear in events; only variable
/// names are carried.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    TemplateResolved {
        run_id: Uuid,
        template_id: String,
        resolved_count: usize,
        missing_variables: Vec<String>,
        at: DateTime<Utc>,
    },
    ValidationRejected {
        run_id: Uuid,
        recipient_id: String,
        channel: Channel,
        reason: String,
        at: DateTime<Utc>,
    },
    AttemptMade {
        run_id: Uuid,
        recipient_id: String,
        channel: Channel,
        attempt_number: u32,
        status: DeliveryStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<String>,
        at: DateTime<Utc>,
    },
    PairFinalized {
        run_id: Uuid,
        recipient_id: String,
        channel: Channel,
        status: DeliveryStatus,
        attempts: usize,
        elapsed_ms: u64,
        at: DateTime<Utc>,
    },
    EscalationFired {
        run_id: Uuid,
        trigger: String,
        reason: String,
        targets: Vec<String>,
        at: DateTime<Utc>,
    },
    AnalyticsComputed {
        run_id: Uuid,
        sent: u64,
        delivered: u64,
        failed: u64,
        at: DateTime<Utc>,
    },
    RunCompleted {
        run_id: Uuid,
        success: bool,
        records: usize,
        at: DateTime<Utc>,
    },
}

impl AuditEvent {
    /// The run this event belongs to.
    pub fn run_id(&self) -> Uuid {
        match self {
            AuditEvent::TemplateResolved { run_id, .. }
            | AuditEvent::ValidationRejected { run_id, .. }
            | AuditEvent::AttemptMade { run_id, .. }
            | AuditEvent::PairFinalized { run_id, .. }
            | AuditEvent::EscalationFired { run_id, .. }
            | AuditEvent::AnalyticsComputed { run_id, .. }
            | AuditEvent::RunCompleted { run_id, .. } => *run_id,
        }
    }
}

/// Collaborator that receives audit events as they happen.
///
/// Implementations must not block for long; the orchestrator awaits each
/// record call on the dispatch path.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent);
}

/// Sink that drops every event. Default when the caller wires no audit.
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn record(&self, _event: AuditEvent) {}
}

/// In-memory sink grouping events per run. Intended for tests and for hosts
/// that flush events to durable storage after a run completes.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: DashMap<Uuid, Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events recorded for a run, in arrival order.
    pub fn events_for(&self, run_id: Uuid) -> Vec<AuditEvent> {
        self.events
            .get(&run_id)
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    /// Total events across all runs.
    pub fn total_events(&self) -> usize {
        self.events.iter().map(|e| e.len()).sum()
    }

    /// Drop all events for a run, returning them.
    pub fn drain_run(&self, run_id: Uuid) -> Vec<AuditEvent> {
        self.events
            .remove(&run_id)
            .map(|(_, events)| events)
            .unwrap_or_default()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: AuditEvent) {
        self.events.entry(event.run_id()).or_default().push(event);
    }
}
