use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::delivery::DispatchLimits;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

/// Engine-wide dispatch tunables. Per-run behavior (retry policy, batching,
/// escalation) comes from the caller's configuration instead.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Maximum pairs in flight at once within a batch
    #[serde(default = "default_max_concurrent_sends")]
    pub max_concurrent_sends: usize,
    /// Overall per-attempt timeout in milliseconds
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,
    /// Ceiling applied to computed retry delays in milliseconds
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    /// Hard cap on attempts per pair
    #[serde(default = "default_max_attempts_cap")]
    pub max_attempts_cap: u32,
}

fn default_max_concurrent_sends() -> usize {
    64
}

fn default_delivery_timeout_ms() -> u64 {
    30_000 // 30 seconds
}

fn default_max_retry_delay_ms() -> u64 {
    300_000 // 5 minutes
}

fn default_max_attempts_cap() -> u32 {
    10
}

/// OpenTelemetry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    /// Enable OpenTelemetry tracing
    #[serde(default)]
    pub enabled: bool,
    /// OTLP gRPC endpoint
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    /// Service name in traces
    #[serde(default = "default_otel_service_name")]
    pub service_name: String,
    /// Trace sampling ratio (0.0-1.0)
    #[serde(default = "default_otel_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_service_name() -> String {
    "courier-engine".to_string()
}

fn default_otel_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("engine.max_concurrent_sends", 64)?
            .set_default("engine.delivery_timeout_ms", 30_000)?
            .set_default("engine.max_retry_delay_ms", 300_000)?
            .set_default("engine.max_attempts_cap", 10)?
            .set_default("otel.enabled", false)?
            .set_default("otel.endpoint", "http://localhost:4317")?
            .set_default("otel.service_name", "courier-engine")?
            .set_default("otel.sampling_ratio", 1.0)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // ENGINE_MAX_CONCURRENT_SENDS, OTEL_ENABLED, etc.
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }
}

impl EngineConfig {
    /// View as orchestrator limits.
    pub fn dispatch_limits(&self) -> DispatchLimits {
        DispatchLimits {
            max_concurrent_sends: self.max_concurrent_sends.max(1),
            delivery_timeout: Duration::from_millis(self.delivery_timeout_ms),
            max_retry_delay_ms: self.max_retry_delay_ms,
            max_attempts_cap: self.max_attempts_cap.max(1),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sends: default_max_concurrent_sends(),
            delivery_timeout_ms: default_delivery_timeout_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            max_attempts_cap: default_max_attempts_cap(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_otel_service_name(),
            sampling_ratio: default_otel_sampling_ratio(),
        }
    }
}
