//! Per-run configuration and result types.

mod types;

pub use types::{
    BatchOptions, ComplianceSettings, NotificationConfiguration, NotificationResult, Priority,
    RetryPolicy, RunError, ValidationMode,
};
