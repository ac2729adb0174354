use thiserror::Error;

use crate::template::TemplateError;

/// Top-level engine error.
///
/// Only configuration-class problems surface here: they abort a run before any
/// dispatch attempt. Per-pair validation and delivery failures are recorded
/// inside the run result instead, so one bad recipient never aborts the rest.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
