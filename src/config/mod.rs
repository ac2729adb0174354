mod settings;

pub use settings::{EngineConfig, OtelConfig, Settings};
