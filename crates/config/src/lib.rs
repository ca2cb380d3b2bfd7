//! Configuration for the call agent
//!
//! Layered settings (files + environment) via the `config` crate, plus the
//! per-tenant call behavior configuration consumed by the session layer.

pub mod settings;
pub mod tenant;

pub use settings::{load_settings, ObservabilityConfig, ServerConfig, Settings};
pub use tenant::{
    EndpointingConfig, FillerConfig, RobocallAction, RobocallConfig, TenantConfig, VoiceConfig,
};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Missing required setting: {0}")]
    Missing(String),
}
