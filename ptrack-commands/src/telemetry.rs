//! Tracing subscriber initialization.
//!
//! Hosts call [`init_tracing`] once at startup. The filter comes from the
//! config, then `RUST_LOG`, then the `ptrack=info` default.

use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const DEFAULT_FILTER: &str = "ptrack=info";
pub const ENV_LOG_FILTER: &str = "PTRACK_LOG";
pub const ENV_LOG_JSON: &str = "PTRACK_LOG_JSON";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("Invalid log filter {filter:?}: {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("Failed to init subscriber: {reason}")]
    AlreadyInitialized { reason: String },
}

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// `EnvFilter` directives; `None` falls back to `RUST_LOG`, then
    /// [`DEFAULT_FILTER`].
    pub filter: Option<String>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl TelemetryConfig {
    /// Read `PTRACK_LOG` and `PTRACK_LOG_JSON`.
    pub fn from_env() -> Self {
        Self {
            filter: std::env::var(ENV_LOG_FILTER)
                .ok()
                .filter(|filter| !filter.trim().is_empty()),
            json: std::env::var(ENV_LOG_JSON)
                .map(|s| s == "true" || s == "1")
                .unwrap_or(false),
        }
    }

    fn env_filter(&self) -> Result<EnvFilter, TelemetryError> {
        match &self.filter {
            Some(filter) => EnvFilter::try_new(filter).map_err(|e| TelemetryError::InvalidFilter {
                filter: filter.clone(),
                reason: e.to_string(),
            }),
            None => Ok(EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))),
        }
    }
}

/// Install the global subscriber.
///
/// Returns [`TelemetryError::AlreadyInitialized`] instead of panicking when
/// a global subscriber is already set.
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = config.env_filter()?;
    let json_layer = config.json.then(|| tracing_subscriber::fmt::layer().json());
    let plain_layer = (!config.json).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(plain_layer)
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInitialized {
            reason: e.to_string(),
        })?;

    tracing::info!(
        filter = config.filter.as_deref().unwrap_or(DEFAULT_FILTER),
        json = config.json,
        "Telemetry initialized"
    );
    Ok(())
}
