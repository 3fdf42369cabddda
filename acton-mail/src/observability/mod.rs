//! Logging setup
//!
//! Every component logs through `tracing` with structured fields (`worker`, `job`,
//! `template`, `host`, `error`). This module installs the subscriber that prints
//! them.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging with the default configuration
///
/// Sets up:
/// - JSON output in release builds, pretty output in debug builds
/// - Environment-based level filtering (`RUST_LOG`)
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
///
/// # Example
///
/// ```rust,no_run
/// use acton_mail::observability;
///
/// # fn main() -> anyhow::Result<()> {
/// observability::init()?;
/// tracing::info!("Mail service started");
/// # Ok(())
/// # }
/// ```
pub fn init() -> anyhow::Result<()> {
    init_with(&ObservabilityConfig::default())
}

/// Initialize logging with an explicit configuration
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_with(config: &ObservabilityConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(ObservabilityConfig::default_filter()));

    if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()?;
    }

    tracing::debug!(service = %config.service_name, "Logging initialized");
    Ok(())
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Service name attached to the startup log line
    pub service_name: String,

    /// Emit JSON lines instead of pretty output
    pub json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "acton-mail".to_string(),
            json: !cfg!(debug_assertions),
        }
    }
}

impl ObservabilityConfig {
    /// Create a configuration for a named service
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Self::default()
        }
    }

    /// Filter used when `RUST_LOG` is not set
    #[must_use]
    pub const fn default_filter() -> &'static str {
        if cfg!(debug_assertions) {
            "debug,acton_mail=trace"
        } else {
            "info"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.service_name, "acton-mail");
        assert_eq!(config.json, !cfg!(debug_assertions));
    }

    #[test]
    fn test_named_service() {
        let config = ObservabilityConfig::new("monitor");
        assert_eq!(config.service_name, "monitor");
        assert!(!ObservabilityConfig::default_filter().is_empty());
    }
}
