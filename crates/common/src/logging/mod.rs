//! Logging initialization
//!
//! Sets up the tracing subscriber from [`ObservabilityConfig`].
//! RUST_LOG overrides the configured level when set.

use crate::config::ObservabilityConfig;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// Returns an error if a subscriber is already installed, which
/// embedding applications that configure their own logging can ignore.
pub fn init(
    config: &ObservabilityConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.json_logging {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .try_init()?;
    } else {
        fmt().with_env_filter(filter).try_init()?;
    }

    tracing::info!(
        service = %config.service_name,
        level = %config.log_level,
        "Logging initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent_enough() {
        let config = ObservabilityConfig {
            log_level: "debug".to_string(),
            json_logging: false,
            service_name: "quarry-test".to_string(),
        };
        // First call may succeed or fail depending on test ordering;
        // the second must fail rather than panic.
        let _ = init(&config);
        assert!(init(&config).is_err());
    }
}
