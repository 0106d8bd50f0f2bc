//! Logging setup.
//!
//! Installs a `tracing` subscriber with either JSON or human-readable output.
//! `RUST_LOG` takes precedence over the configured level.

use crate::config::TelemetryConfig;
use anyhow::{Context, Result};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

/// Transport crates whose debug output drowns out call records
const QUIET_TARGETS: &[&str] = &["h2=warn", "hyper=warn", "tower=warn", "reqwest=warn"];

/// Initialize the global tracing subscriber.
///
/// Fails if a global subscriber is already installed.
///
/// # Examples
///
/// ```no_run
/// use rpc_metrics_common::{config::TelemetryConfig, telemetry::init_tracing};
///
/// init_tracing(&TelemetryConfig::default()).expect("Failed to initialize tracing");
/// ```
pub fn init_tracing(config: &TelemetryConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => default_filter(&config.log_level)?,
    };

    let json = config.json_logging.then(|| {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_thread_ids(true)
    });
    let text = (!config.json_logging).then(|| {
        fmt::layer()
            .compact()
            .with_thread_names(true)
            .with_span_events(FmtSpan::CLOSE)
    });

    Registry::default()
        .with(filter)
        .with(json)
        .with(text)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    tracing::debug!(
        service = %config.service_name,
        json = config.json_logging,
        "Tracing initialized"
    );

    Ok(())
}

fn default_filter(level: &str) -> Result<EnvFilter> {
    let directives = std::iter::once(level)
        .chain(QUIET_TARGETS.iter().copied())
        .collect::<Vec<_>>()
        .join(",");

    EnvFilter::try_new(&directives)
        .with_context(|| format!("Invalid log filter '{}'", directives))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_accepts_levels() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            assert!(default_filter(level).is_ok());
        }
    }

    #[test]
    fn test_init_tracing_twice_reports_error() {
        let config = TelemetryConfig::default();
        let _ = init_tracing(&config);
        assert!(init_tracing(&config).is_err());
    }
}
