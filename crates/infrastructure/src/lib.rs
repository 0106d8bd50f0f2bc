//! Sink implementations for RPC metrics.
//!
//! - [`CloudMonitoringSink`]: batched export to the Cloud Monitoring API
//! - [`LoggingSink`]: one structured log line per record
//!
//! [`build_sink`] picks the implementation named by the configuration.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rpc_metrics_common::AppConfig;
//! use rpc_metrics_infrastructure::build_sink;
//!
//! let config = AppConfig::load()?;
//! let sink = build_sink(&config)?;
//! ```

pub mod cloud_monitoring;
pub mod logging;

pub use cloud_monitoring::{
    partition_batches, CloudMonitoringConfig, CloudMonitoringSink, MonitoredResource,
    LATENCY_METRIC, STATUS_METRIC,
};
pub use logging::LoggingSink;

use anyhow::Context;
use rpc_metrics_common::{AppConfig, SinkProvider};
use rpc_metrics_domain::{MetricSink, NoopSink};
use std::sync::Arc;
use tracing::{info, warn};

/// Build the sink selected by `config.sink.provider`.
///
/// The cloud sink needs a monitored resource. When none is configured the
/// records go to the log instead.
pub fn build_sink(config: &AppConfig) -> anyhow::Result<Arc<dyn MetricSink>> {
    let sink: Arc<dyn MetricSink> = match config.sink.provider {
        SinkProvider::Noop => Arc::new(NoopSink::new()),
        SinkProvider::Logging => Arc::new(LoggingSink::new()),
        SinkProvider::CloudMonitoring => {
            match config.resource.as_ref().and_then(MonitoredResource::from_config) {
                Some(resource) => {
                    let settings = CloudMonitoringConfig::from_sink_config(&config.sink)
                        .context("Invalid cloud monitoring settings")?;
                    let sink = CloudMonitoringSink::new(settings, resource)
                        .context("Failed to create cloud monitoring sink")?;
                    Arc::new(sink)
                }
                None => {
                    warn!("No monitored resource configured, metrics will be logged instead");
                    Arc::new(LoggingSink::new())
                }
            }
        }
    };

    info!(sink = sink.name(), "Metric sink ready");
    Ok(sink)
}
