//! Configuration management for the metrics server.
//!
//! Settings are loaded from configuration files and environment variables.
//! Resource labels (project, zone, cluster, ...) are plain configuration here:
//! they are resolved by whatever deploys the process and injected into the
//! sink at construction time.
//!
//! ## Example Configuration
//!
//! ```toml
//! [sink]
//! provider = "cloud_monitoring"
//! project_id = "my-project"
//! metric_prefix = "custom.googleapis.com/forseti"
//!
//! [dispatcher]
//! queue_capacity = 4096
//! write_timeout_ms = 30000
//!
//! [resource]
//! kind = "gce_instance"
//! project_id = "my-project"
//! instance_id = "1234567890"
//! zone = "us-central1-a"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub dispatcher: DispatcherSettings,
    /// Monitored resource the metrics are attached to
    #[serde(default)]
    pub resource: Option<ResourceConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to (e.g., "0.0.0.0")
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Serve the gRPC health service
    #[serde(default = "default_true")]
    pub enable_health: bool,
}

/// Telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Service name attached to log output
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Enable JSON logging format
    #[serde(default)]
    pub json_logging: bool,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Which sink receives metric records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkProvider {
    /// Export to the cloud monitoring API
    CloudMonitoring,
    /// Emit each record as a log line
    Logging,
    /// Discard records
    Noop,
}

impl std::str::FromStr for SinkProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cloud_monitoring" | "cloud-monitoring" | "cloud" => Ok(SinkProvider::CloudMonitoring),
            "logging" | "log" => Ok(SinkProvider::Logging),
            "noop" | "none" => Ok(SinkProvider::Noop),
            other => anyhow::bail!("Unknown sink provider '{}'", other),
        }
    }
}

/// Sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default = "default_provider")]
    pub provider: SinkProvider,

    /// Monitoring API base URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Project the time series are written to
    #[serde(default)]
    pub project_id: Option<String>,

    /// OAuth bearer token sent with export requests
    #[serde(default)]
    pub access_token: Option<String>,

    /// Metric type prefix, e.g. "custom.googleapis.com/forseti"
    #[serde(default = "default_metric_prefix")]
    pub metric_prefix: String,

    /// Value of the `app` label on every series
    #[serde(default = "default_app_label")]
    pub app_label: String,

    /// Records per export request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// HTTP timeout for one export request in milliseconds
    #[serde(default = "default_export_timeout")]
    pub request_timeout_ms: u64,

    /// Retries for transient export failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// Background dispatcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherSettings {
    /// Records buffered between the RPC path and the sink
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Upper bound for a single sink write or flush in milliseconds
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,

    /// Interval between periodic sink flushes in milliseconds
    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,
}

/// Kind of monitored resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    #[default]
    GceInstance,
    GkeContainer,
}

impl ResourceKind {
    /// Resource type name used by the monitoring API
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::GceInstance => "gce_instance",
            ResourceKind::GkeContainer => "gke_container",
        }
    }
}

/// Monitored resource labels
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default)]
    pub kind: ResourceKind,
    pub project_id: Option<String>,
    pub instance_id: Option<String>,
    pub zone: Option<String>,
    pub cluster_name: Option<String>,
    pub container_name: Option<String>,
    pub namespace_id: Option<String>,
    pub pod_id: Option<String>,
}

impl ResourceConfig {
    /// Labels the resource kind requires, in the order the API lists them
    pub fn required_labels(kind: ResourceKind) -> &'static [&'static str] {
        match kind {
            ResourceKind::GceInstance => &["project_id", "instance_id", "zone"],
            ResourceKind::GkeContainer => &[
                "cluster_name",
                "container_name",
                "instance_id",
                "namespace_id",
                "pod_id",
                "zone",
            ],
        }
    }

    /// Look up a label by name
    pub fn label(&self, name: &str) -> Option<&str> {
        let value = match name {
            "project_id" => &self.project_id,
            "instance_id" => &self.instance_id,
            "zone" => &self.zone,
            "cluster_name" => &self.cluster_name,
            "container_name" => &self.container_name,
            "namespace_id" => &self.namespace_id,
            "pod_id" => &self.pod_id,
            _ => return None,
        };
        value.as_deref().filter(|v| !v.is_empty())
    }

    /// Labels required by `kind` that are not set
    pub fn missing_labels(&self, kind: ResourceKind) -> Vec<&'static str> {
        Self::required_labels(kind)
            .iter()
            .copied()
            .filter(|name| self.label(name).is_none())
            .collect()
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    50051
}

fn default_request_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_service_name() -> String {
    "rpc-metrics".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_provider() -> SinkProvider {
    SinkProvider::Logging
}

fn default_endpoint() -> String {
    "https://monitoring.googleapis.com".to_string()
}

fn default_metric_prefix() -> String {
    "custom.googleapis.com/forseti".to_string()
}

fn default_app_label() -> String {
    "forseti".to_string()
}

fn default_batch_size() -> usize {
    100
}

fn default_export_timeout() -> u64 {
    5000
}

fn default_max_retries() -> u32 {
    3
}

fn default_queue_capacity() -> usize {
    4096
}

fn default_write_timeout() -> u64 {
    30_000
}

fn default_flush_interval() -> u64 {
    10_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            enable_health: true,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            json_logging: false,
            log_level: default_log_level(),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            endpoint: default_endpoint(),
            project_id: None,
            access_token: None,
            metric_prefix: default_metric_prefix(),
            app_label: default_app_label(),
            batch_size: default_batch_size(),
            request_timeout_ms: default_export_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            write_timeout_ms: default_write_timeout(),
            flush_interval_ms: default_flush_interval(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::development()
    }
}

/// Largest batch one export request may carry (two series per record,
/// 200 series per request).
pub const MAX_BATCH_SIZE: usize = 100;

impl AppConfig {
    /// Load configuration from environment variables and configuration files.
    ///
    /// Sources, later ones overriding earlier ones:
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/{environment}.toml (if exists, where environment is from APP_ENV)
    /// 4. Environment variables (prefixed with APP_, e.g. APP_SINK__PROVIDER)
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration, optionally reading an explicit file before the
    /// environment variables are applied.
    pub fn load_from(path: Option<&str>) -> Result<Self> {
        let app_config = Self::load_unvalidated(path)?;
        app_config.validate()?;
        Ok(app_config)
    }

    /// Load configuration like [`AppConfig::load_from`] without validating it.
    ///
    /// Callers that apply further overrides must call [`AppConfig::validate`]
    /// themselves.
    pub fn load_unvalidated(path: Option<&str>) -> Result<Self> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false));

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.server.request_timeout_secs == 0 {
            anyhow::bail!("Request timeout must be greater than 0");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "Invalid log level '{}'. Must be one of: {}",
                self.telemetry.log_level,
                valid_log_levels.join(", ")
            );
        }

        if self.dispatcher.queue_capacity == 0 {
            anyhow::bail!("Dispatcher queue capacity must be greater than 0");
        }

        if self.dispatcher.write_timeout_ms == 0 {
            anyhow::bail!("Dispatcher write timeout must be greater than 0");
        }

        if self.dispatcher.flush_interval_ms == 0 {
            anyhow::bail!("Dispatcher flush interval must be greater than 0");
        }

        if self.sink.batch_size == 0 || self.sink.batch_size > MAX_BATCH_SIZE {
            anyhow::bail!("Sink batch size must be between 1 and {}", MAX_BATCH_SIZE);
        }

        if self.sink.provider == SinkProvider::CloudMonitoring {
            if self.sink.project_id.as_deref().unwrap_or("").is_empty() {
                anyhow::bail!("Cloud monitoring sink requires sink.project_id");
            }
            url::Url::parse(&self.sink.endpoint)
                .with_context(|| format!("Invalid sink endpoint '{}'", self.sink.endpoint))?;
        }

        if let Some(resource) = &self.resource {
            let missing = resource.missing_labels(resource.kind);
            if !missing.is_empty() {
                anyhow::bail!(
                    "Resource '{}' is missing labels: {}",
                    resource.kind.as_str(),
                    missing.join(", ")
                );
            }
        }

        Ok(())
    }

    /// Address the server binds to
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .with_context(|| {
                format!(
                    "Invalid bind address {}:{}",
                    self.server.host, self.server.port
                )
            })
    }

    /// Per-request timeout as a Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Create a development configuration with sensible defaults
    pub fn development() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                ..ServerConfig::default()
            },
            telemetry: TelemetryConfig {
                log_level: "debug".to_string(),
                ..TelemetryConfig::default()
            },
            sink: SinkConfig::default(),
            dispatcher: DispatcherSettings::default(),
            resource: None,
        }
    }
}

impl DispatcherSettings {
    /// Write timeout as a Duration
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Flush interval as a Duration
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gce_resource() -> ResourceConfig {
        ResourceConfig {
            kind: ResourceKind::GceInstance,
            project_id: Some("my-project".to_string()),
            instance_id: Some("42".to_string()),
            zone: Some("us-central1-a".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_development_config_is_valid() {
        let config = AppConfig::development();
        assert!(config.validate().is_ok());
        assert_eq!(config.sink.provider, SinkProvider::Logging);
        assert_eq!(config.bind_addr().unwrap().port(), 50051);
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::development();

        config.server.port = 0;
        assert!(config.validate().is_err());
        config.server.port = 50051;

        config.telemetry.log_level = "invalid".to_string();
        assert!(config.validate().is_err());
        config.telemetry.log_level = "info".to_string();

        config.dispatcher.queue_capacity = 0;
        assert!(config.validate().is_err());
        config.dispatcher.queue_capacity = 16;

        config.sink.batch_size = MAX_BATCH_SIZE + 1;
        assert!(config.validate().is_err());
        config.sink.batch_size = 10;

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cloud_sink_requires_project() {
        let mut config = AppConfig::development();
        config.sink.provider = SinkProvider::CloudMonitoring;
        assert!(config.validate().is_err());

        config.sink.project_id = Some("my-project".to_string());
        assert!(config.validate().is_ok());

        config.sink.endpoint = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resource_label_requirements() {
        let mut config = AppConfig::development();
        config.resource = Some(gce_resource());
        assert!(config.validate().is_ok());

        let mut gke = gce_resource();
        gke.kind = ResourceKind::GkeContainer;
        assert_eq!(
            gke.missing_labels(ResourceKind::GkeContainer),
            vec!["cluster_name", "container_name", "namespace_id", "pod_id"]
        );
        config.resource = Some(gke);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_label_counts_as_missing() {
        let mut resource = gce_resource();
        resource.zone = Some(String::new());
        assert_eq!(resource.missing_labels(ResourceKind::GceInstance), vec!["zone"]);
    }

    #[test]
    fn test_env_overrides_nested_keys() {
        std::env::set_var("APP_SINK__PROVIDER", "noop");
        std::env::set_var("APP_TELEMETRY__SERVICE_NAME", "billing");
        let loaded = AppConfig::load_unvalidated(None);
        std::env::remove_var("APP_SINK__PROVIDER");
        std::env::remove_var("APP_TELEMETRY__SERVICE_NAME");

        let config = loaded.unwrap();
        assert_eq!(config.sink.provider, SinkProvider::Noop);
        assert_eq!(config.telemetry.service_name, "billing");
    }

    #[test]
    fn test_load_unvalidated_skips_validation() {
        let dir = std::env::temp_dir().join(format!("rpc-metrics-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("invalid.toml");
        std::fs::write(&path, "[dispatcher]\nqueue_capacity = 0\n").unwrap();
        let path = path.to_str().unwrap();

        let config = AppConfig::load_unvalidated(Some(path)).unwrap();
        assert_eq!(config.dispatcher.queue_capacity, 0);
        assert!(AppConfig::load_from(Some(path)).is_err());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_sink_provider_from_str() {
        assert_eq!("cloud".parse::<SinkProvider>().unwrap(), SinkProvider::CloudMonitoring);
        assert_eq!("Logging".parse::<SinkProvider>().unwrap(), SinkProvider::Logging);
        assert_eq!("none".parse::<SinkProvider>().unwrap(), SinkProvider::Noop);
        assert!("kafka".parse::<SinkProvider>().is_err());
    }
}
