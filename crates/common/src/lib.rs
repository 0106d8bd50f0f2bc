//! Shared utilities for the RPC metrics workspace.
//!
//! - Configuration loading and validation
//! - Tracing subscriber setup
//! - Retry with exponential backoff

pub mod config;
pub mod retry;
pub mod telemetry;

pub use config::{
    AppConfig, DispatcherSettings, ResourceConfig, ResourceKind, ServerConfig, SinkConfig,
    SinkProvider, TelemetryConfig,
};
pub use retry::{retry_if, RetryConfig};
pub use telemetry::init_tracing;

/// Common error type used throughout the crate
pub type Result<T> = std::result::Result<T, anyhow::Error>;
