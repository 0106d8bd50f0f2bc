//! Application layer for RPC metrics
//!
//! This crate turns the domain types into a working instrumentation pipeline.
//!
//! ## Architecture
//!
//! Calls enter through the [`Interceptor`], which classifies them, times the
//! handler and builds one [`MetricRecord`](rpc_metrics_domain::MetricRecord)
//! per call. Records go to the [`SinkDispatcher`], a bounded queue drained by
//! a background task that writes to the configured sink.
//!
//! ## Modules
//!
//! - `interceptor` - `Interceptor` and `CallGuard`
//! - `dispatcher` - `SinkDispatcher` and its statistics

pub mod dispatcher;
pub mod interceptor;

pub use dispatcher::{DispatcherConfig, DispatcherStats, SinkDispatcher};
pub use interceptor::{CallGuard, Interceptor};

use thiserror::Error;

/// Application-level errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplicationError {
    /// The dispatcher worker has stopped
    #[error("Metric dispatcher is closed")]
    DispatcherClosed,
}

pub type ApplicationResult<T> = Result<T, ApplicationError>;
