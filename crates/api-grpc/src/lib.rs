//! gRPC server with per-call metrics
//!
//! [`MetricsLayer`] wraps the tonic router so every call is timed, classified
//! and handed to the metrics dispatcher without delaying the response.

pub mod error;
pub mod interceptors;
pub mod server;

pub use error::{GrpcError, GrpcResult};
pub use interceptors::{MetricsBody, MetricsLayer, MetricsService};
pub use server::{GrpcServer, ServerConfig};
