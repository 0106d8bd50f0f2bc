//! Tower middleware for the gRPC server

pub mod metrics;

pub use metrics::{outcome_for, status_code, MetricsBody, MetricsLayer, MetricsService};
