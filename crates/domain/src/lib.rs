//! RPC Metrics Domain Types
//!
//! This crate provides the core model for RPC call instrumentation: the
//! immutable record emitted for every completed call, the classifier that
//! derives `(service, method)` from a call path, the sink capability that
//! forwards records to a backend, and the clock used to time calls.
//!
//! ## Architecture
//!
//! - **record**: `MetricRecord`, `Outcome` and `CallIdentity`
//! - **classifier**: `CallContext` and `CallClassifier`
//! - **sink**: the `MetricSink` trait with no-op and in-memory implementations
//! - **clock**: monotonic time source, injectable for tests
//!
//! ## Usage
//!
//! ```rust
//! use rpc_metrics_domain::{CallClassifier, Outcome};
//!
//! let identity = CallClassifier::new().classify("/Inventory/GetItem");
//! assert_eq!(identity.service(), "Inventory");
//! assert_eq!(identity.method(), "GetItem");
//! assert_eq!(Outcome::Success.as_str(), "success");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod classifier;
pub mod clock;
pub mod record;
pub mod sink;

pub use classifier::{parse_call_path, CallClassifier, CallContext, ClassificationError};
pub use clock::{Clock, MonotonicClock};
pub use record::{CallIdentity, MetricRecord, Outcome, UNKNOWN};
pub use sink::{InMemorySink, MetricSink, NoopSink, SinkError, SinkResult};
