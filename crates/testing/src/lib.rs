//! Testing utilities for RPC metrics
//!
//! This crate provides shared test support:
//! - Fixtures for call paths and records
//! - A builder for metric records
//! - Test doubles: a manual clock, failing, buffering and slow sinks, a static call context
//!
//! # Examples
//!
//! ```
//! use rpc_metrics_testing::{MetricRecordBuilder, ManualClock};
//! use std::time::Duration;
//!
//! let clock = ManualClock::new();
//! clock.advance(Duration::from_millis(12));
//!
//! let record = MetricRecordBuilder::new().with_latency(clock.elapsed()).build();
//! assert_eq!(record.latency(), Duration::from_millis(12));
//! ```

pub mod builders;
pub mod fixtures;
pub mod mocks;

// Re-export commonly used types
pub use builders::*;
pub use fixtures::*;
pub use mocks::*;
