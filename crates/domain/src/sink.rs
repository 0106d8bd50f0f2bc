//! Metric sink capability.
//!
//! A sink forwards metric records to a backend. Writes are best-effort: a
//! failing sink is logged by its caller and never affects the RPC that
//! produced the record.

use crate::record::MetricRecord;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;

/// Errors a sink may report
#[derive(Debug, Clone, Error)]
pub enum SinkError {
    /// Network or connection failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Backend answered with a non-success status
    #[error("Backend rejected request with status {status}: {message}")]
    Rejected {
        /// HTTP status returned by the backend
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// Record could not be encoded for the backend
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Sink is misconfigured or not ready
    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}

impl SinkError {
    /// Whether retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            SinkError::Transport(_) => true,
            SinkError::Rejected { status, .. } => *status == 429 || *status >= 500,
            SinkError::Serialization(_) | SinkError::Unavailable(_) => false,
        }
    }
}

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// Destination for metric records.
///
/// Implementations are shared by every concurrent call and own any batching
/// or connection state behind their own synchronization.
#[async_trait]
pub trait MetricSink: Send + Sync {
    /// Forward one record to the backend
    async fn write(&self, record: &MetricRecord) -> SinkResult<()>;

    /// Push any buffered records to the backend
    async fn flush(&self) -> SinkResult<()> {
        Ok(())
    }

    /// Records accepted by `write` but not yet exported.
    ///
    /// A failed export discards these, so callers use the count to report
    /// how many records were lost.
    fn buffered(&self) -> usize {
        0
    }

    /// Short name used in logs
    fn name(&self) -> &str;
}

/// Sink that discards every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl NoopSink {
    /// Create a no-op sink
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MetricSink for NoopSink {
    async fn write(&self, _record: &MetricRecord) -> SinkResult<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "noop"
    }
}

/// Sink that keeps every record in memory.
///
/// Cloning shares the underlying storage, so a test can keep one handle and
/// give another to the code under test.
#[derive(Debug, Clone, Default)]
pub struct InMemorySink {
    records: Arc<RwLock<Vec<MetricRecord>>>,
}

impl InMemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all records written so far
    pub fn records(&self) -> Vec<MetricRecord> {
        self.records.read().clone()
    }

    /// Number of records written so far
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// True when nothing has been written
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Remove all stored records
    pub fn clear(&self) {
        self.records.write().clear();
    }
}

#[async_trait]
impl MetricSink for InMemorySink {
    async fn write(&self, record: &MetricRecord) -> SinkResult<()> {
        self.records.write().push(record.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}
