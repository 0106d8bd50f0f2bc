//! Test doubles for sinks, clocks and call contexts.

use async_trait::async_trait;
use parking_lot::Mutex;
use rpc_metrics_domain::{CallContext, Clock, MetricRecord, MetricSink, SinkError, SinkResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Clock that only moves when told to.
///
/// Clones share the same time, so a handler can advance the clock the
/// interceptor reads from.
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }

    /// Total time advanced so far
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }
}

/// Sink whose every write and flush fails.
pub struct FailingSink {
    error: SinkError,
    attempts: AtomicUsize,
}

impl FailingSink {
    /// Fail with a transport error
    pub fn new() -> Self {
        Self::with_error(SinkError::Transport("backend unavailable".to_string()))
    }

    /// Fail with the given error
    pub fn with_error(error: SinkError) -> Self {
        Self {
            error,
            attempts: AtomicUsize::new(0),
        }
    }

    /// Number of writes attempted
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Default for FailingSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricSink for FailingSink {
    async fn write(&self, _record: &MetricRecord) -> SinkResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }

    async fn flush(&self) -> SinkResult<()> {
        Err(self.error.clone())
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Sink that sleeps before accepting each record.
pub struct SlowSink {
    delay: Duration,
    records: Mutex<Vec<MetricRecord>>,
}

impl SlowSink {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            records: Mutex::new(Vec::new()),
        }
    }

    /// Records that made it through before any timeout
    pub fn records(&self) -> Vec<MetricRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl MetricSink for SlowSink {
    async fn write(&self, record: &MetricRecord) -> SinkResult<()> {
        tokio::time::sleep(self.delay).await;
        self.records.lock().push(record.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "slow"
    }
}

/// Sink that buffers every write and fails each export.
///
/// Mirrors a batching exporter whose backend is down: writes succeed, the
/// buffered records are discarded when a flush or a full batch fails.
pub struct BufferingFailingSink {
    batch_size: usize,
    error: SinkError,
    buffer: Mutex<Vec<MetricRecord>>,
    exports: AtomicUsize,
}

impl BufferingFailingSink {
    /// Export, and fail, once `batch_size` records are buffered
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            error: SinkError::Transport("backend unavailable".to_string()),
            buffer: Mutex::new(Vec::new()),
            exports: AtomicUsize::new(0),
        }
    }

    /// Number of failed export attempts
    pub fn exports(&self) -> usize {
        self.exports.load(Ordering::SeqCst)
    }

    fn fail_export(&self) -> SinkResult<()> {
        self.buffer.lock().clear();
        self.exports.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

#[async_trait]
impl MetricSink for BufferingFailingSink {
    async fn write(&self, record: &MetricRecord) -> SinkResult<()> {
        let full = {
            let mut buffer = self.buffer.lock();
            buffer.push(record.clone());
            buffer.len() >= self.batch_size
        };
        if full {
            self.fail_export()
        } else {
            Ok(())
        }
    }

    async fn flush(&self) -> SinkResult<()> {
        if self.buffer.lock().is_empty() {
            return Ok(());
        }
        self.fail_export()
    }

    fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    fn name(&self) -> &str {
        "buffering_failing"
    }
}

/// Call context with a fixed path and a settable cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct StaticContext {
    path: Option<String>,
    cancelled: Arc<AtomicBool>,
}

impl StaticContext {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Context that exposes no call path
    pub fn without_path() -> Self {
        Self::default()
    }

    /// Mark the call as cancelled by the framework
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

impl CallContext for StaticContext {
    fn call_path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
