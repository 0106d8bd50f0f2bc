//! Background dispatch of metric records to a sink.
//!
//! The RPC path only ever calls [`SinkDispatcher::dispatch`], which enqueues
//! without waiting. A single worker task drains the queue and writes to the
//! sink, bounding every write and flush by a timeout so a slow backend can
//! only ever back up the queue, never a caller.

use crate::{ApplicationError, ApplicationResult};
use rpc_metrics_common::config::DispatcherSettings;
use rpc_metrics_domain::{MetricRecord, MetricSink};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Records buffered between callers and the worker
    pub queue_capacity: usize,
    /// Upper bound for one sink write or flush
    pub write_timeout: Duration,
    /// Interval between periodic sink flushes
    pub flush_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 4096,
            write_timeout: Duration::from_secs(30),
            flush_interval: Duration::from_secs(10),
        }
    }
}

impl From<&DispatcherSettings> for DispatcherConfig {
    fn from(settings: &DispatcherSettings) -> Self {
        Self {
            queue_capacity: settings.queue_capacity,
            write_timeout: settings.write_timeout(),
            flush_interval: settings.flush_interval(),
        }
    }
}

enum Command {
    Record(MetricRecord),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    accepted: AtomicU64,
    failed: AtomicU64,
    flush_failures: AtomicU64,
}

/// Point-in-time dispatcher statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatcherStats {
    /// Records accepted onto the queue
    pub enqueued: u64,
    /// Records dropped because the queue was full or closed
    pub dropped: u64,
    /// Records the sink accepted, either delivered or buffered for export
    pub accepted: u64,
    /// Records lost to a failed or timed out write, flush or batch export
    pub failed: u64,
    /// Flushes that failed or timed out
    pub flush_failures: u64,
}

/// Handle to the background dispatch worker.
///
/// Cheap to clone; every clone feeds the same queue.
#[derive(Clone)]
pub struct SinkDispatcher {
    tx: mpsc::Sender<Command>,
    counters: Arc<Counters>,
    sink_name: Arc<str>,
}

impl std::fmt::Debug for SinkDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkDispatcher")
            .field("sink", &self.sink_name)
            .field("stats", &self.stats())
            .finish()
    }
}

impl SinkDispatcher {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(sink: Arc<dyn MetricSink>, config: DispatcherConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let counters = Arc::new(Counters::default());
        let sink_name: Arc<str> = Arc::from(sink.name());

        info!(
            sink = %sink_name,
            queue_capacity = config.queue_capacity,
            write_timeout_ms = config.write_timeout.as_millis() as u64,
            "Starting metric dispatcher"
        );

        tokio::spawn(run_worker(sink, config, rx, counters.clone()));

        Self {
            tx,
            counters,
            sink_name,
        }
    }

    /// Enqueue a record without waiting.
    ///
    /// A full or closed queue drops the record with a warning.
    pub fn dispatch(&self, record: MetricRecord) {
        match self.tx.try_send(Command::Record(record)) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(Command::Record(record))) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    sink = %self.sink_name,
                    service = record.service(),
                    method = record.method(),
                    "Metric queue full, dropping record"
                );
            }
            Err(_) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(sink = %self.sink_name, "Metric dispatcher stopped, dropping record");
            }
        }
    }

    /// Wait until every record enqueued before this call has been handed to
    /// the sink, then flush the sink.
    pub async fn flush(&self) -> ApplicationResult<()> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Command::Flush(ack))
            .await
            .map_err(|_| ApplicationError::DispatcherClosed)?;
        done.await.map_err(|_| ApplicationError::DispatcherClosed)
    }

    /// Drain the queue, flush the sink and stop the worker.
    pub async fn shutdown(&self) -> ApplicationResult<()> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Command::Shutdown(ack))
            .await
            .map_err(|_| ApplicationError::DispatcherClosed)?;
        done.await.map_err(|_| ApplicationError::DispatcherClosed)
    }

    /// Name of the sink behind this dispatcher
    pub fn sink_name(&self) -> &str {
        &self.sink_name
    }

    /// Current statistics
    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            flush_failures: self.counters.flush_failures.load(Ordering::Relaxed),
        }
    }
}

async fn run_worker(
    sink: Arc<dyn MetricSink>,
    config: DispatcherConfig,
    mut rx: mpsc::Receiver<Command>,
    counters: Arc<Counters>,
) {
    let period = config.flush_interval.max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Record(record)) => {
                    write_record(sink.as_ref(), &record, config.write_timeout, &counters).await;
                }
                Some(Command::Flush(ack)) => {
                    flush_sink(sink.as_ref(), config.write_timeout, &counters).await;
                    let _ = ack.send(());
                }
                Some(Command::Shutdown(ack)) => {
                    rx.close();
                    while let Some(command) = rx.recv().await {
                        match command {
                            Command::Record(record) => {
                                write_record(sink.as_ref(), &record, config.write_timeout, &counters)
                                    .await;
                            }
                            Command::Flush(pending) | Command::Shutdown(pending) => {
                                let _ = pending.send(());
                            }
                        }
                    }
                    flush_sink(sink.as_ref(), config.write_timeout, &counters).await;
                    info!(sink = sink.name(), "Metric dispatcher stopped");
                    let _ = ack.send(());
                    return;
                }
                None => {
                    flush_sink(sink.as_ref(), config.write_timeout, &counters).await;
                    debug!(sink = sink.name(), "All dispatcher handles dropped");
                    return;
                }
            },
            _ = ticker.tick() => {
                flush_sink(sink.as_ref(), config.write_timeout, &counters).await;
            }
        }
    }
}

async fn write_record(
    sink: &dyn MetricSink,
    record: &MetricRecord,
    limit: Duration,
    counters: &Counters,
) {
    // A failed write takes the sink's pending batch down with the record
    let at_risk = sink.buffered() as u64 + 1;

    match timeout(limit, sink.write(record)).await {
        Ok(Ok(())) => {
            counters.accepted.fetch_add(1, Ordering::Relaxed);
            trace!(
                sink = sink.name(),
                service = record.service(),
                method = record.method(),
                "Metric record written"
            );
        }
        Ok(Err(error)) => {
            counters.failed.fetch_add(at_risk, Ordering::Relaxed);
            warn!(
                sink = sink.name(),
                service = record.service(),
                method = record.method(),
                records = at_risk,
                error = %error,
                "Error while sending metrics"
            );
        }
        Err(_) => {
            counters.failed.fetch_add(at_risk, Ordering::Relaxed);
            warn!(
                sink = sink.name(),
                records = at_risk,
                timeout_ms = limit.as_millis() as u64,
                "Metric write timed out, abandoning record"
            );
        }
    }
}

async fn flush_sink(sink: &dyn MetricSink, limit: Duration, counters: &Counters) {
    let pending = sink.buffered() as u64;

    match timeout(limit, sink.flush()).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => {
            counters.flush_failures.fetch_add(1, Ordering::Relaxed);
            counters.failed.fetch_add(pending, Ordering::Relaxed);
            warn!(
                sink = sink.name(),
                records = pending,
                error = %error,
                "Metric sink flush failed"
            );
        }
        Err(_) => {
            counters.flush_failures.fetch_add(1, Ordering::Relaxed);
            counters.failed.fetch_add(pending, Ordering::Relaxed);
            warn!(
                sink = sink.name(),
                records = pending,
                timeout_ms = limit.as_millis() as u64,
                "Metric sink flush timed out"
            );
        }
    }
}
