//! Sink that writes each record to the log.

use async_trait::async_trait;
use rpc_metrics_domain::{MetricRecord, MetricSink, SinkResult};
use tracing::info;

/// Emits every record as a structured INFO event on the `rpc_metrics` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSink;

impl LoggingSink {
    /// Create a logging sink
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MetricSink for LoggingSink {
    async fn write(&self, record: &MetricRecord) -> SinkResult<()> {
        info!(
            target: "rpc_metrics",
            service = record.service(),
            method = record.method(),
            latency_ms = record.latency_ms(),
            outcome = %record.outcome(),
            status_code = record.effective_status_code(),
            "RPC completed"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "logging"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpc_metrics_domain::Outcome;
    use rpc_metrics_testing::{create_test_record, create_test_record_with_outcome};

    #[tokio::test]
    async fn test_logging_sink_accepts_records() {
        let sink = LoggingSink::new();
        assert!(sink.write(&create_test_record()).await.is_ok());
        assert!(sink
            .write(&create_test_record_with_outcome(Outcome::Cancelled))
            .await
            .is_ok());
        assert!(sink.flush().await.is_ok());
        assert_eq!(sink.name(), "logging");
    }
}
