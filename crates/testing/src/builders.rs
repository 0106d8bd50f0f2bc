//! Fluent builder for metric records.

use chrono::{DateTime, Utc};
use rpc_metrics_domain::{CallIdentity, MetricRecord, Outcome};
use std::time::Duration;

/// Builder for creating MetricRecord test instances
#[derive(Clone)]
pub struct MetricRecordBuilder {
    service: String,
    method: String,
    latency: Duration,
    outcome: Outcome,
    status_code: Option<i32>,
    recorded_at: Option<DateTime<Utc>>,
}

impl MetricRecordBuilder {
    pub fn new() -> Self {
        Self {
            service: "Inventory".to_string(),
            method: "GetItem".to_string(),
            latency: Duration::from_millis(12),
            outcome: Outcome::Success,
            status_code: None,
            recorded_at: None,
        }
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_latency_ms(self, ms: u64) -> Self {
        self.with_latency(Duration::from_millis(ms))
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn failed(self) -> Self {
        self.with_outcome(Outcome::Error)
    }

    pub fn cancelled(self) -> Self {
        self.with_outcome(Outcome::Cancelled)
    }

    pub fn with_status_code(mut self, code: i32) -> Self {
        self.status_code = Some(code);
        self
    }

    pub fn recorded_at(mut self, at: DateTime<Utc>) -> Self {
        self.recorded_at = Some(at);
        self
    }

    pub fn build(self) -> MetricRecord {
        let mut record = MetricRecord::new(
            CallIdentity::new(self.service, self.method),
            self.latency,
            self.outcome,
        );
        if let Some(code) = self.status_code {
            record = record.with_status_code(code);
        }
        if let Some(at) = self.recorded_at {
            record = record.with_recorded_at(at);
        }
        record
    }
}

impl Default for MetricRecordBuilder {
    fn default() -> Self {
        Self::new()
    }
}
