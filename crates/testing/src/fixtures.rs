//! Test fixtures for call paths and records.

use crate::builders::MetricRecordBuilder;
use fake::{faker::lorem::en::Word, Fake};
use rpc_metrics_domain::{MetricRecord, Outcome};
use std::time::Duration;

/// Call path used by most scenario tests
pub const INVENTORY_GET_ITEM: &str = "/Inventory/GetItem";

/// Call path of the standard gRPC health check
pub const HEALTH_CHECK: &str = "/grpc.health.v1.Health/Check";

/// Create a record for `/Inventory/GetItem` that succeeded after 12ms
pub fn create_test_record() -> MetricRecord {
    MetricRecordBuilder::new().build()
}

/// Create a record with the given outcome
pub fn create_test_record_with_outcome(outcome: Outcome) -> MetricRecord {
    MetricRecordBuilder::new().with_outcome(outcome).build()
}

/// Random but well-formed `(service, method, path)` triple
pub fn random_call_path() -> (String, String, String) {
    let service = capitalize(&Word().fake::<String>());
    let method = format!("Get{}", capitalize(&Word().fake::<String>()));
    let path = format!("/{}/{}", service, method);
    (service, method, path)
}

/// `count` records spread over `services` services, latencies 1..=count ms
pub fn create_test_records(count: usize, services: usize) -> Vec<MetricRecord> {
    (0..count)
        .map(|i| {
            MetricRecordBuilder::new()
                .with_service(format!("Service{}", i % services.max(1)))
                .with_method(format!("Method{}", i))
                .with_latency(Duration::from_millis(i as u64 + 1))
                .build()
        })
        .collect()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => "Call".to_string(),
    }
}
