//! Cloud Monitoring sink.
//!
//! Every record becomes two time series: the call latency in milliseconds and
//! the response status code. Both carry the `app`, `service` and `method`
//! labels and are attached to the monitored resource the process runs on.
//! Records are buffered and exported with `timeSeries.create` once a batch is
//! full or the dispatcher asks for a flush.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rpc_metrics_common::config::MAX_BATCH_SIZE;
use rpc_metrics_common::{retry_if, ResourceConfig, RetryConfig, SinkConfig};
use rpc_metrics_domain::{MetricRecord, MetricSink, SinkError, SinkResult};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Metric name suffix for call latency
pub const LATENCY_METRIC: &str = "service_latency_ms";

/// Metric name suffix for the response status code
pub const STATUS_METRIC: &str = "service_response_status";

/// Settings for the Cloud Monitoring exporter
#[derive(Debug, Clone)]
pub struct CloudMonitoringConfig {
    /// API base URL
    pub endpoint: String,
    /// Project the series are written to
    pub project_id: String,
    /// Bearer token sent with each request
    pub access_token: Option<String>,
    /// Metric type prefix
    pub metric_prefix: String,
    /// Value of the `app` label
    pub app_label: String,
    /// Records per export request
    pub batch_size: usize,
    /// HTTP timeout per request
    pub request_timeout: Duration,
    /// Backoff for transient failures
    pub retry: RetryConfig,
}

impl CloudMonitoringConfig {
    /// Build exporter settings from the sink section of the app config
    pub fn from_sink_config(config: &SinkConfig) -> SinkResult<Self> {
        let project_id = config
            .project_id
            .clone()
            .filter(|project| !project.is_empty())
            .ok_or_else(|| SinkError::Unavailable("sink.project_id is not set".to_string()))?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            project_id,
            access_token: config.access_token.clone(),
            metric_prefix: config.metric_prefix.trim_end_matches('/').to_string(),
            app_label: config.app_label.clone(),
            batch_size: config.batch_size.clamp(1, MAX_BATCH_SIZE),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            retry: RetryConfig::exponential(config.max_retries),
        })
    }

    /// Full metric type for a metric name suffix
    pub fn metric_type(&self, name: &str) -> String {
        format!("{}/{}", self.metric_prefix, name)
    }

    fn time_series_url(&self) -> SinkResult<String> {
        let url = format!(
            "{}/v3/projects/{}/timeSeries",
            self.endpoint.trim_end_matches('/'),
            self.project_id
        );
        url::Url::parse(&url)
            .map_err(|e| SinkError::Unavailable(format!("invalid endpoint '{}': {}", url, e)))?;
        Ok(url)
    }
}

/// Resource the time series are attached to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitoredResource {
    #[serde(rename = "type")]
    resource_type: String,
    labels: BTreeMap<String, String>,
}

impl MonitoredResource {
    /// Build the resource from configured labels.
    ///
    /// Returns `None` when any label the resource kind requires is unset.
    pub fn from_config(config: &ResourceConfig) -> Option<Self> {
        let labels = ResourceConfig::required_labels(config.kind)
            .iter()
            .map(|name| {
                config
                    .label(name)
                    .map(|value| (name.to_string(), value.to_string()))
            })
            .collect::<Option<BTreeMap<_, _>>>()?;

        Some(Self {
            resource_type: config.kind.as_str().to_string(),
            labels,
        })
    }

    /// Monitored resource type, e.g. `gce_instance`
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Value of a resource label, if set
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTimeSeriesRequest<'a> {
    time_series: Vec<TimeSeries<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TimeSeries<'a> {
    metric: Metric,
    resource: &'a MonitoredResource,
    metric_kind: &'static str,
    value_type: &'static str,
    points: [Point; 1],
}

#[derive(Debug, Serialize)]
struct Metric {
    #[serde(rename = "type")]
    metric_type: String,
    labels: BTreeMap<&'static str, String>,
}

#[derive(Debug, Serialize)]
struct Point {
    interval: Interval,
    value: TypedValue,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Interval {
    end_time: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum TypedValue {
    DoubleValue(f64),
    // int64 values travel as decimal strings
    Int64Value(String),
}

/// Sink exporting records to the Cloud Monitoring API
pub struct CloudMonitoringSink {
    client: reqwest::Client,
    config: CloudMonitoringConfig,
    resource: MonitoredResource,
    url: String,
    buffer: Mutex<Vec<MetricRecord>>,
}

impl CloudMonitoringSink {
    /// Create a sink writing series for `resource`
    pub fn new(config: CloudMonitoringConfig, resource: MonitoredResource) -> SinkResult<Self> {
        let url = config.time_series_url()?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SinkError::Unavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            buffer: Mutex::new(Vec::with_capacity(config.batch_size)),
            config,
            resource,
            url,
        })
    }

    /// Exporter settings in use
    pub fn config(&self) -> &CloudMonitoringConfig {
        &self.config
    }

    /// Resource every series is attached to
    pub fn resource(&self) -> &MonitoredResource {
        &self.resource
    }

    fn take_buffer(&self) -> Vec<MetricRecord> {
        let mut buffer = self.buffer.lock();
        std::mem::replace(&mut *buffer, Vec::with_capacity(self.config.batch_size))
    }

    fn time_series(&self, record: &MetricRecord) -> [TimeSeries<'_>; 2] {
        let mut labels = BTreeMap::new();
        labels.insert("app", self.config.app_label.clone());
        labels.insert("service", record.service().to_string());
        labels.insert("method", record.method().to_string());

        let mut status_labels = labels.clone();
        status_labels.insert("outcome", record.outcome().as_str().to_string());

        let end_time = timestamp(record.recorded_at());

        [
            TimeSeries {
                metric: Metric {
                    metric_type: self.config.metric_type(LATENCY_METRIC),
                    labels,
                },
                resource: &self.resource,
                metric_kind: "GAUGE",
                value_type: "DOUBLE",
                points: [Point {
                    interval: Interval {
                        end_time: end_time.clone(),
                    },
                    value: TypedValue::DoubleValue(record.latency_ms()),
                }],
            },
            TimeSeries {
                metric: Metric {
                    metric_type: self.config.metric_type(STATUS_METRIC),
                    labels: status_labels,
                },
                resource: &self.resource,
                metric_kind: "GAUGE",
                value_type: "INT64",
                points: [Point {
                    interval: Interval { end_time },
                    value: TypedValue::Int64Value(record.effective_status_code().to_string()),
                }],
            },
        ]
    }

    fn build_request(&self, records: &[MetricRecord]) -> CreateTimeSeriesRequest<'_> {
        CreateTimeSeriesRequest {
            time_series: records
                .iter()
                .flat_map(|record| self.time_series(record))
                .collect(),
        }
    }

    async fn post(&self, body: &CreateTimeSeriesRequest<'_>) -> SinkResult<()> {
        let mut request = self.client.post(&self.url).json(body);
        if let Some(token) = &self.config.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        Err(SinkError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    /// Export records, one request per partition. Every partition is
    /// attempted; the first error is returned.
    #[instrument(skip(self, records), fields(records = records.len()))]
    async fn export(&self, records: Vec<MetricRecord>) -> SinkResult<()> {
        let mut first_error = None;

        for batch in partition_batches(records, self.config.batch_size) {
            let body = self.build_request(&batch);
            let result = retry_if(
                &self.config.retry,
                || self.post(&body),
                SinkError::is_retryable,
            )
            .await;

            match result {
                Ok(()) => info!(
                    records = batch.len(),
                    series = body.time_series.len(),
                    "Metrics pushed"
                ),
                Err(error) => {
                    debug!(records = batch.len(), error = %error, "Export request failed");
                    first_error.get_or_insert(error);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl MetricSink for CloudMonitoringSink {
    async fn write(&self, record: &MetricRecord) -> SinkResult<()> {
        let full = {
            let mut buffer = self.buffer.lock();
            buffer.push(record.clone());
            buffer.len() >= self.config.batch_size
        };

        if full {
            self.export(self.take_buffer()).await
        } else {
            Ok(())
        }
    }

    async fn flush(&self) -> SinkResult<()> {
        let pending = self.take_buffer();
        if pending.is_empty() {
            return Ok(());
        }
        self.export(pending).await
    }

    fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    fn name(&self) -> &str {
        "cloud_monitoring"
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Split records into batches of at most `max` where no batch holds two
/// records for the same service and method, since the API rejects a request
/// that writes one series twice. Records keep their relative order within
/// each series.
pub fn partition_batches(records: Vec<MetricRecord>, max: usize) -> Vec<Vec<MetricRecord>> {
    let max = max.max(1);
    let mut batches: Vec<(HashSet<(String, String)>, Vec<MetricRecord>)> = Vec::new();

    for record in records {
        let key = (record.service().to_string(), record.method().to_string());
        // The last batch holding this key bounds where the record may go
        let after = batches
            .iter()
            .rposition(|(keys, _)| keys.contains(&key))
            .map_or(0, |index| index + 1);

        match batches[after..]
            .iter_mut()
            .find(|(_, items)| items.len() < max)
        {
            Some((keys, items)) => {
                keys.insert(key);
                items.push(record);
            }
            None => batches.push((HashSet::from([key]), vec![record])),
        }
    }

    batches.into_iter().map(|(_, items)| items).collect()
}
