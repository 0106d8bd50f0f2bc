//! Metric records emitted once per completed RPC call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Sentinel used for service and method when a call cannot be classified.
pub const UNKNOWN: &str = "unknown";

/// Final outcome of a handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    /// Handler returned normally
    Success,
    /// Handler returned an error or panicked
    Error,
    /// Handler was cancelled before it produced a result
    Cancelled,
}

impl Outcome {
    /// Lowercase label used in logs and metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Error => "error",
            Outcome::Cancelled => "cancelled",
        }
    }

    /// Status code reported when the framework did not supply one.
    ///
    /// Values follow the gRPC code space: OK, UNKNOWN and CANCELLED.
    pub fn default_status_code(&self) -> i32 {
        match self {
            Outcome::Success => 0,
            Outcome::Error => 2,
            Outcome::Cancelled => 1,
        }
    }

    /// Whether this outcome counts as a failed call
    pub fn is_failure(&self) -> bool {
        !matches!(self, Outcome::Success)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `(service, method)` pair a call was classified as.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallIdentity {
    service: String,
    method: String,
}

impl CallIdentity {
    /// Create an identity from service and method names
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
        }
    }

    /// Identity used when classification fails
    pub fn unknown() -> Self {
        Self::new(UNKNOWN, UNKNOWN)
    }

    /// Service name
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Method name
    pub fn method(&self) -> &str {
        &self.method
    }

    /// True when this is the `unknown/unknown` sentinel
    pub fn is_unknown(&self) -> bool {
        self.service == UNKNOWN && self.method == UNKNOWN
    }
}

impl fmt::Display for CallIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.service, self.method)
    }
}

/// Immutable snapshot of one completed call.
///
/// Built by the interceptor after the handler finished and handed to exactly
/// one sink write. Fields are only readable through accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    service: String,
    method: String,
    #[serde(rename = "latency_ms", with = "duration_ms")]
    latency: Duration,
    outcome: Outcome,
    status_code: Option<i32>,
    recorded_at: DateTime<Utc>,
}

impl MetricRecord {
    /// Create a record stamped with the current wall time
    pub fn new(identity: CallIdentity, latency: Duration, outcome: Outcome) -> Self {
        Self {
            service: identity.service,
            method: identity.method,
            latency,
            outcome,
            status_code: None,
            recorded_at: Utc::now(),
        }
    }

    /// Attach the framework-reported status code
    pub fn with_status_code(mut self, code: i32) -> Self {
        self.status_code = Some(code);
        self
    }

    /// Override the completion time
    pub fn with_recorded_at(mut self, recorded_at: DateTime<Utc>) -> Self {
        self.recorded_at = recorded_at;
        self
    }

    /// Service name, or `"unknown"`
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Method name, or `"unknown"`
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Measured handler latency
    pub fn latency(&self) -> Duration {
        self.latency
    }

    /// Latency in fractional milliseconds
    pub fn latency_ms(&self) -> f64 {
        self.latency.as_secs_f64() * 1000.0
    }

    /// Final outcome of the call
    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    /// Status code reported by the framework, if any
    pub fn status_code(&self) -> Option<i32> {
        self.status_code
    }

    /// Status code to export: the reported one, or the outcome's default
    pub fn effective_status_code(&self) -> i32 {
        self.status_code
            .unwrap_or_else(|| self.outcome.default_status_code())
    }

    /// Wall time at which the call completed
    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    /// True when the call could not be classified
    pub fn is_unclassified(&self) -> bool {
        self.service == UNKNOWN && self.method == UNKNOWN
    }
}

/// Serializes a `Duration` as fractional milliseconds (`latency_ms` on the wire).
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64() * 1000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = f64::deserialize(deserializer)?;
        if !ms.is_finite() || ms < 0.0 {
            return Err(serde::de::Error::custom("latency must be a non-negative number"));
        }
        Ok(Duration::from_secs_f64(ms / 1000.0))
    }
}
