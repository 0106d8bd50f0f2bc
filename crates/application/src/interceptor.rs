//! RPC call interceptor.
//!
//! Wraps handler execution with timing and metric emission. The handler's
//! result is returned untouched; emitting the record is a side effect that
//! happens on every exit path, including cancellation and panics, because it
//! is tied to the drop of a [`CallGuard`].

use crate::dispatcher::SinkDispatcher;
use rpc_metrics_domain::{
    CallClassifier, CallContext, CallIdentity, Clock, MetricRecord, MonotonicClock, Outcome,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Middleware that measures handler latency and outcome.
///
/// Holds no per-call state; clone it freely into every service.
#[derive(Debug, Clone)]
pub struct Interceptor {
    classifier: CallClassifier,
    dispatcher: SinkDispatcher,
    clock: Arc<dyn Clock>,
}

impl Interceptor {
    /// Create an interceptor feeding `dispatcher`, timed by the monotonic clock
    pub fn new(dispatcher: SinkDispatcher) -> Self {
        Self {
            classifier: CallClassifier::new(),
            dispatcher,
            clock: Arc::new(MonotonicClock),
        }
    }

    /// Replace the clock used to measure latency
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The dispatcher records are sent to
    pub fn dispatcher(&self) -> &SinkDispatcher {
        &self.dispatcher
    }

    /// Classify the call and start its timer.
    ///
    /// The returned guard emits exactly one record: through
    /// [`CallGuard::finish`], or when dropped unfinished.
    pub fn begin<C: CallContext + ?Sized>(&self, context: &C) -> CallGuard {
        let identity = self.classifier.classify(context);
        let started_at = self.clock.now();

        CallGuard {
            identity: Some(identity),
            started_at,
            clock: self.clock.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }

    /// Run an async handler under measurement.
    ///
    /// `Ok` is recorded as success, `Err` as error (cancelled when the
    /// context reports cancellation). The handler's result is returned as is.
    pub async fn wrap<C, F, Fut, T, E>(&self, context: &C, handler: F) -> Result<T, E>
    where
        C: CallContext + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let guard = self.begin(context);
        let result = handler().await;
        guard.finish(outcome_of(&result, context));
        result
    }

    /// Run a synchronous handler under measurement.
    pub fn wrap_blocking<C, F, T, E>(&self, context: &C, handler: F) -> Result<T, E>
    where
        C: CallContext + ?Sized,
        F: FnOnce() -> Result<T, E>,
    {
        let guard = self.begin(context);
        let result = handler();
        guard.finish(outcome_of(&result, context));
        result
    }
}

fn outcome_of<T, E, C: CallContext + ?Sized>(result: &Result<T, E>, context: &C) -> Outcome {
    match result {
        Ok(_) => Outcome::Success,
        Err(_) if context.is_cancelled() => Outcome::Cancelled,
        Err(_) => Outcome::Error,
    }
}

/// Measurement scope for one call.
///
/// Dropping an unfinished guard records `Cancelled`, or `Error` when the
/// thread is unwinding from a panic.
#[must_use = "dropping a CallGuard records the call as cancelled"]
#[derive(Debug)]
pub struct CallGuard {
    identity: Option<CallIdentity>,
    started_at: Instant,
    clock: Arc<dyn Clock>,
    dispatcher: SinkDispatcher,
}

impl CallGuard {
    /// Identity the call was classified as
    pub fn identity(&self) -> Option<&CallIdentity> {
        self.identity.as_ref()
    }

    /// Record the call with `outcome`
    pub fn finish(mut self, outcome: Outcome) {
        self.emit(outcome, None);
    }

    /// Record the call with `outcome` and the framework's status code
    pub fn finish_with_status(mut self, outcome: Outcome, status_code: i32) {
        self.emit(outcome, Some(status_code));
    }

    fn emit(&mut self, outcome: Outcome, status_code: Option<i32>) {
        let Some(identity) = self.identity.take() else {
            return;
        };

        let latency = self.clock.now().saturating_duration_since(self.started_at);
        let mut record = MetricRecord::new(identity, latency, outcome);
        if let Some(code) = status_code {
            record = record.with_status_code(code);
        }

        debug!(
            service = record.service(),
            method = record.method(),
            latency_ms = record.latency_ms(),
            outcome = %outcome,
            "Call completed"
        );

        self.dispatcher.dispatch(record);
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        if self.identity.is_some() {
            let outcome = if std::thread::panicking() {
                Outcome::Error
            } else {
                Outcome::Cancelled
            };
            self.emit(outcome, None);
        }
    }
}
