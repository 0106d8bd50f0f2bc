//! Metrics layer for gRPC requests
//!
//! Sits in front of the tonic router and measures every call. The service
//! and method come from the request path (`/package.Service/Method`). A
//! trailers-only response carries its `grpc-status` in the headers and is
//! recorded as soon as the inner service answers. Any other response is
//! recorded when its body ends, from the `grpc-status` trailer, so streaming
//! calls report their final status and full duration.

use futures::future::BoxFuture;
use http_body::{Body, SizeHint};
use rpc_metrics_application::{CallGuard, Interceptor};
use rpc_metrics_domain::Outcome;
use std::pin::Pin;
use std::task::{Context, Poll};
use tonic::codegen::http::{HeaderMap, Request, Response};
use tonic::Code;
use tower::{Layer, Service};

const GRPC_STATUS: &str = "grpc-status";

/// Tower layer adding call metrics to a service
#[derive(Debug, Clone)]
pub struct MetricsLayer {
    interceptor: Interceptor,
}

impl MetricsLayer {
    /// Create a metrics layer recording through `interceptor`
    pub fn new(interceptor: Interceptor) -> Self {
        Self { interceptor }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            interceptor: self.interceptor.clone(),
        }
    }
}

/// Service produced by [`MetricsLayer`]
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
    interceptor: Interceptor,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for MetricsService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ResBody: Body + Send + 'static,
{
    type Response = Response<MetricsBody<ResBody>>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        // Dropping the returned future before completion records the call as cancelled
        let guard = self.interceptor.begin(request.uri().path());
        let future = self.inner.call(request);

        Box::pin(async move {
            match future.await {
                Ok(response) => {
                    let guard = match status_code(response.headers()) {
                        Some(code) => {
                            guard.finish_with_status(outcome_for(code), code as i32);
                            None
                        }
                        None => Some(guard),
                    };
                    Ok(response.map(|body| MetricsBody::new(body, guard)))
                }
                Err(error) => {
                    guard.finish(Outcome::Error);
                    Err(error)
                }
            }
        })
    }
}

/// Response body that records the call once the body ends.
///
/// The `grpc-status` trailer decides the outcome; a body error records
/// `Error`. A body dropped before its end records `Cancelled`.
pub struct MetricsBody<B: Body> {
    inner: Pin<Box<B>>,
    guard: Option<CallGuard>,
}

impl<B: Body> MetricsBody<B> {
    fn new(inner: B, guard: Option<CallGuard>) -> Self {
        Self {
            inner: Box::pin(inner),
            guard,
        }
    }

    fn finish(&mut self, outcome: Outcome, status: Option<Code>) {
        if let Some(guard) = self.guard.take() {
            match status {
                Some(code) => guard.finish_with_status(outcome, code as i32),
                None => guard.finish(outcome),
            }
        }
    }
}

impl<B: Body> Body for MetricsBody<B> {
    type Data = B::Data;
    type Error = B::Error;

    fn poll_data(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Self::Data, Self::Error>>> {
        let this = self.get_mut();
        let polled = this.inner.as_mut().poll_data(cx);
        if let Poll::Ready(Some(Err(_))) = &polled {
            this.finish(Outcome::Error, None);
        }
        polled
    }

    fn poll_trailers(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<HeaderMap>, Self::Error>> {
        let this = self.get_mut();
        let polled = this.inner.as_mut().poll_trailers(cx);
        match &polled {
            Poll::Ready(Ok(trailers)) => match trailers.as_ref().and_then(status_code) {
                Some(code) => this.finish(outcome_for(code), Some(code)),
                None => this.finish(Outcome::Success, None),
            },
            Poll::Ready(Err(_)) => this.finish(Outcome::Error, None),
            Poll::Pending => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B: Body> Drop for MetricsBody<B> {
    fn drop(&mut self) {
        // A body that ended without trailers completed normally; otherwise the
        // guard records the call as cancelled
        if self.inner.is_end_stream() {
            self.finish(Outcome::Success, None);
        }
    }
}

impl<B: Body> std::fmt::Debug for MetricsBody<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsBody")
            .field("pending", &self.guard.is_some())
            .finish()
    }
}

/// gRPC status carried in the response headers.
///
/// Tonic sends errors as trailers-only responses, so a failed unary call has
/// its status here. A successful call reports `grpc-status` in the trailers
/// and has none in the headers.
pub fn status_code(headers: &HeaderMap) -> Option<Code> {
    headers
        .get(GRPC_STATUS)
        .map(|value| Code::from_bytes(value.as_bytes()))
}

/// Map a gRPC status code onto a call outcome
pub fn outcome_for(code: Code) -> Outcome {
    match code {
        Code::Ok => Outcome::Success,
        Code::Cancelled => Outcome::Cancelled,
        _ => Outcome::Error,
    }
}
