//! Tests for the metrics layer in front of a tower service

use http_body::Body;
use rpc_metrics_api_grpc::MetricsLayer;
use rpc_metrics_application::{DispatcherConfig, Interceptor, SinkDispatcher};
use rpc_metrics_domain::{InMemorySink, Outcome, UNKNOWN};
use rpc_metrics_testing::{ManualClock, INVENTORY_GET_ITEM};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tonic::codegen::http::{HeaderMap, HeaderValue, Request, Response};
use tower::{service_fn, Layer, Service, ServiceExt};

/// Body yielding queued frames, then optional trailers
#[derive(Default)]
struct TestBody {
    frames: VecDeque<Result<&'static [u8], String>>,
    trailers: Option<HeaderMap>,
}

impl TestBody {
    fn empty() -> Self {
        Self::default()
    }

    fn stream(frames: &[&'static str], status: Option<&'static str>) -> Self {
        Self {
            frames: frames.iter().map(|frame| Ok(frame.as_bytes())).collect(),
            trailers: status.map(|code| {
                let mut trailers = HeaderMap::new();
                trailers.insert("grpc-status", HeaderValue::from_static(code));
                trailers
            }),
        }
    }

    fn failing_after(frame: &'static str) -> Self {
        Self {
            frames: VecDeque::from([Ok(frame.as_bytes()), Err("stream reset".to_string())]),
            trailers: None,
        }
    }
}

impl Body for TestBody {
    type Data = &'static [u8];
    type Error = String;

    fn poll_data(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Self::Data, Self::Error>>> {
        Poll::Ready(self.frames.pop_front())
    }

    fn poll_trailers(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Result<Option<HeaderMap>, Self::Error>> {
        Poll::Ready(Ok(self.trailers.take()))
    }

    fn is_end_stream(&self) -> bool {
        self.frames.is_empty() && self.trailers.is_none()
    }
}

fn setup() -> (InMemorySink, MetricsLayer, Interceptor, ManualClock) {
    let sink = InMemorySink::new();
    let clock = ManualClock::new();
    let dispatcher = SinkDispatcher::spawn(Arc::new(sink.clone()), DispatcherConfig::default());
    let interceptor = Interceptor::new(dispatcher).with_clock(Arc::new(clock.clone()));
    (sink, MetricsLayer::new(interceptor.clone()), interceptor, clock)
}

fn request(path: &str) -> Request<()> {
    Request::builder().uri(path).body(()).unwrap()
}

fn status_response(code: &str) -> Response<TestBody> {
    Response::builder()
        .header("grpc-status", code)
        .body(TestBody::empty())
        .unwrap()
}

/// Read a body to its end, returning the number of frames seen
async fn drain<B: Body + Unpin>(body: &mut B) -> usize {
    let mut frames = 0;
    while let Some(frame) = body.data().await {
        if frame.is_err() {
            return frames;
        }
        frames += 1;
    }
    let _ = body.trailers().await;
    frames
}

#[tokio::test]
async fn test_ok_response_records_success_with_latency() {
    let (sink, layer, interceptor, clock) = setup();
    let handler_clock = clock.clone();
    let service = layer.layer(service_fn(move |_req: Request<()>| {
        let clock = handler_clock.clone();
        async move {
            clock.advance(Duration::from_millis(12));
            Ok::<_, Infallible>(Response::new(TestBody::empty()))
        }
    }));

    let mut response = service.oneshot(request(INVENTORY_GET_ITEM)).await.unwrap();
    assert!(response.headers().get("grpc-status").is_none());
    assert_eq!(drain(response.body_mut()).await, 0);

    interceptor.dispatcher().flush().await.unwrap();
    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].service(), "Inventory");
    assert_eq!(records[0].method(), "GetItem");
    assert_eq!(records[0].latency(), Duration::from_millis(12));
    assert_eq!(records[0].outcome(), Outcome::Success);
    assert_eq!(records[0].effective_status_code(), 0);
}

#[tokio::test]
async fn test_error_status_header_records_error() {
    let (sink, layer, interceptor, _clock) = setup();
    let service = layer.layer(service_fn(|_req: Request<()>| async {
        Ok::<_, Infallible>(status_response("5"))
    }));

    let response = service.oneshot(request(INVENTORY_GET_ITEM)).await.unwrap();
    // The response reaches the caller untouched
    assert_eq!(response.headers()["grpc-status"], "5");

    interceptor.dispatcher().flush().await.unwrap();
    let records = sink.records();
    assert_eq!(records[0].outcome(), Outcome::Error);
    assert_eq!(records[0].status_code(), Some(5));
}

#[tokio::test]
async fn test_cancelled_status_records_cancelled() {
    let (sink, layer, interceptor, _clock) = setup();
    let service = layer.layer(service_fn(|_req: Request<()>| async {
        Ok::<_, Infallible>(status_response("1"))
    }));

    service.oneshot(request(INVENTORY_GET_ITEM)).await.unwrap();

    interceptor.dispatcher().flush().await.unwrap();
    assert_eq!(sink.records()[0].outcome(), Outcome::Cancelled);
    assert_eq!(sink.records()[0].status_code(), Some(1));
}

#[tokio::test]
async fn test_inner_error_is_passed_through() {
    let (sink, layer, interceptor, _clock) = setup();
    let service = layer.layer(service_fn(|_req: Request<()>| async {
        Err::<Response<TestBody>, _>("connection reset".to_string())
    }));

    let result = service.oneshot(request(INVENTORY_GET_ITEM)).await;
    assert_eq!(result.unwrap_err(), "connection reset");

    interceptor.dispatcher().flush().await.unwrap();
    assert_eq!(sink.records()[0].outcome(), Outcome::Error);
}

#[tokio::test]
async fn test_dropped_call_records_cancelled() {
    let (sink, layer, interceptor, _clock) = setup();
    let mut service = layer.layer(service_fn(|_req: Request<()>| {
        futures::future::pending::<Result<Response<TestBody>, Infallible>>()
    }));

    let call = service.ready().await.unwrap().call(request(INVENTORY_GET_ITEM));
    let timed_out = tokio::time::timeout(Duration::from_millis(10), call).await;
    assert!(timed_out.is_err());

    interceptor.dispatcher().flush().await.unwrap();
    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome(), Outcome::Cancelled);
}

#[tokio::test]
async fn test_unparsable_path_records_unknown() {
    let (sink, layer, interceptor, _clock) = setup();
    let mut service = layer.layer(service_fn(|_req: Request<()>| async {
        Ok::<_, Infallible>(Response::new(TestBody::empty()))
    }));

    for path in ["/", "/OnlyService"] {
        service.ready().await.unwrap().call(request(path)).await.unwrap();
    }

    interceptor.dispatcher().flush().await.unwrap();
    let records = sink.records();
    assert_eq!(records.len(), 2);
    for record in records {
        assert_eq!(record.service(), UNKNOWN);
        assert_eq!(record.method(), UNKNOWN);
        assert_eq!(record.outcome(), Outcome::Success);
    }
}

#[tokio::test]
async fn test_stream_error_in_trailers_records_final_status() {
    let (sink, layer, interceptor, clock) = setup();
    let service = layer.layer(service_fn(|_req: Request<()>| async {
        Ok::<_, Infallible>(Response::new(TestBody::stream(&["first", "second"], Some("13"))))
    }));

    let mut response = service.oneshot(request(INVENTORY_GET_ITEM)).await.unwrap();
    interceptor.dispatcher().flush().await.unwrap();
    assert!(sink.is_empty());

    let body = response.body_mut();
    assert!(body.data().await.is_some());
    clock.advance(Duration::from_millis(40));
    assert!(body.data().await.is_some());
    assert!(body.data().await.is_none());
    let trailers = body.trailers().await.unwrap().unwrap();
    assert_eq!(trailers["grpc-status"], "13");

    interceptor.dispatcher().flush().await.unwrap();
    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome(), Outcome::Error);
    assert_eq!(records[0].status_code(), Some(13));
    assert_eq!(records[0].latency(), Duration::from_millis(40));
}

#[tokio::test]
async fn test_ok_trailer_records_success() {
    let (sink, layer, interceptor, _clock) = setup();
    let service = layer.layer(service_fn(|_req: Request<()>| async {
        Ok::<_, Infallible>(Response::new(TestBody::stream(&["reply"], Some("0"))))
    }));

    let mut response = service.oneshot(request(INVENTORY_GET_ITEM)).await.unwrap();
    assert_eq!(drain(response.body_mut()).await, 1);

    interceptor.dispatcher().flush().await.unwrap();
    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome(), Outcome::Success);
    assert_eq!(records[0].status_code(), Some(0));
}

#[tokio::test]
async fn test_body_error_records_error() {
    let (sink, layer, interceptor, _clock) = setup();
    let service = layer.layer(service_fn(|_req: Request<()>| async {
        Ok::<_, Infallible>(Response::new(TestBody::failing_after("partial")))
    }));

    let mut response = service.oneshot(request(INVENTORY_GET_ITEM)).await.unwrap();
    assert_eq!(drain(response.body_mut()).await, 1);
    drop(response);

    interceptor.dispatcher().flush().await.unwrap();
    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome(), Outcome::Error);
}

#[tokio::test]
async fn test_abandoned_stream_records_cancelled() {
    let (sink, layer, interceptor, _clock) = setup();
    let service = layer.layer(service_fn(|_req: Request<()>| async {
        Ok::<_, Infallible>(Response::new(TestBody::stream(&["first", "second"], Some("0"))))
    }));

    let mut response = service.oneshot(request(INVENTORY_GET_ITEM)).await.unwrap();
    assert!(response.body_mut().data().await.is_some());
    drop(response);

    interceptor.dispatcher().flush().await.unwrap();
    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome(), Outcome::Cancelled);
}
