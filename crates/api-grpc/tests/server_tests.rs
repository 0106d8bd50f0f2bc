//! End-to-end tests: a real server on a local socket, called through tonic

use rpc_metrics_api_grpc::{GrpcServer, ServerConfig};
use rpc_metrics_application::{DispatcherConfig, Interceptor, SinkDispatcher};
use rpc_metrics_domain::{InMemorySink, Outcome};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tonic::Code;
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;

#[tokio::test]
async fn test_health_checks_are_measured() {
    let sink = InMemorySink::new();
    let dispatcher = SinkDispatcher::spawn(Arc::new(sink.clone()), DispatcherConfig::default());
    let interceptor = Interceptor::new(dispatcher.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = GrpcServer::new(
        ServerConfig {
            addr,
            ..ServerConfig::default()
        },
        interceptor,
    );

    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.serve_with_listener(listener, async {
        let _ = stopped.await;
    }));

    let channel = tonic::transport::Endpoint::new(format!("http://{}", addr))
        .unwrap()
        .connect()
        .await
        .unwrap();
    let mut client = HealthClient::new(channel);

    let serving = client
        .check(HealthCheckRequest {
            service: String::new(),
        })
        .await
        .unwrap();
    assert_eq!(serving.into_inner().status, ServingStatus::Serving as i32);

    let missing = client
        .check(HealthCheckRequest {
            service: "missing.Service".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(missing.code(), Code::NotFound);

    drop(client);
    stop.send(()).unwrap();
    handle.await.unwrap().unwrap();

    dispatcher.shutdown().await.unwrap();
    let records = sink.records();
    assert_eq!(records.len(), 2);
    for record in &records {
        assert_eq!(record.service(), "grpc.health.v1.Health");
        assert_eq!(record.method(), "Check");
    }
    assert_eq!(records[0].outcome(), Outcome::Success);
    assert_eq!(records[0].status_code(), Some(Code::Ok as i32));
    assert_eq!(records[1].outcome(), Outcome::Error);
    assert_eq!(records[1].status_code(), Some(Code::NotFound as i32));
}

#[tokio::test]
async fn test_bind_failure_is_reported() {
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = taken.local_addr().unwrap();

    let dispatcher = SinkDispatcher::spawn(
        Arc::new(InMemorySink::new()),
        DispatcherConfig::default(),
    );
    let server = GrpcServer::new(
        ServerConfig {
            addr,
            ..ServerConfig::default()
        },
        Interceptor::new(dispatcher),
    );

    let result = server.serve_with_shutdown(async {}).await;
    assert!(matches!(result, Err(rpc_metrics_api_grpc::GrpcError::Bind(_))));
}
