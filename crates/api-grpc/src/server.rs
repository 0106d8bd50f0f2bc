//! gRPC Server implementation

use crate::error::{GrpcError, GrpcResult};
use crate::interceptors::MetricsLayer;
use rpc_metrics_application::Interceptor;
use rpc_metrics_common::AppConfig;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::info;

/// gRPC server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub addr: SocketAddr,
    /// Enable health service
    pub enable_health: bool,
    /// Maximum concurrent streams
    pub max_concurrent_streams: Option<u32>,
    /// Request timeout
    pub timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 50051)),
            enable_health: true,
            max_concurrent_streams: Some(1000),
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl ServerConfig {
    /// Derive server settings from the application configuration
    pub fn from_app_config(config: &AppConfig) -> GrpcResult<Self> {
        let addr = config
            .bind_addr()
            .map_err(|e| GrpcError::Config(format!("{:#}", e)))?;

        Ok(Self {
            addr,
            enable_health: config.server.enable_health,
            timeout: Some(config.request_timeout()),
            ..Self::default()
        })
    }
}

/// gRPC server whose every call passes through [`MetricsLayer`]
pub struct GrpcServer {
    config: ServerConfig,
    interceptor: Interceptor,
}

impl GrpcServer {
    /// Create a new gRPC server recording calls through `interceptor`
    pub fn new(config: ServerConfig, interceptor: Interceptor) -> Self {
        Self {
            config,
            interceptor,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the configured address and serve until `signal` resolves
    pub async fn serve_with_shutdown<F>(self, signal: F) -> GrpcResult<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.addr).await?;
        self.serve_with_listener(listener, signal).await
    }

    /// Serve on an already bound listener until `signal` resolves
    pub async fn serve_with_listener<F>(self, listener: TcpListener, signal: F) -> GrpcResult<()>
    where
        F: Future<Output = ()>,
    {
        let local_addr = listener.local_addr()?;
        let mut server = Server::builder();

        if let Some(max_streams) = self.config.max_concurrent_streams {
            server = server.max_concurrent_streams(max_streams);
        }

        if let Some(timeout) = self.config.timeout {
            server = server.timeout(timeout);
        }

        let health_service = if self.config.enable_health {
            info!("Enabling health service");
            let (_reporter, service) = tonic_health::server::health_reporter();
            Some(service)
        } else {
            None
        };

        let mut server = server.layer(MetricsLayer::new(self.interceptor));
        let router = server.add_optional_service(health_service);

        info!(addr = %local_addr, "gRPC server listening");

        router
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal)
            .await?;

        info!("gRPC server stopped");
        Ok(())
    }
}
