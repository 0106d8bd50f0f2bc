//! RPC metrics server
//!
//! Serves gRPC behind the metrics layer and exports per-call latency and
//! outcome to the configured sink.

use anyhow::{Context, Result};
use clap::Parser;
use rpc_metrics_api_grpc::{GrpcServer, ServerConfig};
use rpc_metrics_application::{DispatcherConfig, Interceptor, SinkDispatcher};
use rpc_metrics_common::{init_tracing, AppConfig, SinkProvider};
use rpc_metrics_infrastructure::build_sink;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "rpc-metrics-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "RPC_METRICS_CONFIG")]
    config: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "RPC_METRICS_PORT")]
    port: Option<u16>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Metric sink (cloud_monitoring, logging, noop)
    #[arg(long, env = "RPC_METRICS_SINK")]
    sink: Option<SinkProvider>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load_unvalidated(args.config.as_deref())?;

    // Override with CLI arguments
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if args.json_logs {
        config.telemetry.json_logging = true;
    }
    if let Some(sink) = args.sink {
        config.sink.provider = sink;
    }
    config
        .validate()
        .context("Invalid configuration after applying command line overrides")?;

    init_tracing(&config.telemetry)?;

    info!(
        service = %config.telemetry.service_name,
        port = config.server.port,
        sink = ?config.sink.provider,
        "Starting RPC metrics server"
    );

    let sink = build_sink(&config)?;
    let dispatcher = SinkDispatcher::spawn(sink, DispatcherConfig::from(&config.dispatcher));
    let interceptor = Interceptor::new(dispatcher.clone());

    let server = GrpcServer::new(ServerConfig::from_app_config(&config)?, interceptor);
    if let Err(e) = server.serve_with_shutdown(shutdown_signal()).await {
        error!(error = %e, "gRPC server error");
    }

    // Drain queued records and flush the sink before exiting
    if let Err(e) = dispatcher.shutdown().await {
        error!(error = %e, "Metrics dispatcher did not shut down cleanly");
    }

    let stats = dispatcher.stats();
    info!(
        enqueued = stats.enqueued,
        dropped = stats.dropped,
        accepted = stats.accepted,
        failed = stats.failed,
        flush_failures = stats.flush_failures,
        "Metrics dispatcher stopped"
    );

    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
