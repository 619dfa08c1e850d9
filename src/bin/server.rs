use std::path::PathBuf;

use catalog_rpc::proto::auth_service_server::AuthServiceServer;
use catalog_rpc::proto::catalog_service_server::CatalogServiceServer;
use catalog_rpc::proto::FILE_DESCRIPTOR_SET;
use catalog_rpc::server::{AuthServiceImpl, CatalogServer, CatalogServiceImpl, ServerConfig};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic_health::server::{health_reporter, HealthReporter};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "server")]
#[command(about = "Authenticated catalog gRPC server", long_about = None)]
#[command(version)]
struct Args {
    /// Host to bind to (overrides config)
    #[arg(short = 'H', long, env = "CATALOG_HOST")]
    host: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(short, long, env = "CATALOG_PORT")]
    port: Option<u16>,

    /// Folder uploaded assets are written to (overrides config)
    #[arg(long, env = "CATALOG_ASSET_FOLDER")]
    asset_folder: Option<PathBuf>,

    /// Enable the Prometheus metrics endpoint
    #[arg(long, env = "METRICS_ENABLED")]
    metrics: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return Err(e.into());
        }
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(folder) = args.asset_folder {
        config.assets.folder = folder;
    }
    config.metrics.enabled |= args.metrics;

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {e}");
        return Err(e.into());
    }

    if config.metrics.enabled {
        let metrics_addr = config.metrics.addr()?;
        match metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(metrics_addr)
            .install()
        {
            Ok(()) => info!("Metrics server started on {metrics_addr}"),
            Err(e) => error!("Failed to start metrics server: {e}"),
        }
    }

    let shutdown = CancellationToken::new();
    let server = CatalogServer::build(&config, shutdown.clone()).await?;

    let reflection = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let (mut health_reporter, health_service) = health_reporter();
    health_reporter
        .set_serving::<AuthServiceServer<AuthServiceImpl>>()
        .await;
    health_reporter
        .set_serving::<CatalogServiceServer<CatalogServiceImpl>>()
        .await;

    let addr = config.server.addr()?;
    info!(
        %addr,
        assets = %config.assets.folder.display(),
        max_asset_size = config.assets.max_size,
        token_ttl_secs = config.auth.token_ttl_secs,
        "server starting"
    );

    let result = Server::builder()
        .add_service(health_service)
        .add_service(reflection)
        .add_service(server.auth)
        .add_service(server.catalog)
        .serve_with_shutdown(addr, shutdown_signal(health_reporter, shutdown))
        .await;

    match result {
        Ok(()) => {
            info!("Server shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("Server error: {e}");
            Err(e.into())
        }
    }
}

async fn shutdown_signal(mut health_reporter: HealthReporter, shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }

    health_reporter
        .set_not_serving::<AuthServiceServer<AuthServiceImpl>>()
        .await;
    health_reporter
        .set_not_serving::<CatalogServiceServer<CatalogServiceImpl>>()
        .await;

    // In-flight streams observe this through their call contexts.
    shutdown.cancel();
    info!("Initiating graceful shutdown");
}
