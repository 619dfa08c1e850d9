//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use std::time::Duration;

use catalog_rpc::auth::methods;
use catalog_rpc::client::{AuthClient, AuthInterceptor, CatalogClient};
use catalog_rpc::proto::Entity;
use catalog_rpc::server::{CatalogServer, DiskAssetStore, EntityStore, RatingStore, ServerConfig};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Server};

/// Initialize test tracing (call once at the beginning of tests).
///
/// Only logs from this crate are shown, filtering out HTTP/2 and tower noise.
/// Subsequent calls are safe and will be ignored.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new("catalog_rpc=debug");

    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(filter)
        .try_init();
}

/// A running server plus handles onto its stores.
pub struct TestServer {
    pub url: String,
    pub channel: Channel,
    pub entities: EntityStore,
    pub assets: DiskAssetStore,
    pub ratings: RatingStore,
    pub shutdown: CancellationToken,
    _assets_dir: TempDir,
}

impl TestServer {
    /// Logs in and returns a catalog client carrying that account's token.
    pub async fn catalog_as(&self, username: &str) -> CatalogClient {
        let token = self.login(username).await.expect("login should succeed");
        let interceptor = AuthInterceptor::new(methods::PROTECTED);
        interceptor.set_token(token);
        CatalogClient::new(self.channel.clone(), interceptor)
    }

    /// Catalog client that never attaches a token.
    pub fn anonymous_catalog(&self) -> CatalogClient {
        CatalogClient::new(self.channel.clone(), AuthInterceptor::new(Vec::<String>::new()))
    }

    pub async fn login(&self, username: &str) -> catalog_rpc::Result<String> {
        AuthClient::new(self.channel.clone(), username, "secret")
            .login()
            .await
    }
}

pub async fn start_test_server() -> TestServer {
    start_test_server_with(|_| {}).await
}

/// Starts a server on an ephemeral port after letting `configure` adjust the
/// default configuration.
pub async fn start_test_server_with(configure: impl FnOnce(&mut ServerConfig)) -> TestServer {
    init_tracing();

    let assets_dir = tempfile::tempdir().unwrap();
    let mut config = ServerConfig::default();
    config.auth.secret = "integration-secret".to_string();
    config.assets.folder = assets_dir.path().to_path_buf();
    configure(&mut config);

    let shutdown = CancellationToken::new();
    let server = CatalogServer::build(&config, shutdown.clone())
        .await
        .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let local_addr = listener.local_addr().unwrap();

    let entities = server.entities.clone();
    let assets = server.assets.clone();
    let ratings = server.ratings.clone();
    let stop = shutdown.clone();

    let reflection = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(catalog_rpc::proto::FILE_DESCRIPTOR_SET)
        .build_v1()
        .unwrap();

    tokio::spawn(async move {
        Server::builder()
            .add_service(reflection)
            .add_service(server.auth)
            .add_service(server.catalog)
            .serve_with_incoming_shutdown(
                tokio_stream::wrappers::TcpListenerStream::new(listener),
                stop.cancelled_owned(),
            )
            .await
            .unwrap();
    });

    tokio::time::sleep(Duration::from_millis(100)).await;

    let url = format!("http://{local_addr}");
    let channel = Channel::from_shared(url.clone())
        .unwrap()
        .connect()
        .await
        .unwrap();

    TestServer {
        url,
        channel,
        entities,
        assets,
        ratings,
        shutdown,
        _assets_dir: assets_dir,
    }
}

pub fn laptop(id: &str, price_usd: f64, cpu_cores: u32, ram_gb: u32) -> Entity {
    Entity {
        id: id.to_string(),
        brand: "Acme".to_string(),
        name: format!("Laptop {cpu_cores}c"),
        cpu_cores,
        cpu_ghz: 2.8,
        ram_gb,
        price_usd,
        release_year: 2024,
    }
}
