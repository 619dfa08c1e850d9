//! Catalog server: stores, handlers, authorization guard and configuration.

/// Disk-backed asset storage.
pub mod assets;

/// Server configuration.
pub mod config;

/// Per-call cancellation and deadline.
pub mod context;

/// Authorization guard wrapping the generated services.
pub mod guard;

/// gRPC service implementations.
pub mod service;

/// Entity and rating stores.
pub mod state;

/// Upload and rating stream loops.
pub mod streaming;

use tokio_util::sync::CancellationToken;
use tracing::info;

pub use assets::{AssetRecord, DiskAssetStore};
pub use config::ServerConfig;
pub use context::CallContext;
pub use guard::{AuthGuard, Authorizer};
pub use service::{AuthServiceImpl, CatalogServiceImpl};
pub use state::{EntityStore, Rating, RatingStore};

use crate::auth::{Account, AccountStore, LoginService, Role, TokenManager};
use crate::proto::auth_service_server::AuthServiceServer;
use crate::proto::catalog_service_server::CatalogServiceServer;
use crate::Result;

/// Accounts created at startup: `(username, password, role)`.
pub const SEED_ACCOUNTS: [(&str, &str, Role); 2] = [
    ("admin1", "secret", Role::Admin),
    ("user1", "secret", Role::User),
];

/// Both services, wrapped by the authorization guard and ready to serve.
pub struct CatalogServer {
    /// `AuthService`.
    pub auth: AuthGuard<AuthServiceServer<AuthServiceImpl>>,
    /// `CatalogService`.
    pub catalog: AuthGuard<CatalogServiceServer<CatalogServiceImpl>>,
    /// Stores shared with the handlers, exposed for inspection.
    pub entities: EntityStore,
    /// Asset store shared with the upload handler.
    pub assets: DiskAssetStore,
    /// Rating store shared with the rating handler.
    pub ratings: RatingStore,
}

impl CatalogServer {
    /// Builds the stores, seeds the accounts and wires the services.
    ///
    /// Cancelling `shutdown` cancels every in-flight call.
    pub async fn build(config: &ServerConfig, shutdown: CancellationToken) -> Result<Self> {
        let accounts = AccountStore::new();
        for (username, password, role) in SEED_ACCOUNTS {
            accounts
                .save(&Account::new(username, password, role)?)
                .await?;
        }
        info!(accounts = accounts.len().await, "accounts seeded");

        let tokens = TokenManager::new(config.auth.secret.as_bytes(), config.auth.token_ttl());
        let authorizer = Authorizer::new(config.auth.access_policy()?, tokens.clone());
        let login = LoginService::new(accounts, tokens)?;

        let entities = EntityStore::new();
        let ratings = RatingStore::new();
        let assets = DiskAssetStore::open(&config.assets.folder).await?;
        info!(folder = %assets.folder().display(), "asset store opened");

        let catalog = CatalogServiceImpl::new(
            entities.clone(),
            ratings.clone(),
            assets.clone(),
            config.assets.max_size,
            shutdown,
        );

        Ok(Self {
            auth: authorizer.guard(AuthServiceServer::new(AuthServiceImpl::new(login))),
            catalog: authorizer.guard(CatalogServiceServer::new(catalog)),
            entities,
            assets,
            ratings,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::proto::FILE_DESCRIPTOR_SET;

    #[test]
    fn descriptor_set_serves_reflection() {
        let reflection = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1();
        assert!(reflection.is_ok());

        for service in [&b"AuthService"[..], b"CatalogService"] {
            assert!(FILE_DESCRIPTOR_SET
                .windows(service.len())
                .any(|window| window == service));
        }
    }
}
