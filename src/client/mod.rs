//! Client side: login, token attachment and catalog call helpers.
//!
//! A typical client logs in through [`AuthClient`], starts a
//! [`TokenRefresher`] feeding an [`AuthInterceptor`], and issues catalog calls
//! through a [`CatalogClient`] built on the same interceptor.

/// Token-attaching interceptor.
pub mod interceptor;

/// Background token refresh.
pub mod refresher;

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use tonic::codegen::InterceptedService;
use tonic::transport::Channel;
use tonic::Request;
use tracing::{debug, info};

pub use interceptor::AuthInterceptor;
pub use refresher::{TokenRefresher, TokenSource};

use crate::proto::auth_service_client::AuthServiceClient;
use crate::proto::catalog_service_client::CatalogServiceClient;
use crate::proto::upload_asset_request::Data;
use crate::proto::{
    AssetInfo, CreateEntityRequest, Entity, Filter, LoginRequest, RateEntityRequest,
    RateEntityResponse, SearchEntitiesRequest, UploadAssetRequest, UploadAssetResponse,
};
use crate::{Error, Result};

/// Timeout applied to login and search calls.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Size of each uploaded chunk.
pub const CHUNK_SIZE: usize = 1024;

async fn within<T, F>(timeout: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| Error::DeadlineExceeded)?
}

/// Logs in with fixed credentials.
#[derive(Clone)]
pub struct AuthClient {
    client: AuthServiceClient<Channel>,
    username: String,
    password: String,
}

impl AuthClient {
    /// Creates a login client for one account.
    pub fn new(channel: Channel, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            client: AuthServiceClient::new(channel),
            username: username.into(),
            password: password.into(),
        }
    }

    /// Exchanges the credentials for an access token.
    pub async fn login(&self) -> Result<String> {
        let mut client = self.client.clone();
        let mut request = Request::new(LoginRequest {
            username: self.username.clone(),
            password: self.password.clone(),
        });
        request.set_timeout(CALL_TIMEOUT);

        within(CALL_TIMEOUT, async move {
            let response = client.login(request).await?;
            Ok::<_, Error>(response.into_inner().access_token)
        })
        .await
    }
}

#[tonic::async_trait]
impl TokenSource for AuthClient {
    async fn login(&self) -> Result<String> {
        AuthClient::login(self).await
    }
}

/// Catalog calls over a token-attaching channel.
#[derive(Clone)]
pub struct CatalogClient {
    client: CatalogServiceClient<InterceptedService<Channel, AuthInterceptor>>,
}

impl CatalogClient {
    /// Creates a catalog client whose calls pass through `interceptor`.
    pub fn new(channel: Channel, interceptor: AuthInterceptor) -> Self {
        Self {
            client: CatalogServiceClient::with_interceptor(channel, interceptor),
        }
    }

    /// Creates an entity and returns its id.
    pub async fn create_entity(&mut self, entity: Entity) -> Result<String> {
        let response = self
            .client
            .create_entity(CreateEntityRequest {
                entity: Some(entity),
            })
            .await?;

        let id = response.into_inner().id;
        info!(%id, "entity created");
        Ok(id)
    }

    /// Collects every entity matching `filter`.
    pub async fn search_entities(&mut self, filter: Filter) -> Result<Vec<Entity>> {
        let mut request = Request::new(SearchEntitiesRequest {
            filter: Some(filter),
        });
        request.set_timeout(CALL_TIMEOUT);

        let client = &mut self.client;
        within(CALL_TIMEOUT, async move {
            let mut stream = client.search_entities(request).await?.into_inner();

            let mut found = Vec::new();
            while let Some(response) = stream.message().await? {
                if let Some(entity) = response.entity {
                    debug!(id = %entity.id, "found entity");
                    found.push(entity);
                }
            }
            Ok::<_, Error>(found)
        })
        .await
    }

    /// Uploads the file at `path` as an asset of `entity_id`.
    ///
    /// The file extension, with its leading dot, becomes the asset type.
    pub async fn upload_asset(&mut self, entity_id: &str, path: &Path) -> Result<UploadAssetResponse> {
        let data = tokio::fs::read(path).await?;
        let asset_type = path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();

        let mut messages = vec![UploadAssetRequest {
            data: Some(Data::Info(AssetInfo {
                entity_id: entity_id.to_string(),
                asset_type,
            })),
        }];
        messages.extend(data.chunks(CHUNK_SIZE).map(|chunk| UploadAssetRequest {
            data: Some(Data::ChunkData(chunk.to_vec())),
        }));

        let response = self
            .client
            .upload_asset(tokio_stream::iter(messages))
            .await?
            .into_inner();

        info!(id = %response.id, size = response.size, "asset uploaded");
        Ok(response)
    }

    /// Sends every `(entity_id, score)` pair on one stream and returns the
    /// echoes in order.
    pub async fn rate_entities(&mut self, ratings: Vec<(String, f64)>) -> Result<Vec<RateEntityResponse>> {
        let requests = ratings
            .into_iter()
            .map(|(entity_id, score)| RateEntityRequest { entity_id, score })
            .collect::<Vec<_>>();
        let expected = requests.len();

        let mut stream = self
            .client
            .rate_entity(tokio_stream::iter(requests))
            .await?
            .into_inner();

        let mut echoes = Vec::with_capacity(expected);
        while let Some(echo) = stream.message().await? {
            info!(
                entity_id = %echo.entity_id,
                rated_count = echo.rated_count,
                average_score = echo.average_score,
                "rating applied"
            );
            echoes.push(echo);
        }
        Ok(echoes)
    }
}
