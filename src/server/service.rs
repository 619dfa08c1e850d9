use std::pin::Pin;
use std::time::Instant;

use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::assets::DiskAssetStore;
use super::context::CallContext;
use super::state::{EntityStore, RatingStore};
use super::streaming::{AssetUpload, RatingSession};
use crate::auth::{Claims, LoginService};
use crate::proto::auth_service_server::AuthService;
use crate::proto::catalog_service_server::CatalogService;
use crate::proto::{
    CreateEntityRequest, CreateEntityResponse, LoginRequest, LoginResponse, RateEntityRequest,
    RateEntityResponse, SearchEntitiesRequest, SearchEntitiesResponse, UploadAssetRequest,
    UploadAssetResponse,
};
use crate::Error;

type ResponseStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

const STREAM_BUFFER: usize = 16;

fn record_outcome<T>(rpc: &str, start: Instant, result: &Result<T, Error>) {
    histogram!(format!("catalog.{rpc}.duration")).record(start.elapsed().as_secs_f64());
    match result {
        Ok(_) => counter!(format!("catalog.{rpc}.success")).increment(1),
        Err(_) => counter!(format!("catalog.{rpc}.failure")).increment(1),
    }
}

fn caller<T>(request: &Request<T>) -> String {
    request
        .extensions()
        .get::<Claims>()
        .map_or_else(|| "anonymous".to_string(), |claims| claims.username().to_string())
}

/// gRPC front of the [`LoginService`].
pub struct AuthServiceImpl {
    login: LoginService,
}

impl AuthServiceImpl {
    /// Creates the login endpoint.
    pub fn new(login: LoginService) -> Self {
        Self { login }
    }
}

#[tonic::async_trait]
impl AuthService for AuthServiceImpl {
    async fn login(
        &self,
        request: Request<LoginRequest>,
    ) -> Result<Response<LoginResponse>, Status> {
        let start = Instant::now();
        counter!("auth.login.requests").increment(1);

        let req = request.into_inner();
        let result = self.login.login(&req.username, &req.password).await;

        histogram!("auth.login.duration").record(start.elapsed().as_secs_f64());
        match result {
            Ok(access_token) => {
                counter!("auth.login.success").increment(1);
                Ok(Response::new(LoginResponse { access_token }))
            }
            Err(e) => {
                counter!("auth.login.failure").increment(1);
                Err(e.into())
            }
        }
    }
}

/// gRPC implementation of the catalog: entities, assets and ratings.
pub struct CatalogServiceImpl {
    entities: EntityStore,
    ratings: RatingStore,
    assets: DiskAssetStore,
    max_asset_size: usize,
    shutdown: CancellationToken,
}

impl CatalogServiceImpl {
    /// Creates the catalog service over the given stores.
    ///
    /// Cancelling `shutdown` cancels every in-flight call.
    pub fn new(
        entities: EntityStore,
        ratings: RatingStore,
        assets: DiskAssetStore,
        max_asset_size: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            entities,
            ratings,
            assets,
            max_asset_size,
            shutdown,
        }
    }

    async fn create(&self, ctx: &CallContext, req: CreateEntityRequest) -> Result<String, Error> {
        let mut entity = req
            .entity
            .ok_or_else(|| Error::InvalidArgument("entity is required".to_string()))?;

        if entity.id.is_empty() {
            entity.id = Uuid::new_v4().to_string();
        } else {
            Uuid::parse_str(&entity.id).map_err(|e| {
                Error::InvalidArgument(format!("entity id is not a valid UUID: {e}"))
            })?;
        }

        ctx.check()?;
        self.entities.save(&entity).await?;
        Ok(entity.id)
    }
}

#[tonic::async_trait]
impl CatalogService for CatalogServiceImpl {
    async fn create_entity(
        &self,
        request: Request<CreateEntityRequest>,
    ) -> Result<Response<CreateEntityResponse>, Status> {
        let start = Instant::now();
        counter!("catalog.create_entity.requests").increment(1);

        let ctx = CallContext::from_metadata(request.metadata(), &self.shutdown);
        let username = caller(&request);
        info!(%username, "create entity request");

        let result = self.create(&ctx, request.into_inner()).await;
        record_outcome("create_entity", start, &result);

        match result {
            Ok(id) => {
                info!(%id, "entity saved");
                Ok(Response::new(CreateEntityResponse { id }))
            }
            Err(e) => {
                warn!("cannot create entity: {e}");
                Err(e.into())
            }
        }
    }

    type SearchEntitiesStream = ResponseStream<SearchEntitiesResponse>;

    async fn search_entities(
        &self,
        request: Request<SearchEntitiesRequest>,
    ) -> Result<Response<Self::SearchEntitiesStream>, Status> {
        counter!("catalog.search_entities.requests").increment(1);

        let ctx = CallContext::from_metadata(request.metadata(), &self.shutdown);
        let filter = request.into_inner().filter.unwrap_or_default();
        info!(?filter, "search request");

        let entities = self.entities.clone();
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        tokio::spawn(async move {
            let start = Instant::now();
            let found = match entities.search(&ctx, &filter).await {
                Ok(found) => found,
                Err(e) => {
                    warn!("search stopped: {e}");
                    counter!("catalog.search_entities.failure").increment(1);
                    let _ = tx.send(Err(e.into())).await;
                    return;
                }
            };

            let mut sent = 0usize;
            for entity in found {
                let response = SearchEntitiesResponse {
                    entity: Some(entity),
                };
                if tx.send(Ok(response)).await.is_err() {
                    warn!(sent, "search receiver went away");
                    counter!("catalog.search_entities.failure").increment(1);
                    return;
                }
                sent += 1;
            }

            info!(sent, "search finished");
            counter!("catalog.search_entities.success").increment(1);
            histogram!("catalog.search_entities.duration").record(start.elapsed().as_secs_f64());
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn upload_asset(
        &self,
        request: Request<Streaming<UploadAssetRequest>>,
    ) -> Result<Response<UploadAssetResponse>, Status> {
        let start = Instant::now();
        counter!("catalog.upload_asset.requests").increment(1);

        let ctx = CallContext::from_metadata(request.metadata(), &self.shutdown);
        let username = caller(&request);
        info!(%username, "upload asset request");

        let upload = AssetUpload {
            entities: &self.entities,
            assets: &self.assets,
            max_size: self.max_asset_size,
        };
        let result = upload.run(&ctx, request.into_inner()).await;
        record_outcome("upload_asset", start, &result);

        match result {
            Ok(response) => Ok(Response::new(response)),
            Err(e) => {
                match &e {
                    Error::Io(_) => error!("cannot save asset: {e}"),
                    _ => warn!("upload rejected: {e}"),
                }
                Err(e.into())
            }
        }
    }

    type RateEntityStream = ResponseStream<RateEntityResponse>;

    async fn rate_entity(
        &self,
        request: Request<Streaming<RateEntityRequest>>,
    ) -> Result<Response<Self::RateEntityStream>, Status> {
        counter!("catalog.rate_entity.requests").increment(1);

        let ctx = CallContext::from_metadata(request.metadata(), &self.shutdown);
        let username = caller(&request);
        info!(%username, "rate entity stream opened");

        let inbound = request.into_inner();
        let entities = self.entities.clone();
        let ratings = self.ratings.clone();
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        tokio::spawn(async move {
            let start = Instant::now();
            let session = RatingSession {
                entities: &entities,
                ratings: &ratings,
            };

            let result = session.run(&ctx, inbound, &tx).await;
            record_outcome("rate_entity", start, &result);

            match result {
                Ok(applied) => info!(%username, applied, "rating stream finished"),
                Err(e) => {
                    warn!(%username, "rating stream stopped: {e}");
                    let _ = tx.send(Err(e.into())).await;
                }
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }
}
