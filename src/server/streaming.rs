//! Stateful cores of the client-streaming and bidirectional RPCs.
//!
//! Both loops take any inbound `Stream` of messages plus a [`CallContext`],
//! so they run the same way under tonic and in tests.

use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt};
use tonic::Status;
use tracing::{debug, info};

use super::assets::DiskAssetStore;
use super::context::CallContext;
use super::state::{EntityStore, RatingStore};
use crate::proto::upload_asset_request::Data;
use crate::proto::{RateEntityRequest, RateEntityResponse, UploadAssetRequest, UploadAssetResponse};
use crate::{Error, Result};

/// Receives the next message, or `None` at end of stream.
///
/// Fails fast if the call is already cancelled or past its deadline, and
/// interrupts a pending receive when that happens.
pub async fn receive<S, T>(ctx: &CallContext, inbound: &mut S) -> Result<Option<T>>
where
    S: Stream<Item = std::result::Result<T, Status>> + Unpin,
{
    ctx.check()?;

    tokio::select! {
        biased;
        err = ctx.done() => Err(err),
        message = inbound.next() => match message {
            None => Ok(None),
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(status)) => Err(Error::Unknown(format!(
                "cannot receive message: {}",
                status.message()
            ))),
        },
    }
}

/// Upload state shared by the chunk loop.
pub struct AssetUpload<'a> {
    /// Catalog used to check the owning entity.
    pub entities: &'a EntityStore,
    /// Destination of the finished asset.
    pub assets: &'a DiskAssetStore,
    /// Largest accepted asset, in bytes.
    pub max_size: usize,
}

impl AssetUpload<'_> {
    /// Runs one upload: asset info first, then chunks until end of stream.
    ///
    /// Nothing is written unless the whole stream arrives within `max_size`
    /// and the call is still live when the last chunk has been read.
    pub async fn run<S>(&self, ctx: &CallContext, mut inbound: S) -> Result<UploadAssetResponse>
    where
        S: Stream<Item = std::result::Result<UploadAssetRequest, Status>> + Unpin,
    {
        let info = match receive(ctx, &mut inbound).await?.and_then(|req| req.data) {
            Some(Data::Info(info)) => info,
            Some(Data::ChunkData(_)) | None => {
                return Err(Error::InvalidArgument(
                    "first message must carry asset info".to_string(),
                ));
            }
        };
        validate_asset_type(&info.asset_type)?;
        info!(entity_id = %info.entity_id, asset_type = %info.asset_type, "receiving asset");

        if self.entities.find(&info.entity_id).await.is_none() {
            return Err(Error::NotFound(format!("Entity '{}'", info.entity_id)));
        }

        let mut data = Vec::new();
        while let Some(req) = receive(ctx, &mut inbound).await? {
            let chunk = match req.data {
                Some(Data::ChunkData(chunk)) => chunk,
                Some(Data::Info(_)) => {
                    return Err(Error::InvalidArgument(
                        "asset info may only be sent once".to_string(),
                    ));
                }
                None => continue,
            };

            let size = data.len() + chunk.len();
            if size > self.max_size {
                return Err(Error::InvalidArgument(format!(
                    "asset is too large: {size} > {}",
                    self.max_size
                )));
            }
            debug!(chunk = chunk.len(), total = size, "received chunk");
            data.extend_from_slice(&chunk);
        }

        let size = u32::try_from(data.len()).map_err(|_| {
            Error::InvalidArgument(format!("asset is too large: {} bytes", data.len()))
        })?;

        ctx.check()?;
        let id = self
            .assets
            .save(&info.entity_id, &info.asset_type, &data)
            .await?;

        let stored = self.assets.len().await;
        info!(%id, size, stored, "asset saved");
        Ok(UploadAssetResponse { id, size })
    }
}

fn validate_asset_type(asset_type: &str) -> Result<()> {
    if asset_type.len() > 16 || asset_type.contains(['/', '\\']) || asset_type.contains("..") {
        return Err(Error::InvalidArgument(format!(
            "invalid asset type '{asset_type}'"
        )));
    }
    Ok(())
}

/// Rating state shared by the rating loop.
pub struct RatingSession<'a> {
    /// Catalog used to check every rated entity.
    pub entities: &'a EntityStore,
    /// Aggregates updated by the stream.
    pub ratings: &'a RatingStore,
}

impl RatingSession<'_> {
    /// Applies each inbound score and echoes the updated aggregate before
    /// reading the next message.
    ///
    /// Returns the number of ratings applied. The first unknown entity or
    /// failed send ends the whole stream.
    pub async fn run<S>(
        &self,
        ctx: &CallContext,
        mut inbound: S,
        outbound: &mpsc::Sender<std::result::Result<RateEntityResponse, Status>>,
    ) -> Result<u32>
    where
        S: Stream<Item = std::result::Result<RateEntityRequest, Status>> + Unpin,
    {
        let mut applied = 0u32;

        while let Some(req) = receive(ctx, &mut inbound).await? {
            debug!(entity_id = %req.entity_id, score = req.score, "received rating");

            if !req.score.is_finite() {
                return Err(Error::InvalidArgument(format!(
                    "score must be a finite number, got {}",
                    req.score
                )));
            }
            if self.entities.find(&req.entity_id).await.is_none() {
                return Err(Error::NotFound(format!("Entity '{}'", req.entity_id)));
            }

            let rating = self.ratings.add(&req.entity_id, req.score).await;
            let response = RateEntityResponse {
                entity_id: req.entity_id,
                rated_count: rating.count,
                average_score: rating.average().unwrap_or_default(),
            };

            tokio::select! {
                biased;
                err = ctx.done() => return Err(err),
                sent = outbound.send(Ok(response)) => {
                    sent.map_err(|_| Error::Unknown("cannot send response: receiver closed".to_string()))?;
                }
            }
            applied += 1;
        }

        Ok(applied)
    }
}
