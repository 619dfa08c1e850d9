mod common;

use std::time::Duration;

use catalog_rpc::auth::{methods, Role, TokenManager};
use catalog_rpc::client::{AuthInterceptor, CatalogClient};
use catalog_rpc::proto::catalog_service_client::CatalogServiceClient;
use catalog_rpc::proto::upload_asset_request::Data;
use catalog_rpc::proto::{AssetInfo, RateEntityRequest, UploadAssetRequest};
use catalog_rpc::Error;
use common::{laptop, start_test_server, TestServer};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Code, Request};

fn catalog_with_token(server: &TestServer, token: String) -> CatalogClient {
    let interceptor = AuthInterceptor::new(methods::PROTECTED);
    interceptor.set_token(token);
    CatalogClient::new(server.channel.clone(), interceptor)
}

#[tokio::test]
async fn expired_token_is_rejected() {
    let server = start_test_server().await;
    let expired = TokenManager::new(b"integration-secret", Duration::ZERO)
        .issue("admin1", Role::Admin)
        .unwrap();

    let err = catalog_with_token(&server, expired)
        .create_entity(laptop("", 1.0, 1, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unauthenticated(_)));
}

#[tokio::test]
async fn token_signed_with_other_secret_is_rejected() {
    let server = start_test_server().await;
    let forged = TokenManager::new(b"attacker-secret", Duration::from_secs(60))
        .issue("admin1", Role::Admin)
        .unwrap();

    let err = catalog_with_token(&server, forged)
        .create_entity(laptop("", 1.0, 1, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unauthenticated(_)));
}

#[tokio::test]
async fn corrupted_token_is_rejected() {
    let server = start_test_server().await;
    let token = server.login("admin1").await.unwrap();
    let signature_start = token.rfind('.').unwrap() + 1;
    let flipped = if token[signature_start..].starts_with('A') { "B" } else { "A" };
    let mut token = token;
    token.replace_range(signature_start..=signature_start, flipped);

    let err = catalog_with_token(&server, token)
        .create_entity(laptop("", 1.0, 1, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unauthenticated(_)));
    assert!(server.entities.is_empty().await);
}

#[tokio::test]
async fn user_token_cannot_upload() {
    let server = start_test_server().await;
    server.entities.save(&laptop("e1", 1.0, 1, 1)).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("photo.jpg");
    tokio::fs::write(&path, b"pixels").await.unwrap();

    let err = server
        .catalog_as("user1")
        .await
        .upload_asset("e1", &path)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PermissionDenied(_)));
    assert!(server.assets.is_empty().await);
}

async fn open_upload(
    server: &TestServer,
    timeout: Option<Duration>,
) -> (
    mpsc::Sender<UploadAssetRequest>,
    tokio::task::JoinHandle<Result<tonic::Response<catalog_rpc::proto::UploadAssetResponse>, tonic::Status>>,
) {
    let interceptor = AuthInterceptor::new(methods::PROTECTED);
    interceptor.set_token(server.login("admin1").await.unwrap());
    let mut client = CatalogServiceClient::with_interceptor(server.channel.clone(), interceptor);

    let (tx, rx) = mpsc::channel(4);
    let mut request = Request::new(ReceiverStream::new(rx));
    if let Some(timeout) = timeout {
        request.set_timeout(timeout);
    }
    let call = tokio::spawn(async move { client.upload_asset(request).await });

    tx.send(UploadAssetRequest {
        data: Some(Data::Info(AssetInfo {
            entity_id: "e1".to_string(),
            asset_type: ".bin".to_string(),
        })),
    })
    .await
    .unwrap();
    tx.send(UploadAssetRequest {
        data: Some(Data::ChunkData(vec![0u8; 512])),
    })
    .await
    .unwrap();

    (tx, call)
}

#[tokio::test]
async fn deadline_mid_upload_persists_nothing() {
    let server = start_test_server().await;
    server.entities.save(&laptop("e1", 1.0, 1, 1)).await.unwrap();

    let (tx, call) = open_upload(&server, Some(Duration::from_millis(300))).await;

    let status = call.await.unwrap().unwrap_err();
    assert_eq!(status.code(), Code::DeadlineExceeded, "unexpected status: {status:?}");

    drop(tx);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(server.assets.is_empty().await);
}

#[tokio::test]
async fn repeated_upload_deadlines_all_report_deadline_exceeded() {
    let server = start_test_server().await;
    server.entities.save(&laptop("e1", 1.0, 1, 1)).await.unwrap();

    for _ in 0..5 {
        let (tx, call) = open_upload(&server, Some(Duration::from_millis(200))).await;
        let status = call.await.unwrap().unwrap_err();
        assert_eq!(status.code(), Code::DeadlineExceeded, "unexpected status: {status:?}");
        drop(tx);
    }
    assert!(server.assets.is_empty().await);
}

#[tokio::test]
async fn deadline_mid_rating_stream_ends_with_deadline_exceeded() {
    let server = start_test_server().await;
    server.entities.save(&laptop("e1", 1.0, 1, 1)).await.unwrap();

    let interceptor = AuthInterceptor::new(methods::PROTECTED);
    interceptor.set_token(server.login("user1").await.unwrap());
    let mut client = CatalogServiceClient::with_interceptor(server.channel.clone(), interceptor);

    let (tx, rx) = mpsc::channel(4);
    let mut request = Request::new(ReceiverStream::new(rx));
    request.set_timeout(Duration::from_millis(300));
    let mut echoes = client.rate_entity(request).await.unwrap().into_inner();

    tx.send(RateEntityRequest {
        entity_id: "e1".to_string(),
        score: 7.0,
    })
    .await
    .unwrap();
    assert_eq!(echoes.message().await.unwrap().unwrap().rated_count, 1);

    let status = echoes.message().await.unwrap_err();
    assert_eq!(status.code(), Code::DeadlineExceeded, "unexpected status: {status:?}");
    assert_eq!(server.ratings.get("e1").await.unwrap().count, 1);
    drop(tx);
}

#[tokio::test]
async fn shutdown_cancels_upload_in_progress() {
    let server = start_test_server().await;
    server.entities.save(&laptop("e1", 1.0, 1, 1)).await.unwrap();

    let (tx, call) = open_upload(&server, None).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    server.shutdown.cancel();

    let status = call.await.unwrap().unwrap_err();
    assert_eq!(status.code(), Code::Cancelled);

    drop(tx);
    assert!(server.assets.is_empty().await);
}
