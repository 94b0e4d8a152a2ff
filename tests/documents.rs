mod common;

use std::time::Duration;

use axum_test::TestServer;
use common::{issue_test_credential, spawn_app};
use ingestion_plane::domain::Scope;
use ingestion_plane::services::capability::CapabilityIssuer;
use ingestion_plane::workers::{blob_reactor, document_worker};
use serde_json::json;

/// Exercises C4 (issuance) -> C9 (poll-validate) -> document worker
/// (complete) end to end against the filesystem blob store.
#[tokio::test]
async fn upload_then_react_then_complete() {
    let app = spawn_app().await;
    let capability_issuer = CapabilityIssuer::new(app.pool.clone(), app.blob_store.clone());
    let server = TestServer::new(app.router).unwrap();

    let key = issue_test_credential(&app.pool, "acme", &[Scope::FilesUpload, Scope::DemographicsRead]).await;

    let issued = server
        .post("/v1/documents/upload-url")
        .add_header("X-API-Key", &key)
        .json(&json!({
            "fileName": "claim.pdf",
            "contentType": "application/pdf",
            "maxFileSizeMB": 10.0,
        }))
        .await;
    issued.assert_status_ok();
    let issued_body: serde_json::Value = issued.json();
    let correlation_id = issued_body["correlationId"].as_str().unwrap().to_string();
    let blob_name = issued_body["blobName"].as_str().unwrap().to_string();

    let status_before = server
        .get(&format!("/v1/documents/{correlation_id}/status"))
        .add_header("X-API-Key", &key)
        .await;
    status_before.assert_status_ok();
    assert_eq!(
        status_before.json::<serde_json::Value>()["status"],
        "pending"
    );

    app.blob_store
        .write(&blob_name, b"%PDF-1.4 fake content")
        .await
        .expect("failed to write test blob");

    let reactor_handle = tokio::spawn(blob_reactor::run(
        app.broker.clone(),
        capability_issuer.clone(),
    ));
    let worker_handle = tokio::spawn(document_worker::run(
        app.broker.clone(),
        capability_issuer.clone(),
    ));

    tokio::time::sleep(Duration::from_secs(4)).await;
    reactor_handle.abort();
    worker_handle.abort();

    let status_after = server
        .get(&format!("/v1/documents/{correlation_id}/status"))
        .add_header("X-API-Key", &key)
        .await;
    status_after.assert_status_ok();
    assert_eq!(
        status_after.json::<serde_json::Value>()["status"],
        "completed"
    );
}

#[tokio::test]
async fn status_is_not_visible_to_a_different_tenant() {
    let app = spawn_app().await;
    let server = TestServer::new(app.router).unwrap();

    let acme_key = issue_test_credential(&app.pool, "acme", &[Scope::FilesUpload]).await;
    let other_key = issue_test_credential(&app.pool, "globex", &[Scope::DemographicsRead]).await;

    let issued = server
        .post("/v1/documents/upload-url")
        .add_header("X-API-Key", &acme_key)
        .json(&json!({
            "fileName": "claim.pdf",
            "contentType": "application/pdf",
            "maxFileSizeMB": 10.0,
        }))
        .await;
    issued.assert_status_ok();
    let correlation_id = issued.json::<serde_json::Value>()["correlationId"]
        .as_str()
        .unwrap()
        .to_string();

    let cross_tenant = server
        .get(&format!("/v1/documents/{correlation_id}/status"))
        .add_header("X-API-Key", &other_key)
        .await;
    cross_tenant.assert_status(axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn rejects_an_out_of_range_max_file_size() {
    let app = spawn_app().await;
    let server = TestServer::new(app.router).unwrap();
    let key = issue_test_credential(&app.pool, "acme", &[Scope::FilesUpload]).await;

    let response = server
        .post("/v1/documents/upload-url")
        .add_header("X-API-Key", &key)
        .json(&json!({
            "fileName": "claim.pdf",
            "contentType": "application/pdf",
            "maxFileSizeMB": 0.0,
        }))
        .await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);
}
