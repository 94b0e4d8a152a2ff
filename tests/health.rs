mod common;

use axum_test::TestServer;
use common::{issue_test_credential, spawn_app};
use ingestion_plane::domain::Scope;

#[tokio::test]
async fn health_reports_ok_with_no_auth_required() {
    let app = spawn_app().await;
    let server = TestServer::new(app.router).unwrap();

    let response = server.get("/health").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["components"]["database"]["status"], "healthy");
}

#[tokio::test]
async fn queues_reports_empty_depths_for_a_fresh_broker() {
    let app = spawn_app().await;
    let server = TestServer::new(app.router).unwrap();

    let key = issue_test_credential(&app.pool, "acme", &[Scope::DemographicsRead]).await;

    let response = server
        .get("/v1/queues")
        .add_header("X-API-Key", &key)
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert!(body["topics"].is_array());
}
