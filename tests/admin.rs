mod common;

use axum_test::TestServer;
use common::{issue_test_credential, spawn_app};
use ingestion_plane::domain::Scope;
use serde_json::json;

#[tokio::test]
async fn issue_then_list_then_revoke_api_key() {
    let app = spawn_app().await;
    let server = TestServer::new(app.router).unwrap();

    let admin_key = issue_test_credential(&app.pool, "acme", &[Scope::DemographicsAdmin]).await;

    let issued = server
        .post("/v1/admin/api-keys")
        .add_header("X-API-Key", &admin_key)
        .json(&json!({
            "name": "ci bot",
            "scopes": ["demographics:read"],
        }))
        .await;
    issued.assert_status(axum::http::StatusCode::CREATED);
    let issued_body: serde_json::Value = issued.json();
    let new_key_id = issued_body["apiKey"].as_str().unwrap().to_string();
    assert!(issued_body["key"].as_str().unwrap().starts_with("ms_test_"));

    let listed = server
        .get("/v1/admin/api-keys")
        .add_header("X-API-Key", &admin_key)
        .await;
    listed.assert_status_ok();
    let listed_body: serde_json::Value = listed.json();
    let entries = listed_body["data"].as_array().unwrap();
    // the admin credential itself plus the one just issued
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.get("secure_hash").is_none()));

    let revoked = server
        .delete(&format!("/v1/admin/api-keys/{new_key_id}"))
        .add_header("X-API-Key", &admin_key)
        .await;
    revoked.assert_status_ok();

    let listed_again = server
        .get("/v1/admin/api-keys")
        .add_header("X-API-Key", &admin_key)
        .await;
    let listed_again_body: serde_json::Value = listed_again.json();
    let revoked_entry = listed_again_body["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["id"] == new_key_id)
        .unwrap();
    assert_eq!(revoked_entry["status"], "revoked");
}

#[tokio::test]
async fn revoking_an_unknown_credential_is_not_found() {
    let app = spawn_app().await;
    let server = TestServer::new(app.router).unwrap();

    let admin_key = issue_test_credential(&app.pool, "acme", &[Scope::DemographicsAdmin]).await;

    let response = server
        .delete(&format!("/v1/admin/api-keys/{}", uuid::Uuid::new_v4()))
        .add_header("X-API-Key", &admin_key)
        .await;
    response.assert_status(axum::http::StatusCode::NOT_FOUND);
}
