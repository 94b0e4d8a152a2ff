mod common;

use axum_test::TestServer;
use common::{issue_test_credential, spawn_app};
use ingestion_plane::domain::Scope;
use serde_json::json;

#[tokio::test]
async fn create_then_get_then_list_round_trips() {
    let app = spawn_app().await;
    let server = TestServer::new(app.router).unwrap();

    let key = issue_test_credential(
        &app.pool,
        "acme",
        &[Scope::DemographicsWrite, Scope::DemographicsRead],
    )
    .await;

    let created = server
        .post("/v1/demographics")
        .add_header("X-API-Key", &key)
        .json(&json!({"first_name": "Ada", "last_name": "Lovelace"}))
        .await;
    created.assert_status(axum::http::StatusCode::CREATED);
    let created_body: serde_json::Value = created.json();
    let id = created_body["id"].as_str().unwrap().to_string();
    assert_eq!(created_body["status"], "accepted");

    let fetched = server
        .get(&format!("/v1/demographics/{id}"))
        .add_header("X-API-Key", &key)
        .await;
    fetched.assert_status_ok();
    let fetched_body: serde_json::Value = fetched.json();
    assert_eq!(fetched_body["data"]["id"], id);
    assert_eq!(fetched_body["data"]["payload"]["first_name"], "Ada");

    let listed = server
        .get("/v1/demographics")
        .add_header("X-API-Key", &key)
        .await;
    listed.assert_status_ok();
    let listed_body: serde_json::Value = listed.json();
    assert_eq!(listed_body["pagination"]["total"], 1);
    assert_eq!(listed_body["data"][0]["id"], id);
}

#[tokio::test]
async fn missing_api_key_is_rejected() {
    let app = spawn_app().await;
    let server = TestServer::new(app.router).unwrap();

    let response = server
        .post("/v1/demographics")
        .json(&json!({"first_name": "Ada"}))
        .await;
    response.assert_status(axum::http::StatusCode::UNAUTHORIZED);
    let correlation_header = response
        .headers()
        .get("X-Correlation-ID")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "MISSING_API_KEY");
    assert_eq!(body["requestId"], correlation_header);
}

#[tokio::test]
async fn insufficient_scope_is_forbidden_not_unauthorized() {
    let app = spawn_app().await;
    let server = TestServer::new(app.router).unwrap();

    let key = issue_test_credential(&app.pool, "acme", &[Scope::DemographicsRead]).await;

    let response = server
        .post("/v1/demographics")
        .add_header("X-API-Key", &key)
        .json(&json!({"first_name": "Ada"}))
        .await;
    response.assert_status(axum::http::StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn repeated_idempotency_key_replays_the_first_response() {
    let app = spawn_app().await;
    let server = TestServer::new(app.router).unwrap();

    let key = issue_test_credential(&app.pool, "acme", &[Scope::DemographicsWrite]).await;
    let payload = json!({"first_name": "Grace"});

    let first = server
        .post("/v1/demographics")
        .add_header("X-API-Key", &key)
        .add_header("X-Idempotency-Key", "8f14e45f-ceea-467e-bd3d-d95ee9f9e9a1")
        .json(&payload)
        .await;
    first.assert_status(axum::http::StatusCode::CREATED);
    let first_body: serde_json::Value = first.json();

    // give the fire-and-forget idempotency store a moment to persist
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let second = server
        .post("/v1/demographics")
        .add_header("X-API-Key", &key)
        .add_header("X-Idempotency-Key", "8f14e45f-ceea-467e-bd3d-d95ee9f9e9a1")
        .json(&payload)
        .await;
    second.assert_status(axum::http::StatusCode::CREATED);
    let second_body: serde_json::Value = second.json();

    assert_eq!(first_body["id"], second_body["id"]);
}

#[tokio::test]
async fn same_idempotency_key_different_body_is_a_conflict() {
    let app = spawn_app().await;
    let server = TestServer::new(app.router).unwrap();

    let key = issue_test_credential(&app.pool, "acme", &[Scope::DemographicsWrite]).await;

    let first = server
        .post("/v1/demographics")
        .add_header("X-API-Key", &key)
        .add_header("X-Idempotency-Key", "5a7f8e3a-1d2c-4b9e-9c3a-2f6d8e1b4c7a")
        .json(&json!({"first_name": "Grace"}))
        .await;
    first.assert_status(axum::http::StatusCode::CREATED);

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let second = server
        .post("/v1/demographics")
        .add_header("X-API-Key", &key)
        .add_header("X-Idempotency-Key", "5a7f8e3a-1d2c-4b9e-9c3a-2f6d8e1b4c7a")
        .json(&json!({"first_name": "Ada"}))
        .await;
    second.assert_status(axum::http::StatusCode::CONFLICT);
}

#[tokio::test]
async fn reusing_a_key_across_a_different_method_and_path_is_a_conflict() {
    let app = spawn_app().await;
    let server = TestServer::new(app.router).unwrap();

    let key = issue_test_credential(
        &app.pool,
        "acme",
        &[Scope::DemographicsWrite, Scope::DemographicsRead],
    )
    .await;
    let idempotency_key = "3c9e7a2b-5f1d-4e8a-9b6c-1a2d3e4f5061";

    let created = server
        .post("/v1/demographics")
        .add_header("X-API-Key", &key)
        .add_header("X-Idempotency-Key", idempotency_key)
        .json(&json!({"first_name": "Ada"}))
        .await;
    created.assert_status(axum::http::StatusCode::CREATED);
    let id = created.json::<serde_json::Value>()["id"]
        .as_str()
        .unwrap()
        .to_string();

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    // same tenant, same key, but now a PUT against a different path and a
    // different body — §4.3 requires this collide on the key alone.
    let updated = server
        .put(&format!("/v1/demographics/{id}"))
        .add_header("X-API-Key", &key)
        .add_header("X-Idempotency-Key", idempotency_key)
        .json(&json!({"first_name": "Ada Augusta"}))
        .await;
    updated.assert_status(axum::http::StatusCode::CONFLICT);
}

#[tokio::test]
async fn update_and_soft_delete_are_reflected_in_get() {
    let app = spawn_app().await;
    let server = TestServer::new(app.router).unwrap();

    let key = issue_test_credential(
        &app.pool,
        "acme",
        &[
            Scope::DemographicsWrite,
            Scope::DemographicsRead,
            Scope::DemographicsDelete,
        ],
    )
    .await;

    let created = server
        .post("/v1/demographics")
        .add_header("X-API-Key", &key)
        .json(&json!({"first_name": "Ada"}))
        .await;
    let id = created.json::<serde_json::Value>()["id"].as_str().unwrap().to_string();

    let updated = server
        .put(&format!("/v1/demographics/{id}"))
        .add_header("X-API-Key", &key)
        .json(&json!({"first_name": "Ada Augusta"}))
        .await;
    updated.assert_status_ok();

    let fetched = server
        .get(&format!("/v1/demographics/{id}"))
        .add_header("X-API-Key", &key)
        .await;
    assert_eq!(
        fetched.json::<serde_json::Value>()["data"]["payload"]["first_name"],
        "Ada Augusta"
    );

    let deleted = server
        .delete(&format!("/v1/demographics/{id}"))
        .add_header("X-API-Key", &key)
        .await;
    deleted.assert_status_ok();

    let after_delete = server
        .get(&format!("/v1/demographics/{id}"))
        .add_header("X-API-Key", &key)
        .await;
    after_delete.assert_status(axum::http::StatusCode::NOT_FOUND);
}
