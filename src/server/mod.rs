pub mod auth;
pub mod handlers;
pub mod middleware;
pub mod request_context;

use std::sync::Arc;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::queue::Broker;
use crate::repository::{DeliveryRepository, SubmissionRepository};
use crate::services::blob_store::BlobStore;
use crate::services::capability::CapabilityIssuer;
use crate::services::credential_store::CredentialStore;
use crate::services::idempotency_cache::IdempotencyCache;
use crate::services::rate_limiter::RateLimiter;

/// Process-scoped application state, created once at startup (§9 "global
/// mutable state -> process-scoped pools") and cloned cheaply into every
/// handler via `axum::extract::State`.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub broker: Arc<dyn Broker>,
    pub blob_store: Arc<dyn BlobStore>,
    pub credential_store: CredentialStore,
    pub rate_limiter: Arc<RateLimiter>,
    pub idempotency_cache: IdempotencyCache,
    pub capability_issuer: CapabilityIssuer,
    pub submissions: SubmissionRepository,
    pub deliveries: DeliveryRepository,
    pub http_client: reqwest::Client,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        broker: Arc<dyn Broker>,
        blob_store: Arc<dyn BlobStore>,
        config: Arc<AppConfig>,
    ) -> Self {
        let credential_store = CredentialStore::new(pool.clone(), config.credential_prefix.clone());
        let rate_limiter = Arc::new(RateLimiter::new(pool.clone()));
        let idempotency_cache = IdempotencyCache::new(pool.clone());
        let capability_issuer = CapabilityIssuer::new(pool.clone(), blob_store.clone());
        let submissions = SubmissionRepository::new(pool.clone());
        let deliveries = DeliveryRepository::new(pool.clone());
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .expect("reqwest client builds with static config");

        Self {
            pool,
            broker,
            blob_store,
            credential_store,
            rate_limiter,
            idempotency_cache,
            capability_issuer,
            submissions,
            deliveries,
            http_client,
            config,
        }
    }
}

pub fn configure_app(state: AppState) -> Router {
    let v1 = Router::new()
        .route(
            "/demographics",
            post(handlers::demographics::create).get(handlers::demographics::list),
        )
        .route("/demographics/batch", post(handlers::demographics::create_batch))
        .route(
            "/demographics/:id",
            get(handlers::demographics::get_one)
                .put(handlers::demographics::update)
                .delete(handlers::demographics::delete),
        )
        .route("/documents/upload-url", post(handlers::documents::upload_url))
        .route(
            "/documents/batch-upload-urls",
            post(handlers::documents::batch_upload_urls),
        )
        .route(
            "/documents/:correlation_id/status",
            get(handlers::documents::status),
        )
        .route(
            "/admin/api-keys",
            post(handlers::admin::issue_api_key).get(handlers::admin::list_api_keys),
        )
        .route(
            "/admin/api-keys/:credential_id",
            axum::routing::delete(handlers::admin::revoke_api_key),
        )
        .route("/health", get(handlers::health::health))
        .route("/queues", get(handlers::health::queues));

    Router::new()
        .route("/health", get(handlers::health::health))
        .nest("/v1", v1)
        .route_layer(axum::middleware::from_fn(middleware::attach_correlation_id))
        .layer(TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::new().allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
        ]))
        .with_state(state)
}
