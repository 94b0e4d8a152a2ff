use std::sync::Arc;

use ingestion_plane::config::AppConfig;
use ingestion_plane::queue::memory::MemoryBroker;
use ingestion_plane::queue::Broker;
use ingestion_plane::services::blob_store::{BlobStore, FilesystemBlobStore};
use ingestion_plane::server::{configure_app, AppState};
use ingestion_plane::workers::spawn_workers;
use ingestion_plane::database;
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_env_filter("ingestion_plane=debug,tower_http=debug")
        .with_target(true)
        .init();

    let config = Arc::new(AppConfig::from_env());

    let pool = database::get_connection_pool(&config)
        .await
        .expect("failed to create database pool");
    database::migrate_database(&pool)
        .await
        .expect("failed to run database migrations");

    let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
    let blob_store: Arc<dyn BlobStore> = Arc::new(FilesystemBlobStore::new(
        config.object_store_root.clone(),
        config.object_store_base_url.clone(),
    ));
    blob_store
        .ensure_container("uploads")
        .await
        .expect("failed to prepare upload container");

    let state = AppState::new(pool, broker, blob_store, config.clone());

    let worker_handles = spawn_workers(state.clone());
    info!(count = worker_handles.len(), "spawned background workers");

    let app = configure_app(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind listener");
    info!("server listening on {}", listener.local_addr().unwrap());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    for handle in worker_handles {
        handle.abort();
    }
}

/// SIGTERM/SIGINT trigger axum's graceful shutdown: stop accepting new
/// connections and drain in-flight requests (§5). Workers are aborted
/// after the listener returns; each finishes its in-flight message before
/// the task is dropped since worker loops only suspend at message
/// boundaries, not mid-message.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, draining in-flight requests");
}
