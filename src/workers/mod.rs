pub mod blob_reactor;
pub mod dead_letter;
pub mod demographics_worker;
pub mod document_worker;
pub mod maintenance;
pub mod webhook_dispatcher;

use tokio::task::JoinHandle;

use crate::server::AppState;

/// Spawns the background worker pools (§5: "the worker pools (C7, C8)
/// each use their own fixed-size pool") sized by `config.worker_pool_size`.
/// The blob reactor, document worker, and dead-letter consumer run as
/// single long-lived tasks since they are not session-bound.
pub fn spawn_workers(state: AppState) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    for _ in 0..state.config.worker_pool_size {
        let broker = state.broker.clone();
        let submissions = state.submissions.clone();
        handles.push(tokio::spawn(demographics_worker::run(broker, submissions)));
    }

    for _ in 0..state.config.worker_pool_size {
        let broker = state.broker.clone();
        let deliveries = state.deliveries.clone();
        let http_client = state.http_client.clone();
        let config = state.config.clone();
        handles.push(tokio::spawn(webhook_dispatcher::run(
            broker,
            deliveries,
            http_client,
            config,
        )));
    }

    handles.push(tokio::spawn(document_worker::run(
        state.broker.clone(),
        state.capability_issuer.clone(),
    )));
    handles.push(tokio::spawn(blob_reactor::run(
        state.broker.clone(),
        state.capability_issuer.clone(),
    )));
    handles.push(tokio::spawn(dead_letter::run(state.broker.clone())));
    handles.push(tokio::spawn(maintenance::run(state.idempotency_cache.clone())));

    handles
}
