pub mod blob_store;
pub mod capability;
pub mod credential_store;
pub mod idempotency_cache;
pub mod rate_limiter;
pub mod signing;
