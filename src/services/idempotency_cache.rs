use chrono::{Duration, Utc};
use sqlx::PgPool;

use crate::domain::{
    CachedResponse, LookupOutcome, DEFAULT_IDEMPOTENCY_TTL_HOURS,
};
use crate::services::signing::fingerprint;

#[derive(sqlx::FromRow)]
struct BindingRow {
    fingerprint: String,
    response_status: i32,
    response_body: Vec<u8>,
}

/// C3: replay guard keyed on `(tenant, idempotency key)` only (§3) — the
/// method and path the binding was created under are stored for audit
/// purposes but never part of the key, so reusing a key across a
/// different method/path on the same tenant is a fingerprint conflict,
/// not a second independent binding.
#[derive(Clone)]
pub struct IdempotencyCache {
    pool: PgPool,
}

impl IdempotencyCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn lookup(
        &self,
        tenant: &str,
        key: &str,
        canonical_body: &str,
    ) -> anyhow::Result<LookupOutcome> {
        let row: Option<BindingRow> = sqlx::query_as(
            r#"
            SELECT fingerprint, response_status, response_body
            FROM idempotency_bindings
            WHERE tenant = $1 AND key = $2 AND expires_at > NOW()
            "#,
        )
        .bind(tenant)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(LookupOutcome::miss());
        };

        let presented_fingerprint = fingerprint(canonical_body);
        if presented_fingerprint != row.fingerprint {
            return Ok(LookupOutcome::conflict());
        }

        Ok(LookupOutcome::hit(CachedResponse {
            status: row.response_status as u16,
            body: row.response_body,
        }))
    }

    pub async fn store(
        &self,
        tenant: &str,
        key: &str,
        method: &str,
        path: &str,
        canonical_body: &str,
        response_status: u16,
        response_body: &[u8],
    ) -> anyhow::Result<()> {
        let fp = fingerprint(canonical_body);
        let expires_at = Utc::now() + Duration::hours(DEFAULT_IDEMPOTENCY_TTL_HOURS);

        sqlx::query(
            r#"
            INSERT INTO idempotency_bindings
                (tenant, key, method, path, fingerprint, response_status, response_body, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            ON CONFLICT (tenant, key) DO UPDATE SET
                method = EXCLUDED.method,
                path = EXCLUDED.path,
                fingerprint = EXCLUDED.fingerprint,
                response_status = EXCLUDED.response_status,
                response_body = EXCLUDED.response_body,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(tenant)
        .bind(key)
        .bind(method)
        .bind(path)
        .bind(fp)
        .bind(response_status as i32)
        .bind(response_body)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Purge expired bindings; invoked by a periodic maintenance task, not
    /// on the request path.
    pub async fn evict_expired(&self) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM idempotency_bindings WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
