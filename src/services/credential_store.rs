use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{CredentialFailure, RateLimitProfile, Scope, TenantContext};

const PUBLIC_PREFIX_LEN: usize = 12;

#[derive(sqlx::FromRow)]
struct CredentialRow {
    id: Uuid,
    tenant: String,
    secure_hash: String,
    scopes: Vec<String>,
    status: String,
    expires_at: Option<chrono::DateTime<Utc>>,
    allowed_ips: Option<Vec<String>>,
    burst_limit: i32,
    minute_limit: i32,
    hour_limit: i32,
    day_limit: i32,
}

#[derive(sqlx::FromRow)]
struct CredentialSummaryRow {
    id: Uuid,
    name: String,
    scopes: Vec<String>,
    status: String,
    expires_at: Option<chrono::DateTime<Utc>>,
    use_count: i64,
    last_used_at: Option<chrono::DateTime<Utc>>,
    created_at: chrono::DateTime<Utc>,
}

/// Metadata-only view of a credential for `GET /admin/api-keys`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CredentialSummary {
    pub id: Uuid,
    pub name: String,
    pub scopes: Vec<String>,
    pub status: String,
    pub expires_at: Option<chrono::DateTime<Utc>>,
    pub use_count: i64,
    pub last_used_at: Option<chrono::DateTime<Utc>>,
    pub created_at: chrono::DateTime<Utc>,
}

impl From<CredentialSummaryRow> for CredentialSummary {
    fn from(row: CredentialSummaryRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            scopes: row.scopes,
            status: row.status,
            expires_at: row.expires_at,
            use_count: row.use_count,
            last_used_at: row.last_used_at,
            created_at: row.created_at,
        }
    }
}

/// C1: resolves a presented credential to a tenant identity. Returned
/// values carry no lock; usage-tracking side effects are fire-and-forget.
#[derive(Clone)]
pub struct CredentialStore {
    pool: PgPool,
    prefix: String,
}

impl CredentialStore {
    pub fn new(pool: PgPool, prefix: String) -> Self {
        Self { pool, prefix }
    }

    pub fn secure_hash(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn public_prefix(token: &str) -> &str {
        let end = token.len().min(PUBLIC_PREFIX_LEN);
        &token[..end]
    }

    pub async fn resolve(
        &self,
        presented_token: &str,
        client_ip: &str,
        required_scopes: &[Scope],
    ) -> Result<TenantContext, CredentialFailure> {
        if !presented_token.starts_with(&self.prefix) || presented_token.len() < PUBLIC_PREFIX_LEN
        {
            return Err(CredentialFailure::Malformed);
        }

        let public_prefix = Self::public_prefix(presented_token);
        let row = sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT id, tenant, secure_hash, scopes, status, expires_at, allowed_ips,
                   burst_limit, minute_limit, hour_limit, day_limit
            FROM credentials
            WHERE public_prefix = $1
            "#,
        )
        .bind(public_prefix)
        .fetch_optional(&self.pool)
        .await
        .map_err(|_| CredentialFailure::NotFound)?
        .ok_or(CredentialFailure::NotFound)?;

        let presented_hash = Self::secure_hash(presented_token);
        if presented_hash != row.secure_hash {
            return Err(CredentialFailure::HashMismatch);
        }

        if row.status != "active" {
            return Err(CredentialFailure::StatusNotActive);
        }

        if let Some(expires_at) = row.expires_at {
            if expires_at <= Utc::now() {
                return Err(CredentialFailure::Expired);
            }
        }

        if let Some(allowed_ips) = &row.allowed_ips {
            if !allowed_ips.is_empty() && !allowed_ips.iter().any(|ip| ip == client_ip) {
                return Err(CredentialFailure::IpNotAllowed);
            }
        }

        let scopes: Vec<Scope> = row
            .scopes
            .iter()
            .filter_map(|s| Scope::parse(s))
            .collect();
        if !required_scopes.iter().all(|s| scopes.contains(s)) {
            return Err(CredentialFailure::ScopesInsufficient);
        }

        let context = TenantContext {
            credential_id: row.id,
            tenant: row.tenant,
            scopes,
            rate_limits: RateLimitProfile {
                burst_limit: row.burst_limit as u32,
                minute_limit: row.minute_limit as u32,
                hour_limit: row.hour_limit as u32,
                day_limit: row.day_limit as u32,
            },
        };

        self.record_usage_fire_and_forget(context.credential_id, client_ip.to_string());

        Ok(context)
    }

    /// Increment `use_count`, set `last_used_at`/`last_used_ip`. A failure
    /// here must never fail authentication (§4.1), so it only logs.
    fn record_usage_fire_and_forget(&self, credential_id: Uuid, client_ip: String) {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            let result = sqlx::query(
                r#"
                UPDATE credentials
                SET use_count = use_count + 1, last_used_at = NOW(), last_used_ip = $1
                WHERE id = $2
                "#,
            )
            .bind(client_ip)
            .bind(credential_id)
            .execute(&pool)
            .await;
            if let Err(err) = result {
                tracing::warn!(error = %err, %credential_id, "failed to record credential usage");
            }
        });
    }

    pub async fn issue(
        &self,
        tenant: &str,
        name: &str,
        scopes: &[Scope],
        rate_limits: RateLimitProfile,
        expires_at: Option<chrono::DateTime<Utc>>,
        allowed_ips: Option<Vec<String>>,
    ) -> anyhow::Result<(Uuid, String)> {
        let token = format!("{}{}", self.prefix, Uuid::new_v4().simple());
        let public_prefix = Self::public_prefix(&token).to_string();
        let secure_hash = Self::secure_hash(&token);
        let scope_strings: Vec<String> = scopes.iter().map(|s| s.as_str().to_string()).collect();
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO credentials (
                id, tenant, name, public_prefix, secure_hash, scopes, status,
                expires_at, allowed_ips, burst_limit, minute_limit, hour_limit, day_limit,
                use_count, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, 'active', $7, $8, $9, $10, $11, $12, 0, NOW())
            "#,
        )
        .bind(id)
        .bind(tenant)
        .bind(name)
        .bind(&public_prefix)
        .bind(&secure_hash)
        .bind(&scope_strings)
        .bind(expires_at)
        .bind(allowed_ips)
        .bind(rate_limits.burst_limit as i32)
        .bind(rate_limits.minute_limit as i32)
        .bind(rate_limits.hour_limit as i32)
        .bind(rate_limits.day_limit as i32)
        .execute(&self.pool)
        .await?;

        Ok((id, token))
    }

    /// Lists credential metadata for a tenant, newest first. Never
    /// returns `secure_hash` or a plaintext token (§9.5: credential
    /// lifecycle CRUD, not an audit/rotation feature).
    pub async fn list(&self, tenant: &str) -> anyhow::Result<Vec<CredentialSummary>> {
        let rows: Vec<CredentialSummaryRow> = sqlx::query_as(
            r#"
            SELECT id, name, scopes, status, expires_at, use_count, last_used_at, created_at
            FROM credentials
            WHERE tenant = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(tenant)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn revoke(&self, credential_id: Uuid, tenant: &str) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE credentials SET status = 'revoked' WHERE id = $1 AND tenant = $2",
        )
        .bind(credential_id)
        .bind(tenant)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_prefix_is_stable_and_bounded() {
        let token = "ms_abcdefghijklmnopqrstuvwxyz";
        assert_eq!(CredentialStore::public_prefix(token).len(), PUBLIC_PREFIX_LEN);
    }

    #[test]
    fn secure_hash_is_deterministic() {
        assert_eq!(
            CredentialStore::secure_hash("ms_token"),
            CredentialStore::secure_hash("ms_token")
        );
        assert_ne!(
            CredentialStore::secure_hash("ms_token"),
            CredentialStore::secure_hash("ms_token2")
        );
    }
}
