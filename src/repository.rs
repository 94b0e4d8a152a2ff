use chrono::Utc;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{DeliveryAttempt, DeliveryOutcome, Pagination, RecordStatus, SubmissionRecord};

#[derive(sqlx::FromRow)]
struct SubmissionRow {
    id: Uuid,
    tenant: String,
    payload: Value,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
    created_by: Uuid,
    status: String,
}

impl From<SubmissionRow> for SubmissionRecord {
    fn from(row: SubmissionRow) -> Self {
        let status = match row.status.as_str() {
            "inactive" => RecordStatus::Inactive,
            "archived" => RecordStatus::Archived,
            "deleted" => RecordStatus::Deleted,
            _ => RecordStatus::Active,
        };
        SubmissionRecord {
            id: row.id,
            tenant: row.tenant,
            payload: row.payload,
            created_at: row.created_at,
            updated_at: row.updated_at,
            created_by: row.created_by,
            status,
        }
    }
}

fn status_str(status: RecordStatus) -> &'static str {
    match status {
        RecordStatus::Active => "active",
        RecordStatus::Inactive => "inactive",
        RecordStatus::Archived => "archived",
        RecordStatus::Deleted => "deleted",
    }
}

/// Persistence for `SubmissionRecord` (§3). Every query is scoped by
/// `tenant` so cross-tenant access is structurally impossible, not just
/// checked (§8 invariant 4).
#[derive(Clone)]
pub struct SubmissionRepository {
    pool: PgPool,
}

impl SubmissionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        id: Uuid,
        tenant: &str,
        payload: Value,
        created_by: Uuid,
    ) -> anyhow::Result<SubmissionRecord> {
        let row: SubmissionRow = sqlx::query_as(
            r#"
            INSERT INTO submission_records (id, tenant, payload, created_at, updated_at, created_by, status)
            VALUES ($1, $2, $3, NOW(), NOW(), $4, 'active')
            RETURNING id, tenant, payload, created_at, updated_at, created_by, status
            "#,
        )
        .bind(id)
        .bind(tenant)
        .bind(payload)
        .bind(created_by)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    pub async fn get(&self, tenant: &str, id: Uuid) -> anyhow::Result<Option<SubmissionRecord>> {
        let row: Option<SubmissionRow> = sqlx::query_as(
            r#"
            SELECT id, tenant, payload, created_at, updated_at, created_by, status
            FROM submission_records
            WHERE tenant = $1 AND id = $2 AND status != 'deleted'
            "#,
        )
        .bind(tenant)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    /// `filter_status`/`filter_created_by` are exact-match filters over
    /// indexed envelope fields; `search` is a substring match over the
    /// opaque payload's text form (§9.5 — the distilled spec names the
    /// query params without detailing their semantics).
    pub async fn list(
        &self,
        tenant: &str,
        limit: u32,
        offset: u32,
        search: Option<&str>,
        filter_status: Option<&str>,
        filter_created_by: Option<Uuid>,
    ) -> anyhow::Result<(Vec<SubmissionRecord>, Pagination)> {
        let search_pattern = search.map(|s| format!("%{}%", s));

        let rows: Vec<SubmissionRow> = sqlx::query_as(
            r#"
            SELECT id, tenant, payload, created_at, updated_at, created_by, status
            FROM submission_records
            WHERE tenant = $1 AND status != 'deleted'
              AND ($2::text IS NULL OR payload::text ILIKE $2)
              AND ($3::text IS NULL OR status = $3)
              AND ($4::uuid IS NULL OR created_by = $4)
            ORDER BY created_at DESC
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(tenant)
        .bind(&search_pattern)
        .bind(filter_status)
        .bind(filter_created_by)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM submission_records
            WHERE tenant = $1 AND status != 'deleted'
              AND ($2::text IS NULL OR payload::text ILIKE $2)
              AND ($3::text IS NULL OR status = $3)
              AND ($4::uuid IS NULL OR created_by = $4)
            "#,
        )
        .bind(tenant)
        .bind(&search_pattern)
        .bind(filter_status)
        .bind(filter_created_by)
        .fetch_one(&self.pool)
        .await?;

        Ok((
            rows.into_iter().map(Into::into).collect(),
            Pagination {
                limit,
                offset,
                total,
            },
        ))
    }

    pub async fn update(
        &self,
        tenant: &str,
        id: Uuid,
        patch: &Value,
    ) -> anyhow::Result<Option<SubmissionRecord>> {
        let row: Option<SubmissionRow> = sqlx::query_as(
            r#"
            UPDATE submission_records
            SET payload = payload || $3, updated_at = NOW()
            WHERE tenant = $1 AND id = $2 AND status != 'deleted'
            RETURNING id, tenant, payload, created_at, updated_at, created_by, status
            "#,
        )
        .bind(tenant)
        .bind(id)
        .bind(patch)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    pub async fn soft_delete(&self, tenant: &str, id: Uuid) -> anyhow::Result<Option<Utc>> {
        let row: Option<(chrono::DateTime<Utc>,)> = sqlx::query_as(
            r#"
            UPDATE submission_records
            SET status = 'deleted', updated_at = NOW()
            WHERE tenant = $1 AND id = $2 AND status != 'deleted'
            RETURNING updated_at
            "#,
        )
        .bind(tenant)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(updated_at,)| updated_at))
    }

    /// Worker-side upsert (§4.7): insert if absent, otherwise refresh
    /// `updated_at`. Uses the record id as a natural key so redelivery
    /// never creates a duplicate row.
    pub async fn upsert_from_worker(
        &self,
        id: Uuid,
        tenant: &str,
        payload: Value,
        created_by: Uuid,
    ) -> anyhow::Result<SubmissionRecord> {
        let row: SubmissionRow = sqlx::query_as(
            r#"
            INSERT INTO submission_records (id, tenant, payload, created_at, updated_at, created_by, status)
            VALUES ($1, $2, $3, NOW(), NOW(), $4, 'active')
            ON CONFLICT (id) DO UPDATE SET
                payload = EXCLUDED.payload,
                updated_at = NOW()
            RETURNING id, tenant, payload, created_at, updated_at, created_by, status
            "#,
        )
        .bind(id)
        .bind(tenant)
        .bind(payload)
        .bind(created_by)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }
}

fn delivery_outcome_str(status: DeliveryOutcome) -> &'static str {
    match status {
        DeliveryOutcome::Delivered => "delivered",
        DeliveryOutcome::RetryFailed => "retry_failed",
        DeliveryOutcome::FailedPermanently => "failed_permanently",
    }
}

/// Append-only audit trail for outbound webhook attempts (§3, C8).
#[derive(Clone)]
pub struct DeliveryRepository {
    pool: PgPool,
}

impl DeliveryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, attempt: &DeliveryAttempt) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO delivery_attempts
                (submission_id, target_url, event, status, http_status, response_excerpt,
                 attempt, last_error, attempted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(attempt.submission_id)
        .bind(&attempt.target_url)
        .bind(&attempt.event)
        .bind(delivery_outcome_str(attempt.status))
        .bind(attempt.http_status.map(|s| s as i32))
        .bind(&attempt.response_excerpt)
        .bind(attempt.attempt as i32)
        .bind(&attempt.last_error)
        .bind(attempt.attempted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_str_round_trips() {
        for status in [
            RecordStatus::Active,
            RecordStatus::Inactive,
            RecordStatus::Archived,
            RecordStatus::Deleted,
        ] {
            let row = SubmissionRow {
                id: Uuid::new_v4(),
                tenant: "acme".to_string(),
                payload: serde_json::json!({}),
                created_at: Utc::now(),
                updated_at: Utc::now(),
                created_by: Uuid::new_v4(),
                status: status_str(status).to_string(),
            };
            let record: SubmissionRecord = row.into();
            assert_eq!(record.status, status);
        }
    }
}
