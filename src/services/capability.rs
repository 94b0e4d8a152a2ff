use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{blob_path, CapabilityDescriptor, CapabilityStatus};
use crate::services::blob_store::BlobStore;

const UPLOAD_URL_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub file_size_mb: Option<f64>,
    pub error: Option<String>,
}

#[derive(sqlx::FromRow)]
struct DescriptorRow {
    correlation_id: Uuid,
    tenant: String,
    blob_path: String,
    content_type: String,
    expires_at: DateTime<Utc>,
    status: String,
    file_size: Option<i64>,
    error: Option<String>,
}

impl From<DescriptorRow> for CapabilityDescriptor {
    fn from(row: DescriptorRow) -> Self {
        let status = match row.status.as_str() {
            "uploaded" => CapabilityStatus::Uploaded,
            "processing" => CapabilityStatus::Processing,
            "completed" => CapabilityStatus::Completed,
            "failed" => CapabilityStatus::Failed,
            _ => CapabilityStatus::Pending,
        };
        CapabilityDescriptor {
            correlation_id: row.correlation_id.to_string(),
            tenant: row.tenant,
            blob_path: row.blob_path,
            content_type: row.content_type,
            expires_at: row.expires_at,
            status,
            file_size: row.file_size.map(|n| n as u64),
            error: row.error,
        }
    }
}

fn status_str(status: CapabilityStatus) -> &'static str {
    match status {
        CapabilityStatus::Pending => "pending",
        CapabilityStatus::Uploaded => "uploaded",
        CapabilityStatus::Processing => "processing",
        CapabilityStatus::Completed => "completed",
        CapabilityStatus::Failed => "failed",
    }
}

/// C4: mints capability URLs and tracks their lifecycle (§4.4).
#[derive(Clone)]
pub struct CapabilityIssuer {
    pool: PgPool,
    blob_store: Arc<dyn BlobStore>,
}

impl CapabilityIssuer {
    pub fn new(pool: PgPool, blob_store: Arc<dyn BlobStore>) -> Self {
        Self { pool, blob_store }
    }

    pub async fn issue_upload(
        &self,
        tenant: &str,
        filename: &str,
        content_type: &str,
        max_size_mb: f64,
    ) -> anyhow::Result<(String, String, String, DateTime<Utc>)> {
        let correlation_id = Uuid::new_v4();
        let now = Utc::now();
        let path = blob_path(tenant, &correlation_id.to_string(), filename, now);
        let expires_at = now + Duration::hours(UPLOAD_URL_TTL_HOURS);

        let upload_url = self
            .blob_store
            .presign_upload(&path, content_type, expires_at)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO capability_descriptors
                (correlation_id, tenant, blob_path, content_type, expires_at, status,
                 file_size, error, max_size_mb, created_at)
            VALUES ($1, $2, $3, $4, $5, 'pending', NULL, NULL, $6, NOW())
            "#,
        )
        .bind(correlation_id)
        .bind(tenant)
        .bind(&path)
        .bind(content_type)
        .bind(expires_at)
        .bind(max_size_mb)
        .execute(&self.pool)
        .await?;

        Ok((upload_url, path, correlation_id.to_string(), expires_at))
    }

    pub async fn issue_download(&self, blob_path: &str, ttl: Duration) -> anyhow::Result<String> {
        self.blob_store.presign_download(blob_path, ttl).await
    }

    /// Stats the uploaded blob and rejects anything over the limit
    /// recorded at issuance, reporting the observed size to two decimals.
    pub async fn validate_uploaded(
        &self,
        blob_path: &str,
        max_size_mb: f64,
    ) -> anyhow::Result<ValidationOutcome> {
        let stat = self.blob_store.stat(blob_path).await?;
        let Some(stat) = stat else {
            return Ok(ValidationOutcome {
                valid: false,
                file_size_mb: None,
                error: Some("not-found".to_string()),
            });
        };

        let size_mb = (stat.size_bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0;
        if size_mb > max_size_mb {
            return Ok(ValidationOutcome {
                valid: false,
                file_size_mb: Some(size_mb),
                error: Some("too-large".to_string()),
            });
        }

        Ok(ValidationOutcome {
            valid: true,
            file_size_mb: Some(size_mb),
            error: None,
        })
    }

    pub async fn get_status(
        &self,
        tenant: &str,
        correlation_id: Uuid,
    ) -> anyhow::Result<Option<CapabilityDescriptor>> {
        let row: Option<DescriptorRow> = sqlx::query_as(
            r#"
            SELECT correlation_id, tenant, blob_path, content_type, expires_at, status, file_size, error
            FROM capability_descriptors
            WHERE correlation_id = $1 AND tenant = $2
            "#,
        )
        .bind(correlation_id)
        .bind(tenant)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    /// Descriptors still awaiting a blob-write event, oldest first. The
    /// blob reactor (C9) polls this and stats each blob path in lieu of a
    /// real object-store event stream (§1: the concrete store is out of
    /// scope) — a successful `stat` is the synthetic "blob written" event.
    pub async fn list_pending_validation(&self, max: i64) -> anyhow::Result<Vec<CapabilityDescriptor>> {
        let rows: Vec<DescriptorRow> = sqlx::query_as(
            r#"
            SELECT correlation_id, tenant, blob_path, content_type, expires_at, status, file_size, error
            FROM capability_descriptors
            WHERE status = 'pending'
            ORDER BY expires_at ASC
            LIMIT $1
            "#,
        )
        .bind(max)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Max size recorded at issuance, needed by the blob reactor to
    /// re-validate without trusting a caller-supplied limit.
    pub async fn max_size_mb(&self, correlation_id: Uuid) -> anyhow::Result<Option<f64>> {
        let row: Option<(f64,)> = sqlx::query_as(
            "SELECT max_size_mb FROM capability_descriptors WHERE correlation_id = $1",
        )
        .bind(correlation_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(v,)| v))
    }

    pub async fn update_status(
        &self,
        correlation_id: Uuid,
        status: CapabilityStatus,
        file_size: Option<u64>,
        error: Option<&str>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE capability_descriptors
            SET status = $1, file_size = COALESCE($2, file_size), error = $3
            WHERE correlation_id = $4
            "#,
        )
        .bind(status_str(status))
        .bind(file_size.map(|n| n as i64))
        .bind(error)
        .bind(correlation_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_string_form() {
        for status in [
            CapabilityStatus::Pending,
            CapabilityStatus::Uploaded,
            CapabilityStatus::Processing,
            CapabilityStatus::Completed,
            CapabilityStatus::Failed,
        ] {
            let row = DescriptorRow {
                correlation_id: Uuid::new_v4(),
                tenant: "acme".to_string(),
                blob_path: "acme/2026-07-26/x_y.pdf".to_string(),
                content_type: "application/pdf".to_string(),
                expires_at: Utc::now(),
                status: status_str(status).to_string(),
                file_size: None,
                error: None,
            };
            let descriptor: CapabilityDescriptor = row.into();
            assert_eq!(descriptor.status, status);
        }
    }
}
