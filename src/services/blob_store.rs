use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::fs;
use uuid::Uuid;

/// Result of stat-ing an object at a blob path.
#[derive(Debug, Clone, Copy)]
pub struct BlobStat {
    pub size_bytes: u64,
}

/// C4's collaborator: an object store capable of minting time-limited
/// write/read URLs for a blob path. The concrete product is out of scope
/// (§1); this crate ships a filesystem-backed implementation so the rest
/// of the pipeline (capability issuance, upload validation, the blob
/// reactor) has something real to run and test against.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn ensure_container(&self, container: &str) -> anyhow::Result<()>;

    /// Mint a write-and-create-only URL bound to `blob_path` and
    /// `content_type`, valid until `expires_at`.
    async fn presign_upload(
        &self,
        blob_path: &str,
        content_type: &str,
        expires_at: DateTime<Utc>,
    ) -> anyhow::Result<String>;

    async fn presign_download(
        &self,
        blob_path: &str,
        ttl: Duration,
    ) -> anyhow::Result<String>;

    async fn stat(&self, blob_path: &str) -> anyhow::Result<Option<BlobStat>>;

    /// Write bytes directly to `blob_path`. Used by the local dev PUT
    /// endpoint and by tests simulating a client's upload; a production
    /// object store would receive this traffic directly, bypassing the
    /// core entirely (§1).
    async fn write(&self, blob_path: &str, bytes: &[u8]) -> anyhow::Result<()>;
}

/// Filesystem-backed `BlobStore`. Containers are top-level directories
/// under `root`; blob paths (already namespaced by tenant/date/correlation
/// id, §3) are joined onto the container directory verbatim.
pub struct FilesystemBlobStore {
    root: PathBuf,
    base_url: String,
}

impl FilesystemBlobStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into(),
        }
    }

    fn resolve(&self, container: &str, blob_path: &str) -> PathBuf {
        self.root.join(container).join(blob_path)
    }

    fn uploads_path(&self, blob_path: &str) -> PathBuf {
        self.resolve("uploads", blob_path)
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn ensure_container(&self, container: &str) -> anyhow::Result<()> {
        fs::create_dir_all(self.root.join(container)).await?;
        Ok(())
    }

    async fn presign_upload(
        &self,
        blob_path: &str,
        content_type: &str,
        expires_at: DateTime<Utc>,
    ) -> anyhow::Result<String> {
        self.ensure_container("uploads").await?;
        if let Some(parent) = self.uploads_path(blob_path).parent() {
            fs::create_dir_all(parent).await?;
        }
        let token = Uuid::new_v4().simple().to_string();
        Ok(format!(
            "{}/uploads/{}?token={}&content_type={}&expires={}",
            self.base_url,
            blob_path,
            token,
            urlencoding_lite(content_type),
            expires_at.timestamp()
        ))
    }

    async fn presign_download(&self, blob_path: &str, ttl: Duration) -> anyhow::Result<String> {
        let expires_at = Utc::now() + ttl;
        let token = Uuid::new_v4().simple().to_string();
        Ok(format!(
            "{}/uploads/{}?token={}&expires={}",
            self.base_url,
            blob_path,
            token,
            expires_at.timestamp()
        ))
    }

    async fn stat(&self, blob_path: &str) -> anyhow::Result<Option<BlobStat>> {
        let path = self.uploads_path(blob_path);
        match fs::metadata(&path).await {
            Ok(meta) => Ok(Some(BlobStat {
                size_bytes: meta.len(),
            })),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn write(&self, blob_path: &str, bytes: &[u8]) -> anyhow::Result<()> {
        let path = self.uploads_path(blob_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, bytes).await?;
        Ok(())
    }
}

/// Minimal query-parameter escaping; the token space here is a MIME type,
/// not arbitrary user text, so a full percent-encoding crate is overkill.
fn urlencoding_lite(value: &str) -> String {
    value.replace('/', "%2F").replace(' ', "%20")
}

pub fn is_under(root: &Path, candidate: &Path) -> bool {
    candidate.starts_with(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_stat_reports_size() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemBlobStore::new(dir.path(), "http://localhost:9000");
        store.write("acme/2026-07-26/corr-1_scan.pdf", b"hello").await.unwrap();
        let stat = store
            .stat("acme/2026-07-26/corr-1_scan.pdf")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stat.size_bytes, 5);
    }

    #[tokio::test]
    async fn stat_of_missing_blob_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemBlobStore::new(dir.path(), "http://localhost:9000");
        assert!(store.stat("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn presign_upload_url_carries_expiry_and_content_type() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemBlobStore::new(dir.path(), "http://localhost:9000");
        let expires_at = Utc::now() + Duration::hours(24);
        let url = store
            .presign_upload("acme/2026-07-26/corr-1_scan.pdf", "application/pdf", expires_at)
            .await
            .unwrap();
        assert!(url.contains("content_type=application%2Fpdf"));
        assert!(url.contains(&expires_at.timestamp().to_string()));
    }
}
