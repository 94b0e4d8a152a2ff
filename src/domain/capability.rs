use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityStatus {
    Pending,
    Uploaded,
    Processing,
    Completed,
    Failed,
}

/// Lifecycle record for one issued capability URL (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub correlation_id: String,
    pub tenant: String,
    pub blob_path: String,
    pub content_type: String,
    pub expires_at: DateTime<Utc>,
    pub status: CapabilityStatus,
    pub file_size: Option<u64>,
    pub error: Option<String>,
}

/// Sanitize a filename for inclusion in a blob path: characters outside
/// `[A-Za-z0-9.-]` become `_`, runs of `_` collapse to one, and the
/// result is lowercased.
pub fn sanitize_filename(filename: &str) -> String {
    let mut out = String::with_capacity(filename.len());
    let mut last_was_underscore = false;
    for c in filename.chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
            out.push(c.to_ascii_lowercase());
            last_was_underscore = false;
        } else if !last_was_underscore {
            out.push('_');
            last_was_underscore = true;
        }
    }
    out
}

/// Deterministic blob path: `<norm-tenant>/<yyyy-mm-dd>/<correlation_id>_<sanitized-filename>`.
pub fn blob_path(tenant: &str, correlation_id: &str, filename: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}/{}/{}_{}",
        super::normalize_tenant(tenant),
        now.format("%Y-%m-%d"),
        correlation_id,
        sanitize_filename(filename)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_collapses_disallowed_runs() {
        assert_eq!(sanitize_filename("My File!!.PDF"), "my_file_.pdf");
        assert_eq!(sanitize_filename("a//b"), "a_b");
    }

    #[test]
    fn blob_path_is_deterministic_given_inputs() {
        let now = DateTime::parse_from_rfc3339("2026-07-26T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let path = blob_path("Smith & Associates", "corr-1", "Scan.pdf", now);
        assert_eq!(path, "smith_associates/2026-07-26/corr-1_scan.pdf");
    }
}
