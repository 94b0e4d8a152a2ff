use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    DemographicsRead,
    DemographicsWrite,
    DemographicsDelete,
    DemographicsAdmin,
    WebhooksManage,
    FilesUpload,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::DemographicsRead => "demographics:read",
            Scope::DemographicsWrite => "demographics:write",
            Scope::DemographicsDelete => "demographics:delete",
            Scope::DemographicsAdmin => "demographics:admin",
            Scope::WebhooksManage => "webhooks:manage",
            Scope::FilesUpload => "files:upload",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "demographics:read" => Some(Scope::DemographicsRead),
            "demographics:write" => Some(Scope::DemographicsWrite),
            "demographics:delete" => Some(Scope::DemographicsDelete),
            "demographics:admin" => Some(Scope::DemographicsAdmin),
            "webhooks:manage" => Some(Scope::WebhooksManage),
            "files:upload" => Some(Scope::FilesUpload),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    Active,
    Suspended,
    Revoked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitProfile {
    pub burst_limit: u32,
    pub minute_limit: u32,
    pub hour_limit: u32,
    pub day_limit: u32,
}

impl Default for RateLimitProfile {
    fn default() -> Self {
        Self {
            burst_limit: 100,
            minute_limit: 600,
            hour_limit: 10_000,
            day_limit: 100_000,
        }
    }
}

/// A credential record as stored (never holds the plaintext token).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: Uuid,
    pub tenant: String,
    pub public_prefix: String,
    pub secure_hash: String,
    pub scopes: Vec<Scope>,
    pub status: CredentialStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub allowed_ips: Option<Vec<String>>,
    pub rate_limits: RateLimitProfile,
    pub use_count: i64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_used_ip: Option<String>,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Successful authentication result. A value type; no locks held past
/// the call that produced it.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub credential_id: Uuid,
    pub tenant: String,
    pub scopes: Vec<Scope>,
    pub rate_limits: RateLimitProfile,
}

impl TenantContext {
    pub fn has_scope(&self, scope: Scope) -> bool {
        self.scopes.contains(&scope)
    }

    pub fn has_scopes(&self, required: &[Scope]) -> bool {
        required.iter().all(|s| self.has_scope(*s))
    }
}

/// Ordered, distinct failure reasons for credential resolution (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialFailure {
    Malformed,
    NotFound,
    HashMismatch,
    StatusNotActive,
    Expired,
    IpNotAllowed,
    ScopesInsufficient,
}
