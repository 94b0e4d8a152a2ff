use serde::{Deserialize, Serialize};

/// A tenant (historically "law firm"). Referenced read-only by the core;
/// lifecycle management happens out-of-band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub display_name: String,
    pub allowed_ips: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Active,
    Inactive,
    Archived,
    Deleted,
}
