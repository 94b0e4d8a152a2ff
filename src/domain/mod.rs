pub mod capability;
pub mod credential;
pub mod delivery;
pub mod idempotency;
pub mod queue_message;
pub mod rate_limit;
pub mod submission;
pub mod tenant;

pub use capability::*;
pub use credential::*;
pub use delivery::*;
pub use idempotency::*;
pub use queue_message::*;
pub use rate_limit::*;
pub use submission::*;
pub use tenant::*;

/// Normalize a tenant identifier into the lossy form used for session
/// names and blob-path prefixes: lowercase, non-alphanumerics collapsed
/// to a single underscore.
///
/// This is deliberately lossy (two tenants differing only in punctuation
/// collide). The canonical tenant identity is always the `tenant` column /
/// partition key on the record itself; this function's output must never
/// be parsed back into a display name outside of logging.
pub fn normalize_tenant(tenant: &str) -> String {
    let mut out = String::with_capacity(tenant.len());
    let mut last_was_underscore = false;
    for c in tenant.chars() {
        if c.is_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_was_underscore = false;
        } else if !last_was_underscore {
            out.push('_');
            last_was_underscore = true;
        }
    }
    out.trim_matches('_').to_string()
}

pub fn demographics_session(tenant: &str) -> String {
    format!("demographics_{}", normalize_tenant(tenant))
}

pub fn webhook_session(tenant: &str) -> String {
    format!("webhook_{}", normalize_tenant(tenant))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_punctuation() {
        assert_eq!(normalize_tenant("Smith & Associates"), "smith_associates");
        assert_eq!(normalize_tenant("Smith &  Associates"), "smith_associates");
        assert_eq!(normalize_tenant("---Acme---"), "acme");
    }

    #[test]
    fn session_names_are_prefixed() {
        assert_eq!(
            demographics_session("Smith & Associates"),
            "demographics_smith_associates"
        );
        assert_eq!(
            webhook_session("Smith & Associates"),
            "webhook_smith_associates"
        );
    }
}
