use std::env;

/// Process-scoped, immutable-after-startup configuration.
///
/// Loaded once in `main` and threaded through `AppState`; never a global
/// singleton (the source sketches used module-level statics for this).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub database_url: String,
    pub port: u16,
    pub webhook_secret: String,
    pub credential_prefix: String,
    pub default_webhook_url: Option<String>,
    pub worker_pool_size: usize,
    pub batch_size_limit_bytes: usize,
    pub object_store_root: String,
    pub object_store_base_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    fn parse(raw: &str) -> Self {
        match raw {
            "production" => Environment::Production,
            "staging" => Environment::Staging,
            _ => Environment::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl AppConfig {
    /// Load configuration from the process environment, loading a `.env`
    /// file first if one is present.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let environment = Environment::parse(
            &env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        );

        Self {
            environment,
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8000),
            webhook_secret: env::var("WEBHOOK_SECRET").expect("WEBHOOK_SECRET must be set"),
            credential_prefix: env::var("CREDENTIAL_PREFIX").unwrap_or_else(|_| "ms_".to_string()),
            default_webhook_url: env::var("DEFAULT_WEBHOOK_URL").ok(),
            worker_pool_size: env::var("WORKER_POOL_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8),
            batch_size_limit_bytes: env::var("BATCH_SIZE_LIMIT_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(250_000),
            object_store_root: env::var("OBJECT_STORE_ROOT")
                .unwrap_or_else(|_| "./uploads".to_string()),
            object_store_base_url: env::var("OBJECT_STORE_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:9000".to_string()),
        }
    }

    /// Per-tenant webhook target override: `WEBHOOK_URL_<TENANT_UPPER_SNAKE>`.
    ///
    /// `tenant` should be the raw tenant identifier (not the normalized
    /// session form); this re-derives the env var's expected casing.
    pub fn tenant_webhook_url_override(&self, tenant: &str) -> Option<String> {
        let key = format!(
            "WEBHOOK_URL_{}",
            tenant
                .chars()
                .map(|c| if c.is_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
                .collect::<String>()
        );
        env::var(key).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parses_unknown_as_development() {
        assert_eq!(Environment::parse("banana"), Environment::Development);
        assert!(!Environment::parse("banana").is_production());
        assert!(Environment::parse("production").is_production());
    }
}
