use std::env;
use anyhow::{Context, Result};

/// Which key-material provider backs data-key generation.
///
/// Selected once at startup. There is no runtime fallback from `Cloud` to
/// `Local`: losing the cloud KMS mid-flight is an outage, not a signal to
/// degrade to locally generated keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KmsBackend {
    /// Keys generated in-process from the OS CSPRNG.
    Local,
    /// Keys generated by an external KMS provider.
    Cloud,
}

/// The authentication core's configuration.
#[derive(Clone)]
pub struct Config {
    /// The URL of the PostgreSQL database backing the key store.
    pub database_url: String,
    /// The URL of the Redis server backing the session store.
    pub redis_url: String,
    /// The `iss` claim stamped into every token.
    pub issuer: String,
    /// The `aud` claim stamped into every token.
    pub audience: String,
    /// Access token lifetime in minutes for adult-class accounts.
    pub access_token_minutes: i64,
    /// Access token lifetime in minutes for minor/child-class accounts.
    pub access_token_minutes_minor: i64,
    /// Refresh token lifetime in days for adult-class accounts.
    pub refresh_token_days: i64,
    /// Refresh token lifetime in hours for child-class accounts.
    pub refresh_token_hours_child: i64,
    /// TTL for in-process cached key material, in seconds.
    pub key_cache_ttl_secs: u64,
    /// Interval between scheduled key-rotation sweeps, in days.
    pub rotation_interval_days: i64,
    /// How long a rotated-out signing key keeps verifying tokens, in days.
    pub signing_key_retention_days: i64,
    /// The key-material provider selected for this deployment.
    pub kms_backend: KmsBackend,
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let kms_backend = match env::var("KMS_BACKEND")
            .unwrap_or_else(|_| "local".to_string())
            .as_str()
        {
            "local" => KmsBackend::Local,
            "cloud" => KmsBackend::Cloud,
            other => anyhow::bail!("KMS_BACKEND must be 'local' or 'cloud', got '{}'", other),
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL must be set")?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            issuer: env::var("TOKEN_ISSUER")
                .unwrap_or_else(|_| "tokenvault".to_string()),
            audience: env::var("TOKEN_AUDIENCE")
                .unwrap_or_else(|_| "tokenvault-api".to_string()),
            access_token_minutes: env::var("ACCESS_TOKEN_MINUTES")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .context("Invalid ACCESS_TOKEN_MINUTES")?,
            access_token_minutes_minor: env::var("ACCESS_TOKEN_MINUTES_MINOR")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("Invalid ACCESS_TOKEN_MINUTES_MINOR")?,
            refresh_token_days: env::var("REFRESH_TOKEN_DAYS")
                .unwrap_or_else(|_| "7".to_string())
                .parse()
                .context("Invalid REFRESH_TOKEN_DAYS")?,
            refresh_token_hours_child: env::var("REFRESH_TOKEN_HOURS_CHILD")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .context("Invalid REFRESH_TOKEN_HOURS_CHILD")?,
            key_cache_ttl_secs: env::var("KEY_CACHE_TTL_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .context("Invalid KEY_CACHE_TTL_SECS")?,
            rotation_interval_days: env::var("KEY_ROTATION_INTERVAL_DAYS")
                .unwrap_or_else(|_| "90".to_string())
                .parse()
                .context("Invalid KEY_ROTATION_INTERVAL_DAYS")?,
            signing_key_retention_days: env::var("SIGNING_KEY_RETENTION_DAYS")
                .unwrap_or_else(|_| "7".to_string())
                .parse()
                .context("Invalid SIGNING_KEY_RETENTION_DAYS")?,
            kms_backend,
        })
    }
}
