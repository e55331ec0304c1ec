use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stored metadata for an issued API key.
///
/// The raw key itself is never stored, only its SHA-256 hash, the same
/// discipline as password storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyMetadata {
    /// SHA-256 hex digest of the raw key.
    pub key_hash: String,
    /// The user the key was issued to.
    pub user_id: Uuid,
    /// Capability names the key is scoped to.
    pub scope: Vec<String>,
    /// When the key was issued.
    pub created_at: DateTime<Utc>,
    /// When the key last validated successfully.
    pub last_used: Option<DateTime<Utc>>,
    /// Whether the key is still accepted. Revoked keys are retained for
    /// audit, never deleted.
    pub is_active: bool,
}

/// Outcome of an API key validation.
///
/// An unknown key and a revoked key produce the same response; the
/// distinction exists only in internal logs.
#[derive(Debug, Clone, Default)]
pub struct ApiKeyValidation {
    pub valid: bool,
    pub user_id: Option<Uuid>,
    pub scope: Option<Vec<String>>,
}

impl ApiKeyValidation {
    /// The uniform rejection: says nothing about why.
    pub fn invalid() -> Self {
        Self::default()
    }
}
