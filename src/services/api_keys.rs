use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::models::api_key::{ApiKeyMetadata, ApiKeyValidation};

/// Prefix making issued keys identifiable in logs and secret scanners.
const API_KEY_PREFIX: &str = "tv_";

/// Issues and validates opaque long-lived API keys.
///
/// Only key hashes are retained. Validation answers identically for unknown
/// and revoked keys; which one it was shows up only in internal logs.
#[derive(Clone, Default)]
pub struct ApiKeyService {
    keys: Arc<RwLock<HashMap<String, ApiKeyMetadata>>>,
}

fn api_key_hash(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

impl ApiKeyService {
    /// Creates a new `ApiKeyService`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a new API key scoped to a user and capability set.
    ///
    /// # Returns
    ///
    /// The raw key. This is the only time it exists; only its hash is kept.
    pub async fn issue(&self, user_id: Uuid, scope: Vec<String>) -> Result<String> {
        let mut nonce = [0u8; 16];
        OsRng.fill_bytes(&mut nonce);

        let mut hasher = Sha256::new();
        hasher.update(user_id.as_bytes());
        hasher.update(scope.join(",").as_bytes());
        hasher.update(nonce);
        let digest = hasher.finalize();

        let mut random = [0u8; 32];
        OsRng.fill_bytes(&mut random);

        let mut material = Vec::with_capacity(digest.len() + random.len());
        material.extend_from_slice(&digest);
        material.extend_from_slice(&random);
        let raw = format!(
            "{}{}",
            API_KEY_PREFIX,
            general_purpose::URL_SAFE_NO_PAD.encode(material)
        );

        let metadata = ApiKeyMetadata {
            key_hash: api_key_hash(&raw),
            user_id,
            scope,
            created_at: Utc::now(),
            last_used: None,
            is_active: true,
        };
        let mut keys = self.keys.write().await;
        keys.insert(metadata.key_hash.clone(), metadata);

        tracing::info!("🔑 API key issued for user {}", user_id);
        Ok(raw)
    }

    /// Validates a presented API key.
    pub async fn validate(&self, api_key: &str) -> ApiKeyValidation {
        let hash = api_key_hash(api_key);
        let mut keys = self.keys.write().await;

        match keys.get_mut(&hash) {
            Some(metadata) if metadata.is_active => {
                metadata.last_used = Some(Utc::now());
                ApiKeyValidation {
                    valid: true,
                    user_id: Some(metadata.user_id),
                    scope: Some(metadata.scope.clone()),
                }
            }
            Some(_) => {
                tracing::warn!("❌ Revoked API key presented");
                ApiKeyValidation::invalid()
            }
            None => {
                tracing::debug!("❌ Unknown API key presented");
                ApiKeyValidation::invalid()
            }
        }
    }

    /// Revokes a key. The metadata is retained for audit.
    pub async fn revoke(&self, api_key: &str) -> Result<bool> {
        let hash = api_key_hash(api_key);
        let mut keys = self.keys.write().await;
        match keys.get_mut(&hash) {
            Some(metadata) => {
                metadata.is_active = false;
                tracing::info!("✅ API key revoked for user {}", metadata.user_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn issued_key_validates_with_scope() {
        let service = ApiKeyService::new();
        let user = Uuid::new_v4();
        let key = service
            .issue(user, vec!["files:read".to_string()])
            .await
            .unwrap();

        assert!(key.starts_with(API_KEY_PREFIX));

        let validation = service.validate(&key).await;
        assert!(validation.valid);
        assert_eq!(validation.user_id, Some(user));
        assert_eq!(validation.scope, Some(vec!["files:read".to_string()]));
    }

    #[tokio::test]
    async fn unknown_and_revoked_keys_answer_identically() {
        let service = ApiKeyService::new();
        let key = service.issue(Uuid::new_v4(), vec![]).await.unwrap();
        assert!(service.revoke(&key).await.unwrap());

        let revoked = service.validate(&key).await;
        let unknown = service.validate("tv_never-issued").await;

        assert!(!revoked.valid);
        assert!(!unknown.valid);
        assert!(revoked.user_id.is_none());
        assert!(unknown.user_id.is_none());
        assert!(revoked.scope.is_none());
        assert!(unknown.scope.is_none());
    }

    #[tokio::test]
    async fn validation_touches_last_used() {
        let service = ApiKeyService::new();
        let key = service.issue(Uuid::new_v4(), vec![]).await.unwrap();

        service.validate(&key).await;

        let keys = service.keys.read().await;
        let metadata = keys.get(&api_key_hash(&key)).unwrap();
        assert!(metadata.last_used.is_some());
    }

    #[tokio::test]
    async fn issued_keys_are_unique() {
        let service = ApiKeyService::new();
        let user = Uuid::new_v4();
        let a = service.issue(user, vec![]).await.unwrap();
        let b = service.issue(user, vec![]).await.unwrap();
        assert_ne!(a, b);
    }
}
