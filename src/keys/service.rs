use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::crypto::master::MasterKeyManager;
use crate::crypto::signing;
use crate::error::{AuthError, Result};
use crate::keys::cache::KeyCache;
use crate::keys::provider::KmsProvider;
use crate::keys::store::KeyStore;
use crate::models::key::{EncryptedKey, KeyMetadata, KeyType};

/// Metadata tag recording which master key version wrapped a record.
const TAG_MASTER_VERSION: &str = "master_version";

/// A freshly generated symmetric data key.
pub struct GeneratedKey {
    /// The new key's identifier.
    pub key_id: String,
    /// The plaintext key material. Zeroized on drop.
    pub plaintext: Zeroizing<Vec<u8>>,
}

/// A freshly generated RS256 signing key pair.
pub struct GeneratedSigningKey {
    /// The new pair's identifier; goes into JWT headers as `kid`.
    pub key_id: String,
    /// PKCS#8 public key PEM.
    pub public_pem: String,
    /// PKCS#8 private key PEM. Zeroized on drop.
    pub private_pem: Zeroizing<String>,
}

/// Summary of one scheduled rotation sweep.
#[derive(Debug, Default)]
pub struct RotationSummary {
    /// Keys rotated successfully.
    pub rotated: usize,
    /// Keys whose rotation failed; the sweep continued past them.
    pub failed: usize,
}

/// Produces, caches, and retrieves purpose-scoped data keys.
///
/// Symmetric data keys are wrapped by the master key; RS256 signing pairs
/// store their private half passphrase-protected. Every load from the store
/// verifies the record checksum before the material is trusted.
pub struct DataKeyService {
    store: Arc<dyn KeyStore>,
    master: Arc<MasterKeyManager>,
    provider: Arc<dyn KmsProvider>,
    cache: KeyCache,
    signing_retention: chrono::Duration,
    active_signing: RwLock<Option<String>>,
}

impl DataKeyService {
    /// Wires up the service and registers its cache for emergency flushes.
    pub async fn new(
        store: Arc<dyn KeyStore>,
        master: Arc<MasterKeyManager>,
        provider: Arc<dyn KmsProvider>,
        cache_ttl: Duration,
        signing_retention_days: i64,
    ) -> Self {
        let cache = KeyCache::new(cache_ttl);
        master.register_cache(cache.clone()).await;
        tracing::info!(
            "✅ DataKeyService initialized (provider: {}, cache TTL: {:?})",
            provider.name(),
            cache_ttl
        );
        Self {
            store,
            master,
            provider,
            cache,
            signing_retention: chrono::Duration::days(signing_retention_days),
            active_signing: RwLock::new(None),
        }
    }

    /// Generates a new symmetric data key, persists its wrapped form, and
    /// caches the plaintext.
    pub async fn generate_data_key(&self, key_type: KeyType) -> Result<GeneratedKey> {
        if !matches!(key_type, KeyType::DataEncryption) {
            return Err(AuthError::Internal(format!(
                "generate_data_key does not handle {} keys",
                key_type.as_str()
            )));
        }

        let material = self.provider.generate_key_material(key_type).await?;
        let key_id = format!("{}-{}", key_type.as_str(), Uuid::new_v4());

        let (wrapped, master_version) = self.master.wrap(&material).await?;
        let mut metadata = KeyMetadata::new(key_id.clone(), key_type, 1);
        metadata
            .tags
            .insert(TAG_MASTER_VERSION.to_string(), master_version.to_string());

        let record = EncryptedKey::new(wrapped, metadata.clone());
        self.store.put(&record).await?;
        self.cache
            .insert(key_id.clone(), material.clone(), metadata)
            .await;

        tracing::info!("🔑 Data key generated: {}", key_id);
        Ok(GeneratedKey {
            key_id,
            plaintext: material,
        })
    }

    /// Retrieves a data key's plaintext, from cache or store.
    ///
    /// Retired keys are still served: they decrypt historical ciphertext.
    /// Compromised keys are not.
    pub async fn get_key(&self, key_id: &str) -> Result<Zeroizing<Vec<u8>>> {
        if let Some(plaintext) = self.cache.get(key_id).await {
            tracing::debug!("✅ Key served from cache: {}", key_id);
            return Ok(plaintext);
        }

        let record = self
            .store
            .get(key_id)
            .await?
            .ok_or_else(|| AuthError::KeyNotFound(key_id.to_string()))?;
        self.check_integrity(&record).await?;

        let master_version = self.wrapping_version(&record.metadata)?;
        let plaintext = self
            .master
            .unwrap(&record.encrypted_key_material, master_version)
            .await?;

        let mut metadata = record.metadata;
        metadata.usage_count += 1;
        metadata.last_used = Some(chrono::Utc::now());
        self.store.update_metadata(key_id, &metadata).await?;
        self.cache
            .insert(key_id.to_string(), plaintext.clone(), metadata)
            .await;

        tracing::debug!("✅ Key loaded from store and cached: {}", key_id);
        Ok(plaintext)
    }

    /// Rotates a key: generates a replacement, retires the old record
    /// (kept, inactive), and evicts the old cache entry.
    ///
    /// # Returns
    ///
    /// The replacement key's identifier. Callers must update their
    /// reference.
    pub async fn rotate_key(&self, key_id: &str) -> Result<String> {
        // Signing pairs live under {kid}/private; try the plain id first.
        let (record, is_signing) = match self.store.get(key_id).await? {
            Some(record) => (record, false),
            None => {
                let private_id = format!("{}/private", key_id);
                let record = self
                    .store
                    .get(&private_id)
                    .await?
                    .ok_or_else(|| AuthError::KeyNotFound(key_id.to_string()))?;
                (record, true)
            }
        };

        let new_key_id = if is_signing {
            self.generate_signing_key_pair().await?.key_id
        } else {
            match record.metadata.key_type {
                KeyType::DataEncryption => self.generate_data_key(KeyType::DataEncryption).await?.key_id,
                KeyType::Master => {
                    return Err(AuthError::Internal(
                        "Master key rotation goes through MasterKeyManager".to_string(),
                    ))
                }
                other => {
                    return Err(AuthError::Internal(format!(
                        "Cannot rotate {} keys",
                        other.as_str()
                    )))
                }
            }
        };

        if is_signing {
            self.retire_signing_pair(key_id).await?;
        } else {
            let mut metadata = record.metadata;
            metadata.mark_rotated();
            self.store.update_metadata(key_id, &metadata).await?;
            self.cache.evict(key_id).await;
        }

        tracing::info!("🔑 Key rotated: {} -> {}", key_id, new_key_id);
        Ok(new_key_id)
    }

    async fn retire_signing_pair(&self, kid: &str) -> Result<()> {
        for suffix in ["private", "public"] {
            let record_id = format!("{}/{}", kid, suffix);
            if let Some(mut record) = self.store.get(&record_id).await? {
                record.metadata.mark_rotated();
                self.store.update_metadata(&record_id, &record.metadata).await?;
            }
            self.cache.evict(&record_id).await;
        }
        Ok(())
    }

    /// Generates an RSA-4096 signing pair. The private half is encrypted at
    /// rest under a passphrase derived from the master key; the pair becomes
    /// the active signing key.
    pub async fn generate_signing_key_pair(&self) -> Result<GeneratedSigningKey> {
        let pair = tokio::task::spawn_blocking(signing::generate_keypair)
            .await
            .map_err(|e| AuthError::Internal(format!("Key generation task failed: {}", e)))??;

        let kid = format!("jwt-{}", Uuid::new_v4());
        let master_version = self.master.active_version().await?;
        let protected =
            signing::protect_private_pem(&self.master, &pair.private_pem, master_version).await?;

        let private_id = format!("{}/private", kid);
        let mut private_meta = KeyMetadata::new(private_id.clone(), KeyType::JwtSigning, 1);
        private_meta
            .tags
            .insert(TAG_MASTER_VERSION.to_string(), master_version.to_string());
        self.store
            .put(&EncryptedKey::new(protected, private_meta.clone()))
            .await?;

        let public_id = format!("{}/public", kid);
        let public_meta = KeyMetadata::new(public_id.clone(), KeyType::JwtSigning, 1);
        let encoded_public = base64_encode(pair.public_pem.as_bytes());
        self.store
            .put(&EncryptedKey::new(encoded_public, public_meta.clone()))
            .await?;

        self.cache
            .insert(
                private_id,
                Zeroizing::new(pair.private_pem.as_bytes().to_vec()),
                private_meta,
            )
            .await;
        self.cache
            .insert(
                public_id,
                Zeroizing::new(pair.public_pem.as_bytes().to_vec()),
                public_meta,
            )
            .await;

        *self.active_signing.write().await = Some(kid.clone());

        tracing::info!("🔑 Signing key pair generated: {}", kid);
        Ok(GeneratedSigningKey {
            key_id: kid,
            public_pem: pair.public_pem,
            private_pem: pair.private_pem,
        })
    }

    /// The active signing key's id, generating the first pair if none exists.
    pub async fn ensure_signing_key(&self) -> Result<String> {
        if let Some(kid) = self.active_signing.read().await.clone() {
            return Ok(kid);
        }

        // Recover the active pair from the store (fresh process, keys exist).
        let records = self.store.list(KeyType::JwtSigning).await?;
        let mut newest: Option<&EncryptedKey> = None;
        for record in &records {
            if record.metadata.is_active && record.metadata.key_id.ends_with("/private") {
                let newer = newest
                    .map(|n| record.metadata.created_at > n.metadata.created_at)
                    .unwrap_or(true);
                if newer {
                    newest = Some(record);
                }
            }
        }

        if let Some(record) = newest {
            let kid = record
                .metadata
                .key_id
                .trim_end_matches("/private")
                .to_string();
            *self.active_signing.write().await = Some(kid.clone());
            return Ok(kid);
        }

        Ok(self.generate_signing_key_pair().await?.key_id)
    }

    /// The private signing PEM for a key id. Serves retired keys too; old
    /// keys never sign new tokens because issuance always asks for the
    /// active id.
    pub async fn signing_private_pem(&self, kid: &str) -> Result<Zeroizing<String>> {
        let record_id = format!("{}/private", kid);
        if let Some(bytes) = self.cache.get(&record_id).await {
            return pem_from_bytes(&bytes);
        }

        let record = self
            .store
            .get(&record_id)
            .await?
            .ok_or_else(|| AuthError::KeyNotFound(kid.to_string()))?;
        self.check_integrity(&record).await?;

        let master_version = self.wrapping_version(&record.metadata)?;
        let pem =
            signing::recover_private_pem(&self.master, &record.encrypted_key_material, master_version)
                .await?;

        self.cache
            .insert(
                record_id,
                Zeroizing::new(pem.as_bytes().to_vec()),
                record.metadata,
            )
            .await;
        Ok(pem)
    }

    /// The public signing PEM for a key id, honoring the retention window:
    /// a rotated-out key still verifies in-flight tokens until the window
    /// closes, then disappears.
    pub async fn signing_public_pem(&self, kid: &str) -> Result<String> {
        let record_id = format!("{}/public", kid);
        if let Some(bytes) = self.cache.get(&record_id).await {
            return String::from_utf8(bytes.to_vec())
                .map_err(|e| AuthError::Internal(format!("Cached PEM is not UTF-8: {}", e)));
        }

        let record = self
            .store
            .get(&record_id)
            .await?
            .ok_or_else(|| AuthError::KeyNotFound(kid.to_string()))?;
        self.check_integrity(&record).await?;

        if !record.metadata.is_active {
            let retired_at = record.metadata.rotated_at.unwrap_or(record.metadata.created_at);
            if chrono::Utc::now() - retired_at > self.signing_retention {
                tracing::debug!("🧹 Signing key past retention, refusing: {}", kid);
                return Err(AuthError::KeyNotFound(kid.to_string()));
            }
        }

        let pem_bytes = base64_decode(&record.encrypted_key_material)?;
        let pem = String::from_utf8(pem_bytes)
            .map_err(|e| AuthError::KeyIntegrity(format!("Public PEM is not UTF-8: {}", e)))?;

        self.cache
            .insert(
                record_id,
                Zeroizing::new(pem.as_bytes().to_vec()),
                record.metadata,
            )
            .await;
        Ok(pem)
    }

    /// Rotates every active data and signing key. Per-key failures are
    /// logged and skipped; one bad key never aborts the sweep.
    pub async fn rotate_all(&self) -> Result<RotationSummary> {
        let mut summary = RotationSummary::default();

        let mut targets: Vec<String> = Vec::new();
        for record in self.store.list(KeyType::DataEncryption).await? {
            if record.metadata.is_active {
                targets.push(record.metadata.key_id);
            }
        }
        for record in self.store.list(KeyType::JwtSigning).await? {
            if record.metadata.is_active && record.metadata.key_id.ends_with("/private") {
                targets.push(record.metadata.key_id.trim_end_matches("/private").to_string());
            }
        }

        for key_id in targets {
            match self.rotate_key(&key_id).await {
                Ok(new_id) => {
                    summary.rotated += 1;
                    tracing::info!("✅ Scheduled rotation: {} -> {}", key_id, new_id);
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!("❌ Scheduled rotation failed for {}: {}", key_id, e);
                }
            }
        }

        Ok(summary)
    }

    async fn check_integrity(&self, record: &EncryptedKey) -> Result<()> {
        if record.metadata.is_compromised() {
            return Err(AuthError::KeyIntegrity(format!(
                "Key {} is marked compromised",
                record.metadata.key_id
            )));
        }

        if let Err(e) = record.verify_checksum() {
            tracing::error!(
                "❌ Integrity failure for key {}, marking compromised",
                record.metadata.key_id
            );
            let mut metadata = record.metadata.clone();
            metadata.mark_compromised();
            if let Err(update_err) = self
                .store
                .update_metadata(&record.metadata.key_id, &metadata)
                .await
            {
                tracing::error!(
                    "❌ Failed to persist compromise marker for {}: {}",
                    record.metadata.key_id,
                    update_err
                );
            }
            self.cache.evict(&record.metadata.key_id).await;
            return Err(e);
        }
        Ok(())
    }

    fn wrapping_version(&self, metadata: &KeyMetadata) -> Result<u32> {
        metadata
            .tags
            .get(TAG_MASTER_VERSION)
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| {
                AuthError::KeyIntegrity(format!(
                    "Key {} has no wrapping master version",
                    metadata.key_id
                ))
            })
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::{engine::general_purpose, Engine as _};
    general_purpose::STANDARD.encode(bytes)
}

fn base64_decode(s: &str) -> Result<Vec<u8>> {
    use base64::{engine::general_purpose, Engine as _};
    general_purpose::STANDARD
        .decode(s)
        .map_err(|e| AuthError::KeyIntegrity(format!("Invalid base64 material: {}", e)))
}

fn pem_from_bytes(bytes: &Zeroizing<Vec<u8>>) -> Result<Zeroizing<String>> {
    String::from_utf8(bytes.to_vec())
        .map(Zeroizing::new)
        .map_err(|e| AuthError::Internal(format!("Cached PEM is not UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::provider::LocalKmsProvider;
    use crate::keys::store::MemoryKeyStore;
    use crate::models::key::checksum_of;

    async fn service() -> (DataKeyService, Arc<MemoryKeyStore>) {
        let store = Arc::new(MemoryKeyStore::new());
        let master = Arc::new(MasterKeyManager::new(store.clone()));
        master.initialize().await.unwrap();
        let svc = DataKeyService::new(
            store.clone() as Arc<dyn KeyStore>,
            master,
            Arc::new(LocalKmsProvider::new()),
            Duration::from_secs(3600),
            7,
        )
        .await;
        (svc, store)
    }

    #[tokio::test]
    async fn generated_key_is_retrievable() {
        let (svc, _) = service().await;
        let generated = svc.generate_data_key(KeyType::DataEncryption).await.unwrap();

        let fetched = svc.get_key(&generated.key_id).await.unwrap();
        assert_eq!(*generated.plaintext, *fetched);
    }

    #[tokio::test]
    async fn cache_miss_reloads_from_store() {
        let (svc, _) = service().await;
        let generated = svc.generate_data_key(KeyType::DataEncryption).await.unwrap();

        svc.cache.clear().await;
        let fetched = svc.get_key(&generated.key_id).await.unwrap();

        assert_eq!(*generated.plaintext, *fetched);
    }

    #[tokio::test]
    async fn rotated_key_still_decrypts_history() {
        let (svc, store) = service().await;
        let generated = svc.generate_data_key(KeyType::DataEncryption).await.unwrap();

        let new_id = svc.rotate_key(&generated.key_id).await.unwrap();
        assert_ne!(new_id, generated.key_id);

        // Old plaintext still served for historical ciphertext.
        let old = svc.get_key(&generated.key_id).await.unwrap();
        assert_eq!(*generated.plaintext, *old);

        let old_record = store.get(&generated.key_id).await.unwrap().unwrap();
        assert!(!old_record.metadata.is_active);
        assert!(old_record.metadata.rotated_at.is_some());
    }

    #[tokio::test]
    async fn checksum_mismatch_marks_key_compromised() {
        let (svc, store) = service().await;
        let generated = svc.generate_data_key(KeyType::DataEncryption).await.unwrap();
        svc.cache.clear().await;

        let mut record = store.get(&generated.key_id).await.unwrap().unwrap();
        record.encrypted_key_material.push('x');
        // Bypass the constructor so the stale checksum survives.
        store.put(&record).await.unwrap();

        assert!(matches!(
            svc.get_key(&generated.key_id).await,
            Err(AuthError::KeyIntegrity(_))
        ));

        let marked = store.get(&generated.key_id).await.unwrap().unwrap();
        assert!(marked.metadata.is_compromised());

        // Even with the material repaired, a compromised key is refused.
        let mut repaired = store.get(&generated.key_id).await.unwrap().unwrap();
        repaired.encrypted_key_material.pop();
        repaired.checksum = checksum_of(&repaired.encrypted_key_material);
        store.put(&repaired).await.unwrap();
        assert!(matches!(
            svc.get_key(&generated.key_id).await,
            Err(AuthError::KeyIntegrity(_))
        ));
    }

    #[tokio::test]
    async fn unknown_key_is_not_found() {
        let (svc, _) = service().await;
        assert!(matches!(
            svc.get_key("data_encryption-missing").await,
            Err(AuthError::KeyNotFound(_))
        ));
    }

    /// Delegates to a `MemoryKeyStore` but refuses metadata updates for one
    /// key, to exercise partial-failure isolation in the rotation sweep.
    struct FlakyStore {
        inner: MemoryKeyStore,
        poisoned: String,
    }

    #[async_trait::async_trait]
    impl KeyStore for FlakyStore {
        async fn put(&self, record: &EncryptedKey) -> Result<()> {
            self.inner.put(record).await
        }
        async fn get(&self, key_id: &str) -> Result<Option<EncryptedKey>> {
            self.inner.get(key_id).await
        }
        async fn update_metadata(&self, key_id: &str, metadata: &KeyMetadata) -> Result<()> {
            if key_id == self.poisoned {
                return Err(AuthError::KeyStoreUnavailable("injected".to_string()));
            }
            self.inner.update_metadata(key_id, metadata).await
        }
        async fn list(&self, key_type: KeyType) -> Result<Vec<EncryptedKey>> {
            self.inner.list(key_type).await
        }
    }

    #[tokio::test]
    async fn rotation_sweep_isolates_failures() {
        let inner = MemoryKeyStore::new();
        let master = Arc::new(MasterKeyManager::new(Arc::new(inner.clone())));
        master.initialize().await.unwrap();

        let bootstrap = DataKeyService::new(
            Arc::new(inner.clone()) as Arc<dyn KeyStore>,
            master.clone(),
            Arc::new(LocalKmsProvider::new()),
            Duration::from_secs(3600),
            7,
        )
        .await;
        let healthy = bootstrap
            .generate_data_key(KeyType::DataEncryption)
            .await
            .unwrap();
        let doomed = bootstrap
            .generate_data_key(KeyType::DataEncryption)
            .await
            .unwrap();

        let flaky = Arc::new(FlakyStore {
            inner: inner.clone(),
            poisoned: doomed.key_id.clone(),
        });
        let svc = DataKeyService::new(
            flaky as Arc<dyn KeyStore>,
            master,
            Arc::new(LocalKmsProvider::new()),
            Duration::from_secs(3600),
            7,
        )
        .await;

        let summary = svc.rotate_all().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.rotated, 1);

        let healthy_record = inner.get(&healthy.key_id).await.unwrap().unwrap();
        assert!(!healthy_record.metadata.is_active);
    }
}
