use argon2::Argon2;
use base64::{engine::general_purpose, Engine as _};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use zeroize::Zeroizing;

use crate::crypto::aes;
use crate::error::{AuthError, Result};
use crate::keys::cache::KeyCache;
use crate::keys::store::KeyStore;
use crate::models::key::{EncryptedKey, KeyMetadata, KeyType};

/// Storage id for a master key version.
fn master_key_id(version: u32) -> String {
    format!("master-v{}", version)
}

struct MasterState {
    active_version: u32,
    keys: HashMap<u32, Zeroizing<[u8; aes::KEY_SIZE]>>,
}

/// Owns the single active master key used to wrap and unwrap data keys.
///
/// The master key never encrypts application data, and its own record in the
/// key store is never wrapped. Retired versions stay loaded: rotating the
/// master key does not re-wrap existing data keys, so ciphertext wrapped
/// under an earlier version must remain decryptable.
pub struct MasterKeyManager {
    store: Arc<dyn KeyStore>,
    state: RwLock<Option<MasterState>>,
    caches: RwLock<Vec<KeyCache>>,
}

impl MasterKeyManager {
    /// Creates an uninitialized manager over the given key store.
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self {
            store,
            state: RwLock::new(None),
            caches: RwLock::new(Vec::new()),
        }
    }

    /// Loads the master key lineage from the store, generating version 1 if
    /// none exists yet. The process cannot start without this succeeding.
    pub async fn initialize(&self) -> Result<()> {
        let records = self.store.list(KeyType::Master).await?;

        if records.is_empty() {
            tracing::warn!("⚠️  No master key found, generating version 1...");
            let key = aes::generate_key();
            let record = Self::master_record(key.as_bytes(), 1);
            self.store.put(&record).await?;

            let mut keys = HashMap::new();
            keys.insert(1, Zeroizing::new(*key.as_bytes()));
            *self.state.write().await = Some(MasterState {
                active_version: 1,
                keys,
            });

            tracing::info!("✅ Master key version 1 generated and persisted");
            return Ok(());
        }

        let mut keys = HashMap::new();
        let mut active_version = None;
        for record in &records {
            record.verify_checksum()?;
            let material = general_purpose::STANDARD
                .decode(&record.encrypted_key_material)
                .map_err(|e| AuthError::KeyIntegrity(format!("Master key decode failed: {}", e)))?;
            let material: [u8; aes::KEY_SIZE] = material
                .try_into()
                .map_err(|_| AuthError::KeyIntegrity("Invalid master key size".to_string()))?;

            keys.insert(record.metadata.version, Zeroizing::new(material));
            if record.metadata.is_active {
                active_version = Some(record.metadata.version);
            }
        }

        let active_version =
            active_version.ok_or(AuthError::MasterKeyUninitialized)?;
        let loaded = keys.len();
        *self.state.write().await = Some(MasterState {
            active_version,
            keys,
        });

        tracing::info!(
            "✅ Master key initialized: active v{}, {} version(s) loaded",
            active_version,
            loaded
        );
        Ok(())
    }

    fn master_record(material: &[u8; aes::KEY_SIZE], version: u32) -> EncryptedKey {
        // Master material is stored unwrapped; the checksum still guards it.
        let encoded = general_purpose::STANDARD.encode(material);
        let metadata = KeyMetadata::new(master_key_id(version), KeyType::Master, version);
        EncryptedKey::new(encoded, metadata)
    }

    /// Registers an in-process cache to be flushed on emergency rotation.
    pub async fn register_cache(&self, cache: KeyCache) {
        self.caches.write().await.push(cache);
    }

    /// The currently active master key version.
    pub async fn active_version(&self) -> Result<u32> {
        let state = self.state.read().await;
        state
            .as_ref()
            .map(|s| s.active_version)
            .ok_or(AuthError::MasterKeyUninitialized)
    }

    /// Wraps plaintext key material under the active master key.
    ///
    /// # Returns
    ///
    /// The base64-encoded sealed bytes (`IV || tag || ciphertext`) and the
    /// master key version that wrapped them.
    pub async fn wrap(&self, plaintext: &[u8]) -> Result<(String, u32)> {
        let state = self.state.read().await;
        let state = state.as_ref().ok_or(AuthError::MasterKeyUninitialized)?;
        let key = state
            .keys
            .get(&state.active_version)
            .ok_or(AuthError::MasterKeyUninitialized)?;

        let sealed = aes::seal(key, plaintext)?;
        Ok((general_purpose::STANDARD.encode(sealed), state.active_version))
    }

    /// Unwraps material wrapped under the given master key version.
    ///
    /// Fails with `KeyDecryption` when the authentication tag does not
    /// verify (tampered ciphertext or wrong key).
    pub async fn unwrap(&self, ciphertext: &str, master_version: u32) -> Result<Zeroizing<Vec<u8>>> {
        let state = self.state.read().await;
        let state = state.as_ref().ok_or(AuthError::MasterKeyUninitialized)?;
        let key = state
            .keys
            .get(&master_version)
            .ok_or_else(|| AuthError::KeyNotFound(master_key_id(master_version)))?;

        let sealed = general_purpose::STANDARD
            .decode(ciphertext)
            .map_err(|e| AuthError::KeyDecryption(format!("Invalid base64: {}", e)))?;
        Ok(Zeroizing::new(aes::open(key, &sealed)?))
    }

    /// Generates and persists a new master key version.
    ///
    /// Existing data keys stay wrapped under their original version; the
    /// retired version is kept loaded and on disk to decrypt them.
    pub async fn rotate_master(&self) -> Result<u32> {
        // Store I/O happens before the state lock is taken; wrap/unwrap
        // keep running against the old version until the swap below.
        let old_version = self.active_version().await?;
        let new_version = old_version + 1;

        let key = aes::generate_key();
        let record = Self::master_record(key.as_bytes(), new_version);
        self.store.put(&record).await?;

        if let Some(mut old_record) = self.store.get(&master_key_id(old_version)).await? {
            old_record.metadata.mark_rotated();
            self.store
                .update_metadata(&master_key_id(old_version), &old_record.metadata)
                .await?;
        }

        let mut state_guard = self.state.write().await;
        let state = state_guard.as_mut().ok_or(AuthError::MasterKeyUninitialized)?;
        state.keys.insert(new_version, Zeroizing::new(*key.as_bytes()));
        state.active_version = new_version;

        tracing::info!("🔑 Master key rotated: v{} -> v{}", old_version, new_version);
        Ok(new_version)
    }

    /// Rotates the master key and flushes every registered in-process cache.
    ///
    /// Only for suspected compromise: scheduled rotation leaves caches warm.
    pub async fn emergency_rotate(&self) -> Result<u32> {
        let new_version = self.rotate_master().await?;

        let caches = self.caches.read().await;
        for cache in caches.iter() {
            cache.clear().await;
        }
        tracing::warn!(
            "⚠️  Emergency master rotation to v{}: {} cache(s) flushed",
            new_version,
            caches.len()
        );
        Ok(new_version)
    }

    /// Derives a 256-bit passphrase key from the given master key version
    /// for protecting signing private keys at rest.
    ///
    /// The version is pinned so keys protected before a master rotation stay
    /// recoverable afterwards.
    pub async fn derive_passphrase_key(
        &self,
        salt: &[u8],
        master_version: u32,
    ) -> Result<Zeroizing<[u8; aes::KEY_SIZE]>> {
        let state = self.state.read().await;
        let state = state.as_ref().ok_or(AuthError::MasterKeyUninitialized)?;
        let key = state
            .keys
            .get(&master_version)
            .ok_or_else(|| AuthError::KeyNotFound(master_key_id(master_version)))?;

        let mut derived = Zeroizing::new([0u8; aes::KEY_SIZE]);
        Argon2::default()
            .hash_password_into(key.as_slice(), salt, &mut derived[..])
            .map_err(|e| AuthError::Encryption(format!("Argon2 key derivation error: {}", e)))?;
        Ok(derived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::store::MemoryKeyStore;

    async fn initialized_manager() -> MasterKeyManager {
        let store = Arc::new(MemoryKeyStore::new());
        let manager = MasterKeyManager::new(store);
        manager.initialize().await.unwrap();
        manager
    }

    #[tokio::test]
    async fn wrap_unwrap_round_trip() {
        let manager = initialized_manager().await;
        let material = b"thirty-two bytes of key material";

        let (wrapped, version) = manager.wrap(material).await.unwrap();
        let unwrapped = manager.unwrap(&wrapped, version).await.unwrap();

        assert_eq!(material.to_vec(), *unwrapped);
    }

    #[tokio::test]
    async fn unwrap_fails_closed_on_tamper() {
        let manager = initialized_manager().await;
        let (wrapped, version) = manager.wrap(b"secret").await.unwrap();

        let mut sealed = general_purpose::STANDARD.decode(&wrapped).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        let tampered = general_purpose::STANDARD.encode(sealed);

        assert!(matches!(
            manager.unwrap(&tampered, version).await,
            Err(AuthError::KeyDecryption(_))
        ));
    }

    #[tokio::test]
    async fn rotation_keeps_old_wraps_decryptable() {
        let manager = initialized_manager().await;
        let (wrapped, old_version) = manager.wrap(b"wrapped before rotation").await.unwrap();

        let new_version = manager.rotate_master().await.unwrap();
        assert_eq!(new_version, old_version + 1);

        let unwrapped = manager.unwrap(&wrapped, old_version).await.unwrap();
        assert_eq!(b"wrapped before rotation".to_vec(), *unwrapped);

        let (_, version_now) = manager.wrap(b"wrapped after").await.unwrap();
        assert_eq!(version_now, new_version);
    }

    #[tokio::test]
    async fn uninitialized_manager_refuses_to_wrap() {
        let store = Arc::new(MemoryKeyStore::new());
        let manager = MasterKeyManager::new(store);

        assert!(matches!(
            manager.wrap(b"x").await,
            Err(AuthError::MasterKeyUninitialized)
        ));
    }

    #[tokio::test]
    async fn initialize_reloads_persisted_lineage() {
        let store = Arc::new(MemoryKeyStore::new());
        let manager = MasterKeyManager::new(store.clone());
        manager.initialize().await.unwrap();
        let (wrapped, version) = manager.wrap(b"survives restart").await.unwrap();

        let reloaded = MasterKeyManager::new(store);
        reloaded.initialize().await.unwrap();

        let unwrapped = reloaded.unwrap(&wrapped, version).await.unwrap();
        assert_eq!(b"survives restart".to_vec(), *unwrapped);
    }
}
