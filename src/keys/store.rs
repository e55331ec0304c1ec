use async_trait::async_trait;
use deadpool_postgres::Pool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{AuthError, Result};
use crate::models::key::{EncryptedKey, KeyMetadata, KeyType};

/// Durable storage for key records.
///
/// One record per key, addressable by `key_id`. Records are upserted whole;
/// metadata updates (rotation, compromise markers, usage counters) go through
/// `update_metadata` so the stored material and its checksum stay untouched.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Persists a key record, replacing any record under the same id.
    async fn put(&self, record: &EncryptedKey) -> Result<()>;

    /// Loads a key record by id.
    async fn get(&self, key_id: &str) -> Result<Option<EncryptedKey>>;

    /// Rewrites a record's metadata, leaving material and checksum alone.
    async fn update_metadata(&self, key_id: &str, metadata: &KeyMetadata) -> Result<()>;

    /// Lists every record of the given type, active and retired.
    async fn list(&self, key_type: KeyType) -> Result<Vec<EncryptedKey>>;
}

/// A `KeyStore` backed by PostgreSQL.
#[derive(Clone)]
pub struct PostgresKeyStore {
    pool: Pool,
}

impl PostgresKeyStore {
    /// Creates a new `PostgresKeyStore` over an existing pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    fn encode_metadata(metadata: &KeyMetadata) -> Result<String> {
        sonic_rs::to_string(metadata)
            .map_err(|e| AuthError::Serialization(format!("Key metadata encode failed: {}", e)))
    }

    fn decode_record(material: String, metadata_json: &str, checksum: String) -> Result<EncryptedKey> {
        let metadata: KeyMetadata = sonic_rs::from_str(metadata_json)
            .map_err(|e| AuthError::Serialization(format!("Key metadata decode failed: {}", e)))?;
        Ok(EncryptedKey {
            encrypted_key_material: material,
            metadata,
            checksum,
        })
    }
}

#[async_trait]
impl KeyStore for PostgresKeyStore {
    async fn put(&self, record: &EncryptedKey) -> Result<()> {
        let client = self.pool.get().await?;
        let metadata_json = Self::encode_metadata(&record.metadata)?;

        client
            .execute(
                r#"
                INSERT INTO key_records (key_id, key_type, material, metadata, checksum, is_active, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, NOW())
                ON CONFLICT (key_id) DO UPDATE
                SET material = EXCLUDED.material,
                    metadata = EXCLUDED.metadata,
                    checksum = EXCLUDED.checksum,
                    is_active = EXCLUDED.is_active
                "#,
                &[
                    &record.metadata.key_id,
                    &record.metadata.key_type.as_str(),
                    &record.encrypted_key_material,
                    &metadata_json,
                    &record.checksum,
                    &record.metadata.is_active,
                ],
            )
            .await?;

        tracing::debug!("✅ Key record persisted: {}", record.metadata.key_id);
        Ok(())
    }

    async fn get(&self, key_id: &str) -> Result<Option<EncryptedKey>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT material, metadata, checksum FROM key_records WHERE key_id = $1",
                &[&key_id],
            )
            .await?;

        match row {
            Some(r) => {
                let material: String = r.get("material");
                let metadata_json: String = r.get("metadata");
                let checksum: String = r.get("checksum");
                Ok(Some(Self::decode_record(material, &metadata_json, checksum)?))
            }
            None => Ok(None),
        }
    }

    async fn update_metadata(&self, key_id: &str, metadata: &KeyMetadata) -> Result<()> {
        let client = self.pool.get().await?;
        let metadata_json = Self::encode_metadata(metadata)?;

        let updated = client
            .execute(
                "UPDATE key_records SET metadata = $1, is_active = $2 WHERE key_id = $3",
                &[&metadata_json, &metadata.is_active, &key_id],
            )
            .await?;

        if updated == 0 {
            return Err(AuthError::KeyNotFound(key_id.to_string()));
        }
        Ok(())
    }

    async fn list(&self, key_type: KeyType) -> Result<Vec<EncryptedKey>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT material, metadata, checksum
                FROM key_records
                WHERE key_type = $1
                ORDER BY created_at ASC
                "#,
                &[&key_type.as_str()],
            )
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for r in rows {
            let material: String = r.get("material");
            let metadata_json: String = r.get("metadata");
            let checksum: String = r.get("checksum");
            records.push(Self::decode_record(material, &metadata_json, checksum)?);
        }
        Ok(records)
    }
}

/// An in-process `KeyStore` for tests and single-node deployments.
#[derive(Clone, Default)]
pub struct MemoryKeyStore {
    records: Arc<RwLock<HashMap<String, EncryptedKey>>>,
}

impl MemoryKeyStore {
    /// Creates a new empty `MemoryKeyStore`.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn put(&self, record: &EncryptedKey) -> Result<()> {
        let mut records = self.records.write().await;
        records.insert(record.metadata.key_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, key_id: &str) -> Result<Option<EncryptedKey>> {
        let records = self.records.read().await;
        Ok(records.get(key_id).cloned())
    }

    async fn update_metadata(&self, key_id: &str, metadata: &KeyMetadata) -> Result<()> {
        let mut records = self.records.write().await;
        match records.get_mut(key_id) {
            Some(record) => {
                record.metadata = metadata.clone();
                Ok(())
            }
            None => Err(AuthError::KeyNotFound(key_id.to_string())),
        }
    }

    async fn list(&self, key_type: KeyType) -> Result<Vec<EncryptedKey>> {
        let records = self.records.read().await;
        let mut matching: Vec<EncryptedKey> = records
            .values()
            .filter(|r| r.metadata.key_type == key_type)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.metadata.created_at.cmp(&b.metadata.created_at));
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::key::KeyMetadata;

    #[tokio::test]
    async fn memory_store_round_trips_records() {
        let store = MemoryKeyStore::new();
        let meta = KeyMetadata::new("dek-1".to_string(), KeyType::DataEncryption, 1);
        let record = EncryptedKey::new("bWF0ZXJpYWw".to_string(), meta);

        store.put(&record).await.unwrap();
        let loaded = store.get("dek-1").await.unwrap().unwrap();

        assert_eq!(loaded.encrypted_key_material, record.encrypted_key_material);
        assert_eq!(loaded.checksum, record.checksum);
    }

    #[tokio::test]
    async fn metadata_update_requires_existing_record() {
        let store = MemoryKeyStore::new();
        let meta = KeyMetadata::new("missing".to_string(), KeyType::DataEncryption, 1);

        assert!(matches!(
            store.update_metadata("missing", &meta).await,
            Err(AuthError::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_filters_by_type() {
        let store = MemoryKeyStore::new();
        let dek = KeyMetadata::new("dek-1".to_string(), KeyType::DataEncryption, 1);
        let signing = KeyMetadata::new("sig-1".to_string(), KeyType::JwtSigning, 1);
        store
            .put(&EncryptedKey::new("YQ".to_string(), dek))
            .await
            .unwrap();
        store
            .put(&EncryptedKey::new("Yg".to_string(), signing))
            .await
            .unwrap();

        let signing_keys = store.list(KeyType::JwtSigning).await.unwrap();
        assert_eq!(signing_keys.len(), 1);
        assert_eq!(signing_keys[0].metadata.key_id, "sig-1");
    }
}
