use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use crate::error::{AuthError, Result};

/// The purpose a managed key serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    /// The root key that wraps all other keys. Never encrypts data directly.
    Master,
    /// A symmetric key for record-level encryption at rest.
    DataEncryption,
    /// An RSA key pair used to sign and verify JWTs.
    JwtSigning,
    /// An opaque long-lived API key.
    ApiKey,
}

impl KeyType {
    /// The storage label for keys of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Master => "master",
            KeyType::DataEncryption => "data_encryption",
            KeyType::JwtSigning => "jwt_signing",
            KeyType::ApiKey => "api_key",
        }
    }

    /// The algorithm label recorded in metadata for keys of this type.
    pub fn algorithm(&self) -> &'static str {
        match self {
            KeyType::Master | KeyType::DataEncryption => "AES-256-GCM",
            KeyType::JwtSigning => "RS256",
            KeyType::ApiKey => "SHA-256",
        }
    }
}

/// Metadata describing one managed key.
///
/// One record per key. Rotation supersedes a record (`is_active = false`,
/// `rotated_at` stamped) but never deletes it: retired keys still decrypt
/// historical ciphertext and remain auditable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyMetadata {
    /// Unique identifier for this key.
    pub key_id: String,
    /// The purpose this key serves.
    pub key_type: KeyType,
    /// The algorithm this key is used with.
    pub algorithm: String,
    /// When this key was created.
    pub created_at: DateTime<Utc>,
    /// When this key was rotated out, if it has been.
    pub rotated_at: Option<DateTime<Utc>>,
    /// When this key expires, if it does.
    pub expires_at: Option<DateTime<Utc>>,
    /// Monotonic version within this key's lineage.
    pub version: u32,
    /// Whether this key is the current one for its purpose.
    pub is_active: bool,
    /// How many times this key has been served from the cache or store.
    pub usage_count: u64,
    /// When this key was last served.
    pub last_used: Option<DateTime<Utc>>,
    /// Free-form labels (wrapping master version, compromise marker, ...).
    pub tags: HashMap<String, String>,
}

impl KeyMetadata {
    /// Creates metadata for a freshly generated key.
    pub fn new(key_id: String, key_type: KeyType, version: u32) -> Self {
        Self {
            key_id,
            key_type,
            algorithm: key_type.algorithm().to_string(),
            created_at: Utc::now(),
            rotated_at: None,
            expires_at: None,
            version,
            is_active: true,
            usage_count: 0,
            last_used: None,
            tags: HashMap::new(),
        }
    }

    /// Marks this key as superseded by a rotation.
    pub fn mark_rotated(&mut self) {
        self.is_active = false;
        self.rotated_at = Some(Utc::now());
    }

    /// Marks this key as presumed compromised. It must no longer be served.
    pub fn mark_compromised(&mut self) {
        self.is_active = false;
        self.tags
            .insert("compromised".to_string(), Utc::now().to_rfc3339());
    }

    /// Whether this key has been flagged as compromised.
    pub fn is_compromised(&self) -> bool {
        self.tags.contains_key("compromised")
    }
}

/// A key record as persisted: wrapped material, metadata, and an integrity
/// checksum over the stored ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedKey {
    /// Base64 of the wrapped key material (`nonce || tag || ciphertext`).
    /// For the distinguished master record this is the raw material instead,
    /// since the master key is never itself wrapped.
    pub encrypted_key_material: String,
    /// This key's metadata.
    pub metadata: KeyMetadata,
    /// blake3 hex digest of `encrypted_key_material`.
    pub checksum: String,
}

impl EncryptedKey {
    /// Builds a record, computing the checksum over the stored material.
    pub fn new(encrypted_key_material: String, metadata: KeyMetadata) -> Self {
        let checksum = checksum_of(&encrypted_key_material);
        Self {
            encrypted_key_material,
            metadata,
            checksum,
        }
    }

    /// Verifies the integrity checksum.
    ///
    /// A mismatch means the stored material was corrupted or tampered with;
    /// the key is presumed compromised and the failure is fatal for it.
    pub fn verify_checksum(&self) -> Result<()> {
        let computed = checksum_of(&self.encrypted_key_material);
        let matches: bool =
            subtle::ConstantTimeEq::ct_eq(computed.as_bytes(), self.checksum.as_bytes()).into();
        if matches {
            Ok(())
        } else {
            Err(AuthError::KeyIntegrity(format!(
                "Checksum mismatch for key {}",
                self.metadata.key_id
            )))
        }
    }
}

/// Computes the integrity checksum of a stored key material string.
pub fn checksum_of(material: &str) -> String {
    blake3::hash(material.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_verifies_untouched_record() {
        let meta = KeyMetadata::new("k1".to_string(), KeyType::DataEncryption, 1);
        let record = EncryptedKey::new("c29tZSBtYXRlcmlhbA".to_string(), meta);

        assert!(record.verify_checksum().is_ok());
    }

    #[test]
    fn checksum_rejects_altered_material() {
        let meta = KeyMetadata::new("k1".to_string(), KeyType::DataEncryption, 1);
        let mut record = EncryptedKey::new("c29tZSBtYXRlcmlhbA".to_string(), meta);
        record.encrypted_key_material.push('x');

        assert!(matches!(
            record.verify_checksum(),
            Err(AuthError::KeyIntegrity(_))
        ));
    }

    #[test]
    fn rotation_retains_record_inactive() {
        let mut meta = KeyMetadata::new("k1".to_string(), KeyType::JwtSigning, 3);
        meta.mark_rotated();

        assert!(!meta.is_active);
        assert!(meta.rotated_at.is_some());
    }
}
