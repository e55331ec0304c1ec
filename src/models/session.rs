use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{AuthError, Result};

/// Account class of an authenticated principal.
///
/// Minor and child accounts get shorter token lifetimes: shorter sessions
/// for higher-risk, lower-capability principals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Adult,
    Parent,
    Minor,
    Child,
}

impl UserType {
    /// Whether this class gets the short access-token lifetime.
    pub fn is_minor_class(&self) -> bool {
        matches!(self, UserType::Minor | UserType::Child)
    }

    /// Whether this class gets the short refresh-token lifetime.
    pub fn is_child_class(&self) -> bool {
        matches!(self, UserType::Child)
    }
}

/// The slice of the account model the token core needs. The account data
/// model itself lives outside this crate.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The user's id.
    pub id: Uuid,
    /// The user's account class.
    pub user_type: UserType,
    /// Permission names embedded in access tokens.
    pub permissions: Vec<String>,
    /// Linked parent account, for child/minor accounts.
    pub parent_id: Option<Uuid>,
    /// Linked child accounts, for parent accounts.
    pub children_ids: Vec<Uuid>,
}

/// Client-presented device descriptor.
///
/// Non-secret request attributes hashed into the fingerprint that binds a
/// session to a device. Field names mirror the client wire form; the hash is
/// computed over this exact JSON shape, so the shape is part of the
/// contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub user_agent: String,
    pub accept_language: String,
    pub accept_encoding: String,
    pub screen_resolution: String,
    pub timezone: String,
    pub platform: String,
    pub hardware_concurrency: u32,
    pub device_memory: u32,
}

impl DeviceInfo {
    /// SHA-256 fingerprint of the canonical JSON descriptor, hex-encoded.
    pub fn fingerprint_hash(&self) -> Result<String> {
        let canonical = sonic_rs::to_string(self)
            .map_err(|e| AuthError::Serialization(format!("Device descriptor encode failed: {}", e)))?;
        let digest = Sha256::digest(canonical.as_bytes());
        Ok(hex::encode(digest))
    }

    /// A stable device identifier derived from the descriptor.
    pub fn device_id(&self) -> Result<String> {
        // First half of the fingerprint; enough to key the trusted list.
        let hash = self.fingerprint_hash()?;
        Ok(hash[..32].to_string())
    }
}

/// A device a user has authenticated from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustedDevice {
    /// The device's identifier.
    pub device_id: String,
    /// When the device was last used to authenticate.
    pub last_seen: DateTime<Utc>,
}

/// An active authentication session.
///
/// Owned exclusively by the session store; `TokenService` holds only the
/// `session_id`. The refresh-token family lives here: `refresh_token_family`
/// names the current family, `current_refresh_jti` is its single redeemable
/// head, and `family_token_hashes` lists every member's hash so a family
/// revocation can blacklist them all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub user_type: UserType,
    pub device_id: String,
    pub device_fingerprint_hash: String,
    pub ip_address: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub is_active: bool,
    pub refresh_token_family: String,
    pub current_refresh_jti: String,
    pub family_token_hashes: Vec<String>,
    /// Claim material carried so a refresh can rebuild the access token
    /// without consulting the account layer.
    pub permissions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children_ids: Vec<Uuid>,
}

impl Session {
    /// Whether this session is past its expiry.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Whether this session can still authenticate requests.
    pub fn is_live(&self) -> bool {
        self.is_active && !self.is_expired()
    }

    /// Stamps activity now.
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Points the session at a brand-new token family. The old family is
    /// orphaned: none of its members can ever be redeemed again.
    pub fn adopt_family(&mut self, family: String, head_jti: String, head_hash: String) {
        self.refresh_token_family = family;
        self.current_refresh_jti = head_jti;
        self.family_token_hashes = vec![head_hash];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> DeviceInfo {
        DeviceInfo {
            user_agent: "Mozilla/5.0".to_string(),
            accept_language: "en-US".to_string(),
            accept_encoding: "gzip, br".to_string(),
            screen_resolution: "1920x1080".to_string(),
            timezone: "America/New_York".to_string(),
            platform: "MacIntel".to_string(),
            hardware_concurrency: 8,
            device_memory: 16,
        }
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let a = device().fingerprint_hash().unwrap();
        let b = device().fingerprint_hash().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn fingerprint_changes_with_any_attribute() {
        let base = device().fingerprint_hash().unwrap();
        let mut other = device();
        other.timezone = "Europe/Lisbon".to_string();
        assert_ne!(base, other.fingerprint_hash().unwrap());
    }

    #[test]
    fn minor_and_child_classes() {
        assert!(UserType::Minor.is_minor_class());
        assert!(UserType::Child.is_minor_class());
        assert!(!UserType::Adult.is_minor_class());
        assert!(UserType::Child.is_child_class());
        assert!(!UserType::Minor.is_child_class());
    }
}
