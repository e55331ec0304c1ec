use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;
use crate::models::session::{Session, TrustedDevice};

/// Maximum trusted devices remembered per user; least-recently-used devices
/// are evicted beyond this.
pub const MAX_TRUSTED_DEVICES: usize = 10;

/// Storage of session records, the token blacklist, and per-user trusted
/// devices.
///
/// Two conforming implementations exist: Redis-backed (native TTL expiry)
/// and in-process (periodic sweeps). Their semantics are identical;
/// `TokenService` never knows which one it is talking to. Blacklist entry
/// TTLs mirror the remaining lifetime of the token they block, so entries
/// never outlive the tokens.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Stores a new session.
    async fn put(&self, session: &Session) -> Result<()>;

    /// Loads a session by id. Expired sessions read as absent.
    async fn get(&self, session_id: Uuid) -> Result<Option<Session>>;

    /// Rewrites an existing session.
    async fn update(&self, session: &Session) -> Result<()>;

    /// Removes a session.
    async fn delete(&self, session_id: Uuid) -> Result<()>;

    /// Lists a user's sessions, live or revoked, not yet expired.
    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Session>>;

    /// Blacklists a token hash for the given remaining lifetime.
    async fn blacklist(&self, token_hash: &str, ttl: Duration) -> Result<()>;

    /// Whether a token hash is blacklisted.
    async fn is_blacklisted(&self, token_hash: &str) -> Result<bool>;

    /// Records device use for a user, most-recent first, bounded at
    /// [`MAX_TRUSTED_DEVICES`].
    async fn touch_trusted_device(&self, user_id: Uuid, device_id: &str) -> Result<()>;

    /// The user's trusted devices, most recently seen first.
    async fn trusted_devices(&self, user_id: Uuid) -> Result<Vec<TrustedDevice>>;
}
