use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Result;
use crate::models::session::{Session, TrustedDevice};
use crate::stores::session::{SessionStore, MAX_TRUSTED_DEVICES};

/// How often the sweeper clears expired sessions and blacklist entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// In-process `SessionStore`.
///
/// Redis gives expiry for free; here expired entries read as absent
/// immediately and a periodic sweep reclaims the memory.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, Session>>>,
    blacklist: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
    devices: Arc<RwLock<HashMap<Uuid, Vec<TrustedDevice>>>>,
}

impl MemorySessionStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns the hourly sweep task; it exits when `shutdown` is cancelled.
    pub fn spawn_sweeper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(SWEEP_INTERVAL) => {
                        let (sessions, blacklisted) = store.sweep().await;
                        tracing::info!(
                            "🧹 Session sweep: {} expired session(s), {} stale blacklist entr(ies) removed",
                            sessions,
                            blacklisted
                        );
                    }
                }
            }
        })
    }

    /// Removes expired sessions and stale blacklist entries. Returns how
    /// many of each were dropped.
    pub async fn sweep(&self) -> (usize, usize) {
        let now = Utc::now();

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at > now);
        let swept_sessions = before - sessions.len();
        drop(sessions);

        let mut blacklist = self.blacklist.write().await;
        let before = blacklist.len();
        blacklist.retain(|_, expires| *expires > now);
        let swept_blacklist = before - blacklist.len();

        (swept_sessions, swept_blacklist)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn put(&self, session: &Session) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.session_id, session.clone());
        Ok(())
    }

    async fn get(&self, session_id: Uuid) -> Result<Option<Session>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(&session_id)
            .filter(|s| !s.is_expired())
            .cloned())
    }

    async fn update(&self, session: &Session) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.session_id, session.clone());
        Ok(())
    }

    async fn delete(&self, session_id: Uuid) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(&session_id);
        Ok(())
    }

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Session>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .values()
            .filter(|s| s.user_id == user_id && !s.is_expired())
            .cloned()
            .collect())
    }

    async fn blacklist(&self, token_hash: &str, ttl: Duration) -> Result<()> {
        let expires = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(0));
        let mut blacklist = self.blacklist.write().await;
        blacklist.insert(token_hash.to_string(), expires);
        Ok(())
    }

    async fn is_blacklisted(&self, token_hash: &str) -> Result<bool> {
        let blacklist = self.blacklist.read().await;
        Ok(blacklist
            .get(token_hash)
            .map(|expires| *expires > Utc::now())
            .unwrap_or(false))
    }

    async fn touch_trusted_device(&self, user_id: Uuid, device_id: &str) -> Result<()> {
        let mut devices = self.devices.write().await;
        let list = devices.entry(user_id).or_default();

        list.retain(|d| d.device_id != device_id);
        list.insert(
            0,
            TrustedDevice {
                device_id: device_id.to_string(),
                last_seen: Utc::now(),
            },
        );
        list.truncate(MAX_TRUSTED_DEVICES);
        Ok(())
    }

    async fn trusted_devices(&self, user_id: Uuid) -> Result<Vec<TrustedDevice>> {
        let devices = self.devices.read().await;
        Ok(devices.get(&user_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::session::UserType;

    fn session(user_id: Uuid, expires_in_secs: i64) -> Session {
        let now = Utc::now();
        Session {
            session_id: Uuid::new_v4(),
            user_id,
            user_type: UserType::Adult,
            device_id: "device-1".to_string(),
            device_fingerprint_hash: "fp".to_string(),
            ip_address: "127.0.0.1".to_string(),
            user_agent: "test".to_string(),
            created_at: now,
            expires_at: now + chrono::Duration::seconds(expires_in_secs),
            last_activity: now,
            is_active: true,
            refresh_token_family: "family-1".to_string(),
            current_refresh_jti: "jti-1".to_string(),
            family_token_hashes: vec!["hash-1".to_string()],
            permissions: vec!["profile:read".to_string()],
            parent_id: None,
            children_ids: Vec::new(),
        }
    }

    #[tokio::test]
    async fn expired_sessions_read_as_absent() {
        let store = MemorySessionStore::new();
        let s = session(Uuid::new_v4(), -10);
        store.put(&s).await.unwrap();

        assert!(store.get(s.session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sweep_reclaims_expired_state() {
        let store = MemorySessionStore::new();
        store.put(&session(Uuid::new_v4(), -10)).await.unwrap();
        store.put(&session(Uuid::new_v4(), 600)).await.unwrap();
        store
            .blacklist("stale", Duration::from_secs(0))
            .await
            .unwrap();
        store
            .blacklist("fresh", Duration::from_secs(600))
            .await
            .unwrap();

        let (sessions, blacklisted) = store.sweep().await;

        assert_eq!(sessions, 1);
        assert_eq!(blacklisted, 1);
        assert!(store.is_blacklisted("fresh").await.unwrap());
    }

    #[tokio::test]
    async fn blacklist_entries_expire_with_their_ttl() {
        let store = MemorySessionStore::new();
        store
            .blacklist("short", Duration::from_secs(0))
            .await
            .unwrap();

        assert!(!store.is_blacklisted("short").await.unwrap());
    }

    #[tokio::test]
    async fn trusted_devices_are_mru_bounded() {
        let store = MemorySessionStore::new();
        let user = Uuid::new_v4();

        for i in 0..12 {
            store
                .touch_trusted_device(user, &format!("device-{}", i))
                .await
                .unwrap();
        }
        // Re-touch an old survivor to move it to the front.
        store.touch_trusted_device(user, "device-5").await.unwrap();

        let devices = store.trusted_devices(user).await.unwrap();
        assert_eq!(devices.len(), MAX_TRUSTED_DEVICES);
        assert_eq!(devices[0].device_id, "device-5");
        // The two oldest fell off.
        assert!(!devices.iter().any(|d| d.device_id == "device-0"));
        assert!(!devices.iter().any(|d| d.device_id == "device-1"));
    }

    #[tokio::test]
    async fn list_by_user_includes_revoked_but_not_expired() {
        let store = MemorySessionStore::new();
        let user = Uuid::new_v4();
        let mut revoked = session(user, 600);
        revoked.is_active = false;
        store.put(&revoked).await.unwrap();
        store.put(&session(user, -5)).await.unwrap();
        store.put(&session(Uuid::new_v4(), 600)).await.unwrap();

        let sessions = store.list_by_user(user).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert!(!sessions[0].is_active);
    }
}
