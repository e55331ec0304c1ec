use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{AuthError, Result};
use crate::models::session::{Session, TrustedDevice};
use crate::stores::session::{SessionStore, MAX_TRUSTED_DEVICES};

fn session_key(session_id: Uuid) -> String {
    format!("session:{}", session_id)
}

fn user_sessions_key(user_id: Uuid) -> String {
    format!("sessions:user:{}", user_id)
}

fn blacklist_key(token_hash: &str) -> String {
    format!("blacklist:{}", token_hash)
}

fn devices_key(user_id: Uuid) -> String {
    format!("devices:{}", user_id)
}

/// Redis-backed `SessionStore`.
///
/// Session records and blacklist entries carry native TTLs, so Redis expires
/// them on its own; no sweeping needed.
#[derive(Clone)]
pub struct RedisSessionStore {
    conn: ConnectionManager,
}

impl RedisSessionStore {
    /// Connects to Redis and returns the store.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!("✅ Redis session store connected");
        Ok(Self { conn })
    }

    /// Wraps an existing connection manager.
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn encode(session: &Session) -> Result<String> {
        sonic_rs::to_string(session)
            .map_err(|e| AuthError::Serialization(format!("Session encode failed: {}", e)))
    }

    fn decode(json: &str) -> Result<Session> {
        sonic_rs::from_str(json)
            .map_err(|e| AuthError::Serialization(format!("Session decode failed: {}", e)))
    }

    fn remaining_ttl_secs(session: &Session) -> u64 {
        (session.expires_at - Utc::now()).num_seconds().max(0) as u64
    }

    async fn write_session(&self, session: &Session) -> Result<()> {
        let ttl = Self::remaining_ttl_secs(session);
        let mut conn = self.conn.clone();

        if ttl == 0 {
            let _: () = conn.del(session_key(session.session_id)).await?;
            return Ok(());
        }

        let json = Self::encode(session)?;
        let _: () = conn
            .set_ex(session_key(session.session_id), json, ttl)
            .await?;
        let _: () = conn
            .sadd(user_sessions_key(session.user_id), session.session_id.to_string())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn put(&self, session: &Session) -> Result<()> {
        self.write_session(session).await?;
        tracing::debug!("✅ Session saved: {}", session.session_id);
        Ok(())
    }

    async fn get(&self, session_id: Uuid) -> Result<Option<Session>> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(session_key(session_id)).await?;
        match json {
            Some(json) => Ok(Some(Self::decode(&json)?)),
            None => Ok(None),
        }
    }

    async fn update(&self, session: &Session) -> Result<()> {
        self.write_session(session).await
    }

    async fn delete(&self, session_id: Uuid) -> Result<()> {
        let mut conn = self.conn.clone();
        if let Some(session) = self.get(session_id).await? {
            let _: () = conn
                .srem(user_sessions_key(session.user_id), session_id.to_string())
                .await?;
        }
        let _: () = conn.del(session_key(session_id)).await?;
        Ok(())
    }

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Session>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.smembers(user_sessions_key(user_id)).await?;

        let mut sessions = Vec::new();
        for id in ids {
            let Ok(session_id) = Uuid::parse_str(&id) else {
                continue;
            };
            match self.get(session_id).await? {
                Some(session) => sessions.push(session),
                None => {
                    // Redis expired the record; drop the stale index entry.
                    let _: () = conn.srem(user_sessions_key(user_id), id).await?;
                }
            }
        }
        Ok(sessions)
    }

    async fn blacklist(&self, token_hash: &str, ttl: Duration) -> Result<()> {
        let secs = ttl.as_secs();
        if secs == 0 {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(blacklist_key(token_hash), "revoked", secs)
            .await?;
        Ok(())
    }

    async fn is_blacklisted(&self, token_hash: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(blacklist_key(token_hash)).await?;
        Ok(exists)
    }

    async fn touch_trusted_device(&self, user_id: Uuid, device_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset(devices_key(user_id), device_id, Utc::now().to_rfc3339())
            .await?;

        // Bound the list: drop least-recently-seen entries beyond the cap.
        let all: std::collections::HashMap<String, String> =
            conn.hgetall(devices_key(user_id)).await?;
        if all.len() > MAX_TRUSTED_DEVICES {
            let mut entries: Vec<(String, String)> = all.into_iter().collect();
            entries.sort_by(|a, b| b.1.cmp(&a.1));
            for (stale_id, _) in entries.into_iter().skip(MAX_TRUSTED_DEVICES) {
                let _: () = conn.hdel(devices_key(user_id), stale_id).await?;
            }
        }
        Ok(())
    }

    async fn trusted_devices(&self, user_id: Uuid) -> Result<Vec<TrustedDevice>> {
        let mut conn = self.conn.clone();
        let all: std::collections::HashMap<String, String> =
            conn.hgetall(devices_key(user_id)).await?;

        let mut devices: Vec<TrustedDevice> = all
            .into_iter()
            .filter_map(|(device_id, seen)| {
                chrono::DateTime::parse_from_rfc3339(&seen)
                    .ok()
                    .map(|ts| TrustedDevice {
                        device_id,
                        last_seen: ts.with_timezone(&Utc),
                    })
            })
            .collect();
        devices.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        Ok(devices)
    }
}
