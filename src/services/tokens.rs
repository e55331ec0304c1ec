use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{
    decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AuthError, Result};
use crate::keys::service::DataKeyService;
use crate::models::claims::{AccessClaims, RefreshClaims, TokenPayload};
use crate::models::session::{AuthUser, DeviceInfo, Session};
use crate::stores::session::SessionStore;

/// Which kind of token the caller expects to be holding. Tokens carry no
/// `type` claim, so the caller must always say.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Token lifetime and claim-stamping settings.
#[derive(Clone)]
pub struct TokenConfig {
    pub issuer: String,
    pub audience: String,
    pub access_token_minutes: i64,
    pub access_token_minutes_minor: i64,
    pub refresh_token_days: i64,
    pub refresh_token_hours_child: i64,
}

impl From<&Config> for TokenConfig {
    fn from(config: &Config) -> Self {
        Self {
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_token_minutes: config.access_token_minutes,
            access_token_minutes_minor: config.access_token_minutes_minor,
            refresh_token_days: config.refresh_token_days,
            refresh_token_hours_child: config.refresh_token_hours_child,
        }
    }
}

/// A freshly issued access/refresh pair.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub session_id: Uuid,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

/// SHA-256 hex digest of a token, used for blacklist and family membership.
fn token_hash(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Issues, verifies, refreshes, and revokes token pairs.
///
/// Sessions move `Active -> Active` on verify/refresh, to `Revoked` on
/// logout, theft detection, or fingerprint mismatch, and to `Expired` by
/// TTL. Refresh rotation is serialized per session: two racing refreshes of
/// the same token cannot both win, so a family can never silently fork.
pub struct TokenService {
    sessions: Arc<dyn SessionStore>,
    keys: Arc<DataKeyService>,
    config: TokenConfig,
    refresh_locks: RwLock<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl TokenService {
    /// Wires up the service.
    pub fn new(sessions: Arc<dyn SessionStore>, keys: Arc<DataKeyService>, config: TokenConfig) -> Self {
        Self {
            sessions,
            keys,
            config,
            refresh_locks: RwLock::new(HashMap::new()),
        }
    }

    fn access_lifetime(&self, user: &AuthUser) -> ChronoDuration {
        if user.user_type.is_minor_class() {
            ChronoDuration::minutes(self.config.access_token_minutes_minor)
        } else {
            ChronoDuration::minutes(self.config.access_token_minutes)
        }
    }

    fn refresh_lifetime(&self, user: &AuthUser) -> ChronoDuration {
        if user.user_type.is_child_class() {
            ChronoDuration::hours(self.config.refresh_token_hours_child)
        } else {
            ChronoDuration::days(self.config.refresh_token_days)
        }
    }

    async fn signing_material(&self) -> Result<(String, EncodingKey)> {
        let kid = self.keys.ensure_signing_key().await?;
        let private_pem = self.keys.signing_private_pem(&kid).await?;
        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| AuthError::Encryption(format!("Signing key rejected: {}", e)))?;
        Ok((kid, encoding_key))
    }

    /// Issues a signed access/refresh pair for an authenticated user and
    /// device, creating the session that binds them.
    pub async fn issue(
        &self,
        user: &AuthUser,
        device: &DeviceInfo,
        ip_address: &str,
    ) -> Result<IssuedTokens> {
        let session_id = Uuid::new_v4();
        let token_family = Uuid::new_v4().to_string();
        let fingerprint = device.fingerprint_hash()?;
        let device_id = device.device_id()?;

        let access_lifetime = self.access_lifetime(user);
        let refresh_lifetime = self.refresh_lifetime(user);
        let now = Utc::now();

        let (kid, encoding_key) = self.signing_material().await?;
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid);

        let access_claims = AccessClaims {
            user_id: user.id,
            user_type: user.user_type,
            session_id,
            device_id: device_id.clone(),
            permissions: user.permissions.clone(),
            parent_id: user.parent_id,
            children_ids: user.children_ids.clone(),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            iat: now.timestamp(),
            exp: (now + access_lifetime).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        let refresh_jti = Uuid::new_v4().to_string();
        let refresh_claims = RefreshClaims {
            user_id: user.id,
            session_id,
            device_id: device_id.clone(),
            token_family: token_family.clone(),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            iat: now.timestamp(),
            exp: (now + refresh_lifetime).timestamp(),
            jti: refresh_jti.clone(),
        };

        let access_token = encode(&header, &access_claims, &encoding_key)
            .map_err(|e| AuthError::Internal(format!("Access token signing failed: {}", e)))?;
        let refresh_token = encode(&header, &refresh_claims, &encoding_key)
            .map_err(|e| AuthError::Internal(format!("Refresh token signing failed: {}", e)))?;

        let session = Session {
            session_id,
            user_id: user.id,
            user_type: user.user_type,
            device_id: device_id.clone(),
            device_fingerprint_hash: fingerprint,
            ip_address: ip_address.to_string(),
            user_agent: device.user_agent.clone(),
            created_at: now,
            expires_at: now + refresh_lifetime,
            last_activity: now,
            is_active: true,
            refresh_token_family: token_family,
            current_refresh_jti: refresh_jti,
            family_token_hashes: vec![token_hash(&refresh_token)],
            permissions: user.permissions.clone(),
            parent_id: user.parent_id,
            children_ids: user.children_ids.clone(),
        };
        self.sessions.put(&session).await?;
        self.sessions
            .touch_trusted_device(user.id, &device_id)
            .await?;

        tracing::info!("✅ Token pair issued: user {} session {}", user.id, session_id);
        Ok(IssuedTokens {
            access_token,
            refresh_token,
            session_id,
            expires_in: access_lifetime.num_seconds(),
        })
    }

    /// Verifies a token of the expected kind.
    ///
    /// Every failure collapses to `None`; the reason (expired, malformed,
    /// blacklisted, session dead, theft) stays in internal logs. A store
    /// timeout is "unable to verify": the token is rejected.
    pub async fn verify(&self, token: &str, expected: TokenKind) -> Option<TokenPayload> {
        match self.verify_inner(token, expected).await {
            Ok(payload) => Some(payload),
            Err(e) => {
                self.log_rejection(&e);
                None
            }
        }
    }

    fn log_rejection(&self, e: &AuthError) {
        match e {
            AuthError::ExpiredToken => tracing::debug!("❌ Token rejected: expired"),
            AuthError::BlacklistedToken => tracing::warn!("❌ Token rejected: blacklisted"),
            AuthError::SessionNotActive => tracing::warn!("❌ Token rejected: session not active"),
            AuthError::MalformedToken(reason) => {
                tracing::warn!("❌ Token rejected: malformed ({})", reason)
            }
            AuthError::RefreshTokenReuse => {
                tracing::error!("🚨 Refresh token reuse detected: family revoked")
            }
            AuthError::DeviceFingerprintMismatch => {
                tracing::error!("🚨 Device fingerprint mismatch: session revoked")
            }
            other => tracing::error!("❌ Token verification failed: {}", other),
        }
    }

    async fn verify_inner(&self, token: &str, expected: TokenKind) -> Result<TokenPayload> {
        match expected {
            TokenKind::Access => {
                self.check_blacklist(token).await?;
                let claims: AccessClaims = self.decode_claims(token).await?;
                let mut session = self.live_session(claims.session_id).await?;
                session.touch();
                self.sessions.update(&session).await?;
                Ok(TokenPayload::Access(claims))
            }
            TokenKind::Refresh => {
                let claims: RefreshClaims = self.decode_claims(token).await?;
                let mut session = self.live_session(claims.session_id).await?;
                self.check_refresh_reuse(token, &claims, &mut session).await?;
                Ok(TokenPayload::Refresh(claims))
            }
        }
    }

    async fn check_blacklist(&self, token: &str) -> Result<()> {
        if self.sessions.is_blacklisted(&token_hash(token)).await? {
            return Err(AuthError::BlacklistedToken);
        }
        Ok(())
    }

    /// Signature, issuer, audience, and expiry checks. No session state.
    async fn decode_claims<C: serde::de::DeserializeOwned>(&self, token: &str) -> Result<C> {
        let header =
            decode_header(token).map_err(|e| AuthError::MalformedToken(e.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| AuthError::MalformedToken("missing kid".to_string()))?;

        let public_pem = match self.keys.signing_public_pem(&kid).await {
            Ok(pem) => pem,
            Err(AuthError::KeyNotFound(_)) => {
                return Err(AuthError::MalformedToken(format!(
                    "unknown signing key {}",
                    kid
                )))
            }
            Err(e) => return Err(e),
        };
        let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|e| AuthError::Internal(format!("Verification key rejected: {}", e)))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_audience(&[&self.config.audience]);

        decode::<C>(token, &decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                _ => AuthError::MalformedToken(e.to_string()),
            })
    }

    async fn live_session(&self, session_id: Uuid) -> Result<Session> {
        let session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or(AuthError::SessionNotActive)?;
        if !session.is_live() {
            return Err(AuthError::SessionNotActive);
        }
        Ok(session)
    }

    /// The theft-detection invariant: a redeemable refresh token must be
    /// unspent (not blacklisted) and must be the head of the session's
    /// current family. Anything else means an already-rotated-away token
    /// came back; the family dies, valid signature or not.
    async fn check_refresh_reuse(
        &self,
        token: &str,
        claims: &RefreshClaims,
        session: &mut Session,
    ) -> Result<()> {
        if self.sessions.is_blacklisted(&token_hash(token)).await?
            || claims.token_family != session.refresh_token_family
            || claims.jti != session.current_refresh_jti
        {
            self.revoke_family(session).await?;
            return Err(AuthError::RefreshTokenReuse);
        }
        Ok(())
    }

    /// Blacklists every token in the session's current family and
    /// deactivates the session.
    async fn revoke_family(&self, session: &mut Session) -> Result<()> {
        session.is_active = false;
        let remaining = (session.expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        for hash in &session.family_token_hashes {
            self.sessions.blacklist(hash, remaining).await?;
        }
        self.sessions.update(session).await?;
        self.refresh_locks.write().await.remove(&session.session_id);
        Ok(())
    }

    async fn session_lock(&self, session_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.write().await;
        locks
            .entry(session_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Redeems a refresh token for a new pair, rotating the token family.
    ///
    /// Returns `None` on any failure. Reuse of a rotated-away token revokes
    /// the whole family; a device fingerprint mismatch revokes the session.
    pub async fn refresh(&self, refresh_token: &str, device: &DeviceInfo) -> Option<IssuedTokens> {
        match self.refresh_inner(refresh_token, device).await {
            Ok(pair) => Some(pair),
            Err(e) => {
                self.log_rejection(&e);
                None
            }
        }
    }

    async fn refresh_inner(&self, refresh_token: &str, device: &DeviceInfo) -> Result<IssuedTokens> {
        let claims: RefreshClaims = self.decode_claims(refresh_token).await?;

        // Rotation mutates the family pointer that the checks below read;
        // serialize per session so concurrent refreshes cannot fork it. A
        // racing refresh that loses the lock sees its token spent and takes
        // the reuse path.
        let lock = self.session_lock(claims.session_id).await;
        let _guard = lock.lock().await;

        let mut session = self.live_session(claims.session_id).await?;
        self.check_refresh_reuse(refresh_token, &claims, &mut session)
            .await?;

        let presented = device.fingerprint_hash()?;
        let matches: bool = presented
            .as_bytes()
            .ct_eq(session.device_fingerprint_hash.as_bytes())
            .into();
        if !matches {
            self.revoke_family(&mut session).await?;
            return Err(AuthError::DeviceFingerprintMismatch);
        }

        let user = AuthUser {
            id: session.user_id,
            user_type: session.user_type,
            permissions: session.permissions.clone(),
            parent_id: session.parent_id,
            children_ids: session.children_ids.clone(),
        };
        let access_lifetime = self.access_lifetime(&user);
        let refresh_lifetime = self.refresh_lifetime(&user);
        let now = Utc::now();

        let (kid, encoding_key) = self.signing_material().await?;
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid);

        let access_claims = AccessClaims {
            user_id: user.id,
            user_type: user.user_type,
            session_id: session.session_id,
            device_id: session.device_id.clone(),
            permissions: user.permissions.clone(),
            parent_id: user.parent_id,
            children_ids: user.children_ids.clone(),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            iat: now.timestamp(),
            exp: (now + access_lifetime).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        let new_family = Uuid::new_v4().to_string();
        let new_refresh_jti = Uuid::new_v4().to_string();
        let new_refresh_claims = RefreshClaims {
            user_id: user.id,
            session_id: session.session_id,
            device_id: session.device_id.clone(),
            token_family: new_family.clone(),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            iat: now.timestamp(),
            exp: (now + refresh_lifetime).timestamp(),
            jti: new_refresh_jti.clone(),
        };

        let access_token = encode(&header, &access_claims, &encoding_key)
            .map_err(|e| AuthError::Internal(format!("Access token signing failed: {}", e)))?;
        let new_refresh_token = encode(&header, &new_refresh_claims, &encoding_key)
            .map_err(|e| AuthError::Internal(format!("Refresh token signing failed: {}", e)))?;

        // The just-used token is spent: blacklist it for what's left of its
        // own lifetime, then swap the family pointer.
        let spent_ttl = ChronoDuration::seconds(claims.exp - now.timestamp())
            .to_std()
            .unwrap_or(Duration::ZERO);
        self.sessions
            .blacklist(&token_hash(refresh_token), spent_ttl)
            .await?;

        session.adopt_family(
            new_family,
            new_refresh_jti,
            token_hash(&new_refresh_token),
        );
        session.expires_at = now + refresh_lifetime;
        session.touch();
        self.sessions.update(&session).await?;

        tracing::info!(
            "🔄 Refresh rotated: session {} family replaced",
            session.session_id
        );
        Ok(IssuedTokens {
            access_token,
            refresh_token: new_refresh_token,
            session_id: session.session_id,
            expires_in: access_lifetime.num_seconds(),
        })
    }

    /// Revokes one session: deactivates it and blacklists its current
    /// family. Idempotent; revoking an unknown session is a no-op.
    pub async fn revoke_session(&self, session_id: Uuid) -> Result<()> {
        match self.sessions.get(session_id).await? {
            Some(mut session) => {
                self.revoke_family(&mut session).await?;
                tracing::info!("✅ Session revoked: {}", session_id);
                Ok(())
            }
            None => {
                tracing::debug!("Session already gone: {}", session_id);
                Ok(())
            }
        }
    }

    /// Revokes every session a user owns ("logout everywhere").
    ///
    /// # Returns
    ///
    /// How many sessions were revoked.
    pub async fn revoke_all_sessions(&self, user_id: Uuid) -> Result<usize> {
        let sessions = self.sessions.list_by_user(user_id).await?;
        let mut revoked = 0;
        for mut session in sessions {
            if session.is_active {
                self.revoke_family(&mut session).await?;
                revoked += 1;
            }
        }
        tracing::info!("✅ Revoked {} session(s) for user {}", revoked, user_id);
        Ok(revoked)
    }
}
