use thiserror::Error;

/// The authentication core's error type.
///
/// Verification-path variants never cross the service boundary: `TokenService`
/// collapses them to `None` and logs the reason. Key-integrity variants are
/// fatal for the key involved and abort the operation.
#[derive(Error, Debug)]
pub enum AuthError {
    /// A token that could not be parsed or whose signature did not verify.
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// A token past its expiry.
    #[error("Token expired")]
    ExpiredToken,

    /// A token whose hash is on the blacklist.
    #[error("Token is blacklisted")]
    BlacklistedToken,

    /// The session referenced by a token is missing, revoked or expired.
    #[error("Session is not active")]
    SessionNotActive,

    /// The presented device fingerprint does not match the session's.
    /// Revokes the session as a side effect.
    #[error("Device fingerprint mismatch")]
    DeviceFingerprintMismatch,

    /// An already-rotated-away refresh token was replayed.
    /// Revokes the whole token family as a side effect.
    #[error("Refresh token reuse detected")]
    RefreshTokenReuse,

    /// A key record failed its integrity checksum. The key is presumed
    /// compromised and must not be used.
    #[error("Key integrity failure: {0}")]
    KeyIntegrity(String),

    /// No key exists under the requested identifier.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Unwrapping key material failed (tampered ciphertext or wrong key).
    #[error("Key decryption failed: {0}")]
    KeyDecryption(String),

    /// The key storage backend is unreachable. Retryable by the caller.
    #[error("Key store unavailable: {0}")]
    KeyStoreUnavailable(String),

    /// The master key was used before `initialize()`. Fatal at startup.
    #[error("Master key is not initialized")]
    MasterKeyUninitialized,

    /// A database error from the key store backend.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// A database pool error.
    #[error("Database pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// A Redis error from the session store backend.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// An I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An encryption primitive failure.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// A serialization failure (session records, device descriptors).
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AuthError` as the error type.
pub type Result<T> = std::result::Result<T, AuthError>;

impl AuthError {
    /// Whether the caller may reasonably retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AuthError::KeyStoreUnavailable(_)
                | AuthError::Database(_)
                | AuthError::Pool(_)
                | AuthError::Redis(_)
                | AuthError::Io(_)
        )
    }
}
