//! Authentication token and key management core.
//!
//! Issues, verifies, rotates, and revokes RS256 token pairs with
//! refresh-token-family theft detection; tracks sessions and trusted
//! devices; and generates, wraps, caches, and rotates the key material
//! backing it all. HTTP routing, the account data model, and process
//! bootstrapping live outside this crate and consume it through
//! [`TokenService`], [`ApiKeyService`], and the store traits.

pub mod config;
pub mod db;
pub mod error;

pub mod crypto {
    pub mod aes;
    pub mod master;
    pub mod signing;
}

pub mod models {
    pub mod api_key;
    pub mod claims;
    pub mod key;
    pub mod session;
}

pub mod keys {
    pub mod cache;
    pub mod provider;
    pub mod rotation;
    pub mod service;
    pub mod store;
}

pub mod stores {
    pub mod memory;
    pub mod redis;
    pub mod session;
}

pub mod services {
    pub mod api_keys;
    pub mod tokens;
}

pub use config::{Config, KmsBackend};
pub use crypto::master::MasterKeyManager;
pub use error::{AuthError, Result};
pub use keys::provider::{KmsProvider, LocalKmsProvider};
pub use keys::rotation::RotationScheduler;
pub use keys::service::DataKeyService;
pub use keys::store::{KeyStore, MemoryKeyStore, PostgresKeyStore};
pub use models::claims::{AccessClaims, RefreshClaims, TokenPayload};
pub use models::session::{AuthUser, DeviceInfo, Session, UserType};
pub use services::api_keys::ApiKeyService;
pub use services::tokens::{IssuedTokens, TokenConfig, TokenKind, TokenService};
pub use stores::memory::MemorySessionStore;
pub use stores::redis::RedisSessionStore;
pub use stores::session::SessionStore;
