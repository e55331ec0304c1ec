use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::session::UserType;

/// Claim set of an access token.
///
/// Access and refresh tokens carry no `type` claim; they are distinguished
/// by payload shape and by which verification path the caller invokes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// The authenticated user.
    pub user_id: Uuid,
    /// The user's account class.
    pub user_type: UserType,
    /// The session this token belongs to. Must reference a live session.
    pub session_id: Uuid,
    /// The device the session is bound to.
    pub device_id: String,
    /// Permission names granted to this token.
    pub permissions: Vec<String>,
    /// Linked parent account, for child/minor accounts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    /// Linked child accounts, for parent accounts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children_ids: Vec<Uuid>,
    /// Issuer.
    pub iss: String,
    /// Audience.
    pub aud: String,
    /// Issued-at, Unix seconds.
    pub iat: i64,
    /// Expiry, Unix seconds.
    pub exp: i64,
    /// Unique token id.
    pub jti: String,
}

/// Claim set of a refresh token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// The authenticated user.
    pub user_id: Uuid,
    /// The session this token belongs to. Must reference a live session
    /// whose current family this token's `token_family` names.
    pub session_id: Uuid,
    /// The device the session is bound to.
    pub device_id: String,
    /// The token family this refresh token belongs to.
    pub token_family: String,
    /// Issuer.
    pub iss: String,
    /// Audience.
    pub aud: String,
    /// Issued-at, Unix seconds.
    pub iat: i64,
    /// Expiry, Unix seconds.
    pub exp: i64,
    /// Unique token id; the family head pointer compares against this.
    pub jti: String,
}

/// A verified token payload, shaped by which kind the caller expected.
#[derive(Debug, Clone)]
pub enum TokenPayload {
    Access(AccessClaims),
    Refresh(RefreshClaims),
}

impl TokenPayload {
    /// The user the token authenticates.
    pub fn user_id(&self) -> Uuid {
        match self {
            TokenPayload::Access(c) => c.user_id,
            TokenPayload::Refresh(c) => c.user_id,
        }
    }

    /// The session the token references.
    pub fn session_id(&self) -> Uuid {
        match self {
            TokenPayload::Access(c) => c.session_id,
            TokenPayload::Refresh(c) => c.session_id,
        }
    }
}
