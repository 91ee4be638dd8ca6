//! Wire types for the identity service.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use aegis_shared::User;

/// Proof of authentication held in memory for the lifetime of the process.
///
/// Never persisted to the local cache; it is reconstructed from the identity
/// service on each cold start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Whether the access token has expired (with a small leeway so a token
    /// about to expire is treated as already stale).
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now() + Duration::seconds(30)
    }
}

/// Auth lifecycle events the identity service reports.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserDeleted,
}

/// One entry on the auth-state-change stream.
#[derive(Debug, Clone)]
pub struct AuthChange {
    pub event: AuthEvent,
    pub session: Option<Session>,
}
