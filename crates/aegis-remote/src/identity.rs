//! The remote identity service capability.

use async_trait::async_trait;
use tokio::sync::broadcast;

use aegis_shared::User;

use crate::error::Result;
use crate::types::{AuthChange, Session};

/// Capability surface of the hosted authentication provider.
///
/// The session reconciler consumes this as a trait object and never sees
/// provider-specific errors; implementations map them to
/// [`RemoteError`](crate::RemoteError) at this boundary.
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// The currently active session, if any.  Implementations may refresh a
    /// stale token internally; a session that cannot be recovered yields
    /// `Ok(None)`, not an error.
    async fn get_session(&self) -> Result<Option<Session>>;

    /// Authenticate with email and password.
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session>;

    /// Create a new identity.  `metadata` is attached to the identity record
    /// on the provider side (display name etc.); no session is returned
    /// because the account may require email confirmation first.
    async fn sign_up(&self, email: &str, password: &str, metadata: serde_json::Value)
        -> Result<User>;

    /// Invalidate the current session on the provider.
    async fn sign_out(&self) -> Result<()>;

    /// Exchange the refresh token for a new session.
    async fn refresh_session(&self) -> Result<Session>;

    /// Send a password-recovery email.
    async fn reset_password_for_email(&self, email: &str, redirect_to: Option<&str>)
        -> Result<()>;

    /// Change the password of the signed-in user.
    async fn update_password(&self, new_password: &str) -> Result<()>;

    /// Subscribe to the auth-state-change stream.
    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthChange>;
}
