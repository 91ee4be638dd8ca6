use thiserror::Error;

use aegis_store::StoreError;

/// Errors surfaced by the session layer.
///
/// Remote-provider errors never escape as raw transport errors; they are
/// converted to one of these kinds at the reconciler boundary.  Local cache
/// failures inside the reconciler are logged and swallowed (the cache is an
/// optimization, not a dependency); `Storage` only appears for operations
/// whose sole effect is a cache write.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Sign-in/sign-up/sign-out or password operation rejected by the
    /// identity provider.  Carries the provider's human-readable message.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// A remote profile query failed and no cached fallback was acceptable.
    #[error("Profile fetch failed: {0}")]
    ProfileFetch(String),

    /// A remote profile write failed; local state was left untouched.
    #[error("Profile update failed: {0}")]
    ProfileUpdate(String),

    /// An operation requiring a user id found none in any source.
    #[error("No user identity available in any source")]
    NoIdentity,

    /// A caller-supplied record failed validation.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Local cache failure.
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SessionError>;
