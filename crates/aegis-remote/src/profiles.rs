//! The remote profile store capability.

use async_trait::async_trait;

use aegis_shared::Profile;

use crate::error::Result;

/// Capability surface of the hosted `profiles` table.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Fetch the profile for `id`.  An absent row is `Ok(None)`.
    async fn fetch(&self, id: &str) -> Result<Option<Profile>>;

    /// Insert a new profile row.
    async fn insert(&self, profile: &Profile) -> Result<Profile>;

    /// Update the profile row for `id`.  Returns
    /// [`RemoteError::NotFound`](crate::RemoteError::NotFound) when no row
    /// matches.
    async fn update(&self, id: &str, profile: &Profile) -> Result<Profile>;
}
