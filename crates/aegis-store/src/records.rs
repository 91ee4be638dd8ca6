//! Typed record helpers over the raw key-value surface.
//!
//! The store itself only moves strings; this module does the serde_json
//! round-trip for each record in the stable key layout so call sites never
//! hand-roll serialization.

use serde::de::DeserializeOwned;
use serde::Serialize;

use aegis_shared::{ChatMessage, Contact, Profile, Theme, User};

use crate::database::{Cache, CacheOp};
use crate::error::{Result, StoreError};
use crate::keys;

impl Cache {
    fn get_record<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_item(key)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| StoreError::Corrupt {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    fn put_record<T: Serialize>(&self, key: &str, record: &T) -> Result<()> {
        let raw = serde_json::to_string(record)?;
        self.set_item(key, &raw)
    }

    // ------------------------------------------------------------------
    // Identity namespace
    // ------------------------------------------------------------------

    pub fn user(&self) -> Result<Option<User>> {
        self.get_record(keys::USER)
    }

    pub fn put_user(&self, user: &User) -> Result<()> {
        self.put_record(keys::USER, user)
    }

    pub fn profile(&self) -> Result<Option<Profile>> {
        self.get_record(keys::USER_PROFILE)
    }

    pub fn put_profile(&self, profile: &Profile) -> Result<()> {
        self.put_record(keys::USER_PROFILE, profile)
    }

    /// Remove the `user` and `userProfile` records together.
    ///
    /// Sign-out must never leave one of the two behind.
    pub fn clear_identity(&self) -> Result<()> {
        self.apply(&[
            CacheOp::remove(keys::USER),
            CacheOp::remove(keys::USER_PROFILE),
        ])
    }

    pub fn theme(&self) -> Result<Option<Theme>> {
        self.get_record(keys::THEME_PREFERENCE)
    }

    pub fn put_theme(&self, theme: Theme) -> Result<()> {
        self.put_record(keys::THEME_PREFERENCE, &theme)
    }

    // ------------------------------------------------------------------
    // Contact/chat namespace
    // ------------------------------------------------------------------

    pub fn contacts(&self) -> Result<Option<Vec<Contact>>> {
        self.get_record(keys::CONTACTS)
    }

    pub fn put_contacts(&self, contacts: &[Contact]) -> Result<()> {
        self.put_record(keys::CONTACTS, &contacts)
    }

    pub fn recent_contacts(&self) -> Result<Vec<Contact>> {
        Ok(self.get_record(keys::RECENT_CONTACTS)?.unwrap_or_default())
    }

    pub fn put_recent_contacts(&self, recents: &[Contact]) -> Result<()> {
        self.put_record(keys::RECENT_CONTACTS, &recents)
    }

    pub fn thread(&self, contact_id: &str) -> Result<Vec<ChatMessage>> {
        Ok(self
            .get_record(&keys::chat(contact_id))?
            .unwrap_or_default())
    }

    pub fn put_thread(&self, contact_id: &str, thread: &[ChatMessage]) -> Result<()> {
        self.put_record(&keys::chat(contact_id), &thread)
    }

    pub fn remove_thread(&self, contact_id: &str) -> Result<()> {
        self.remove_item(&keys::chat(contact_id))
    }
}
