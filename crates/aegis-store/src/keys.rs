//! Stable key layout for the local cache.
//!
//! These names are a persistence contract: changing one orphans data written
//! by earlier builds.  The session layer owns `user`, `userProfile` and
//! `theme_preference`; the contact/chat layer owns the rest.  The namespaces
//! are disjoint, so the two writers never contend on a key.

/// Serialized [`aegis_shared::User`] record.
pub const USER: &str = "user";

/// Serialized [`aegis_shared::Profile`] record.
pub const USER_PROFILE: &str = "userProfile";

/// Serialized [`aegis_shared::Theme`] value (`"dark"` or `"light"`).
pub const THEME_PREFERENCE: &str = "theme_preference";

/// Serialized `Vec<Contact>`: the full helpline directory.
pub const CONTACTS: &str = "contacts";

/// Serialized `Vec<Contact>`: most-recently-contacted, capped at 5.
pub const RECENT_CONTACTS: &str = "recentContacts";

/// Serialized `Vec<ChatMessage>` for one contact's thread.
pub fn chat(contact_id: &str) -> String {
    format!("chat_{contact_id}")
}
