use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// An authenticated identity, owned by the remote identity service.
///
/// The `id` is the opaque stable key the backend assigns at sign-up; it is
/// mirrored read-only in the local cache and the in-memory session state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub email: String,
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// The user-editable profile record, keyed one-to-one with [`User`] by `id`.
///
/// `matric_no` and `email` are immutable once set; the session layer
/// preserves the existing values when a partial update names them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub id: String,
    pub full_name: String,
    pub matric_no: String,
    pub email: String,
    pub phone_number: Option<String>,
    pub course: Option<String>,
    pub department: Option<String>,
    pub level: Option<String>,
    pub hall: Option<String>,
    pub profile_image_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// An empty profile shell for a freshly created identity.
    pub fn for_user(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            full_name: String::new(),
            matric_no: String::new(),
            email: email.into(),
            phone_number: None,
            course: None,
            department: None,
            level: None,
            hall: None,
            profile_image_url: None,
            updated_at: Utc::now(),
        }
    }
}

/// A partial profile edit. `None` fields are left untouched by the merge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub matric_no: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub course: Option<String>,
    pub department: Option<String>,
    pub level: Option<String>,
    pub hall: Option<String>,
    pub profile_image_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Contacts
// ---------------------------------------------------------------------------

/// Broad grouping used by the helpline directory and the chat responder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ContactCategory {
    Security,
    Health,
    School,
    Government,
    Other(String),
}

impl ContactCategory {
    pub fn label(&self) -> &str {
        match self {
            Self::Security => "Security",
            Self::Health => "Health",
            Self::School => "School",
            Self::Government => "Government",
            Self::Other(s) => s,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum ContactPriority {
    Low,
    Medium,
    High,
    VeryHigh,
}

/// An emergency or helpline contact.
///
/// Seed contacts ship with the application and cannot be deleted;
/// user-added contacts (`is_user_added = true`) can.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub category: ContactCategory,
    pub number: String,
    pub priority: ContactPriority,
    pub online: bool,
    pub is_user_added: bool,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// An in-message link pointing the user at another screen of the app.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageLink {
    pub text: String,
    pub target_screen: String,
}

/// A single chat message inside a per-contact thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: Uuid,
    /// `"You"` for outgoing messages, the contact's name otherwise.
    pub sender: String,
    pub text: String,
    pub time: DateTime<Utc>,
    pub read: bool,
    pub reply_to: Option<Uuid>,
    pub links: Vec<MessageLink>,
}

impl ChatMessage {
    /// Build an outgoing message from the local user.
    pub fn outgoing(text: impl Into<String>, reply_to: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: "You".to_string(),
            text: text.into(),
            time: Utc::now(),
            read: false,
            reply_to,
            links: Vec::new(),
        }
    }

    /// Build an incoming message attributed to `sender`.
    pub fn incoming(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: sender.into(),
            text: text.into(),
            time: Utc::now(),
            read: true,
            reply_to: None,
            links: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Theme
// ---------------------------------------------------------------------------

/// UI theme preference persisted in the local cache.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Dark,
    Light,
}

impl Default for Theme {
    fn default() -> Self {
        Self::Dark
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn theme_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Theme::Dark).unwrap(), "\"dark\"");
        assert_eq!(serde_json::to_string(&Theme::Light).unwrap(), "\"light\"");
    }

    #[test]
    fn profile_round_trip() {
        let p = Profile::for_user("u-1", "a@b.edu.ng");
        let json = serde_json::to_string(&p).unwrap();
        let back: Profile = serde_json::from_str(&json).unwrap();
        assert_eq!(p, back);
    }

    #[test]
    fn outgoing_message_defaults() {
        let m = ChatMessage::outgoing("hello", None);
        assert_eq!(m.sender, "You");
        assert!(!m.read);
        assert!(m.links.is_empty());
    }
}
