//! # aegis-store
//!
//! The local durable cache for the Aegis application: a persisted key-value
//! store backed by SQLite.  Values are serialized records (the callers
//! serialize, the store only moves strings), matching the contract the
//! session layer expects: `get_item`, `set_item`, `remove_item`, plus an
//! atomic batch for multi-key mutations.
//!
//! The typed helpers in [`records`] wrap the raw surface with the stable
//! key layout (`user`, `userProfile`, `theme_preference`, `contacts`,
//! `recentContacts`, `chat_<contactId>`).

pub mod database;
pub mod keys;
pub mod migrations;
pub mod records;

mod error;

pub use database::{Cache, CacheOp};
pub use error::StoreError;
