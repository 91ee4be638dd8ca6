//! # aegis-session
//!
//! The stateful core of the Aegis campus-safety client:
//!
//! - [`SessionStore`] — the session reconciler.  Resolves the authoritative
//!   `(User, Profile)` pair across three tiers (in-memory state, the local
//!   durable cache, the remote identity/profile services), keeps the faster
//!   tiers write-through-synchronized with successful remote reads, and
//!   emits state-change events UI observers subscribe to.
//! - [`ContactStore`] — the contact/chat local store.  Owns the helpline
//!   directory, the recent-contacts list and the per-contact message
//!   threads, all persisted locally; simulated replies and read receipts
//!   run as cancellable scheduled tasks.
//!
//! Both stores are owned by the application root and injected into UI
//! components; nothing in this crate reads ambient global state.

pub mod chat;
pub mod contacts;
pub mod events;
pub mod responder;
pub mod session;

mod error;

pub use chat::{DelayStrategy, ImmediateDelays, SimulatedDelays};
pub use contacts::{ContactStore, NewContact, MAX_RECENT_CONTACTS};
pub use error::SessionError;
pub use events::{AuthState, ChatEvent, SessionEvent};
pub use session::{SessionStore, SignUpOutcome};
