//! Events emitted for UI observers.

use aegis_shared::Profile;

/// Where the reconciler currently stands in its auth state machine.
///
/// `Unknown` only exists between construction and the first resolution pass
/// of [`SessionStore::initialize`](crate::SessionStore::initialize).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthState {
    #[default]
    Unknown,
    Authenticated,
    Anonymous,
}

/// Session-layer notifications, broadcast to every subscriber.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The auth state machine transitioned.  Emitted once per transition.
    AuthChanged(AuthState),
    /// The current profile changed (cache warm-up, remote write-through, or
    /// a committed update).
    ProfileChanged(Profile),
}

/// Contact/chat-layer notifications.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// The thread for `contact_id` gained, lost, or mutated a message.
    ThreadUpdated { contact_id: String },
}
