//! # aegis-remote
//!
//! Capability surfaces for the hosted backend the Aegis client talks to:
//! the remote identity service (sessions, credentials) and the remote
//! profile store (the `profiles` table).
//!
//! The session layer consumes these as trait objects so tests can swap in
//! in-memory fakes; [`RestBackend`] is the production implementation,
//! speaking the backend's HTTP API over `reqwest`.

pub mod config;
pub mod identity;
pub mod profiles;
pub mod rest;
pub mod types;

mod error;

pub use config::RemoteConfig;
pub use error::RemoteError;
pub use identity::IdentityService;
pub use profiles::ProfileStore;
pub use rest::RestBackend;
pub use types::{AuthChange, AuthEvent, Session};
