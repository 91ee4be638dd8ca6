//! # aegis-shared
//!
//! Domain types shared across the Aegis campus-safety client crates.
//!
//! Every struct derives `Serialize` and `Deserialize` so records can be
//! persisted to the local cache and exchanged with the hosted backend
//! without conversion layers.

pub mod types;

pub use types::*;
