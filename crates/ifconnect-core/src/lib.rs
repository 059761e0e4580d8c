//! ifconnect-core: Core types, errors, and events for the ifconnect client.
//!
//! This crate defines the protocol-agnostic data model shared by the
//! protocol engine and any tooling built around it: the six wire types,
//! decoded values, the command catalog ("manifest"), lifecycle events, and
//! error handling.
//!
//! # Key types
//!
//! - [`WireType`] / [`Value`] -- the scalar type system of the wire protocol
//! - [`Manifest`] / [`ManifestEntry`] -- the typed command catalog
//! - [`ClientEvent`] -- asynchronous lifecycle and data notifications
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod manifest;
pub mod types;

// Re-export key types at crate root for ergonomic `use ifconnect_core::*`.
pub use error::{Error, Result};
pub use events::{ClientEvent, SessionKind};
pub use manifest::{EntryKind, Manifest, ManifestEntry};
pub use types::{Value, WireType, MANIFEST_COMMAND_ID};
