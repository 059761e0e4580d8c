//! Client for the Infinite Flight Connect v2 API.
//!
//! Connect v2 is a length-prefixed, little-endian binary protocol spoken
//! over TCP port 10112 against a simulator running on the local network.
//! The simulator announces itself by UDP broadcast on port 15000; after
//! discovery the client fetches a typed command catalog (the "manifest")
//! and opens two long-lived sessions: one for one-shot reads, writes, and
//! command invocations, and one for a round-robin subscription loop.
//!
//! - **Client** ([`client`]) -- the public handle: connect, `get`/`set`/
//!   `run`, poll registration, lifecycle and data events.
//! - **Wire codec** ([`codec`]) -- pure request/response framing.
//! - **Discovery** ([`discovery`]) -- find a simulator on the LAN.
//! - **Manifest loader** ([`loader`]) -- fetch and parse the catalog over a
//!   short-lived connection.
//! - **State cache** ([`cache`]) -- last decoded value per manifest name.
//!
//! # Example
//!
//! ```no_run
//! use ifconnect::{Client, Config};
//! use std::time::Duration;
//!
//! # async fn example() -> ifconnect_core::Result<()> {
//! let instance = ifconnect::discovery::discover(Duration::from_secs(5)).await?;
//! let client = Client::connect(Config {
//!     host: Some(instance.address),
//!     ..Config::default()
//! })
//! .await?;
//!
//! let altitude = client.get("aircraft/0/altitude_msl").await?;
//! println!("altitude: {altitude}");
//! client.close().await;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod codec;
pub mod discovery;
pub mod loader;

mod poll;
mod session;

pub use cache::StateCache;
pub use client::{Client, Config, DEFAULT_PORT};
pub use discovery::DiscoveredInstance;

// Re-export the core data model so most embedders need only this crate.
pub use ifconnect_core::{
    ClientEvent, EntryKind, Error, Manifest, ManifestEntry, Result, SessionKind, Value, WireType,
    MANIFEST_COMMAND_ID,
};
