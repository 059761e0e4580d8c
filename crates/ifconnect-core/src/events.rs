//! Asynchronous client event types.
//!
//! Events are emitted by the client through a [`tokio::sync::broadcast`]
//! channel: continuously refreshed state values from the poll engine plus
//! connection lifecycle transitions. Subscribers receive an independent copy
//! of every event; slow consumers may miss events under heavy load.

use std::fmt;

use crate::types::Value;

/// Which long-lived session an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    /// The session carrying one-shot reads, writes, and invokes.
    Command,
    /// The session carrying the round-robin subscription loop.
    Poll,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKind::Command => write!(f, "command"),
            SessionKind::Poll => write!(f, "poll"),
        }
    }
}

/// An event emitted by the client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The command catalog has been fetched and parsed.
    ///
    /// Always precedes [`ClientEvent::Ready`] and any
    /// [`ClientEvent::Data`].
    ManifestLoaded {
        /// Number of entries in the catalog.
        entries: usize,
    },

    /// Both long-lived sessions are open; the client is usable.
    Ready,

    /// A polled state variable was refreshed.
    Data {
        /// Manifest name of the state variable.
        name: String,
        /// The decoded value.
        value: Value,
    },

    /// A session failed and is being re-established.
    Reconnecting {
        /// Which session is reconnecting.
        session: SessionKind,
        /// The reconnection attempt number (1-based).
        attempt: u32,
    },

    /// A session was re-established after a failure.
    Reconnected {
        /// Which session reconnected.
        session: SessionKind,
    },

    /// A read on a session exceeded the configured timeout.
    ReadTimeout {
        /// Which session timed out.
        session: SessionKind,
    },

    /// A session failed fatally with reconnection disabled; the client is
    /// no longer connected.
    Disconnected,

    /// The client was closed by the embedder. Emitted exactly once.
    Closed,
}
