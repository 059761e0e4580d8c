//! Error types for the ifconnect client.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport-layer, protocol-layer, and
//! caller-facing errors are all captured here.

/// The error type for all ifconnect operations.
///
/// Variants cover the full range of failure modes encountered when talking
/// to a simulator instance: discovery, manifest negotiation, transport
/// failures, timeouts, and misuse of the typed command catalog.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No simulator announced itself on UDP within the deadline.
    #[error("discovery timed out")]
    DiscoveryTimeout,

    /// The manifest connection failed, timed out, or produced text that
    /// could not be decoded.
    #[error("manifest error: {0}")]
    Manifest(String),

    /// A transport-level error on a long-lived session.
    #[error("transport error: {0}")]
    Transport(String),

    /// Timed out waiting for a response from the simulator.
    #[error("timeout waiting for response")]
    Timeout,

    /// The named manifest entry does not exist in the loaded catalog.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// A value or operation is incompatible with the entry's manifest type.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// No connection to the simulator has been established, or the client
    /// has been closed.
    #[error("not connected")]
    NotConnected,

    /// The connection to the simulator was lost while a request was pending.
    #[error("connection lost")]
    ConnectionLost,

    /// A protocol-level error (malformed frame, bad payload length).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
