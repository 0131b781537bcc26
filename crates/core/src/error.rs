//! Error taxonomy shared by every adapter variant.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    /// No handshake acknowledgement arrived in time. Fails `connect()` only.
    #[error("handshake not acknowledged within {0:?}")]
    HandshakeTimeout(Duration),

    /// Socket-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The transport closed before the handshake was acknowledged.
    #[error("connection closed before the session was ready (code {code}): {reason}")]
    ClosedBeforeReady { code: u16, reason: String },

    /// An explicit error frame sent by the vendor.
    #[error("vendor error: {0}")]
    Vendor(String),

    /// Streamed tool-call data that could not be reconstructed. Never surfaced
    /// to the application; the adapter logs and drops it.
    #[error("malformed tool-call arguments: {0}")]
    ProtocolParse(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// `connect()` was called on an adapter whose session already ran.
    #[error("session already used; adapters are not reusable")]
    SessionClosed,
}

pub type AdapterResult<T> = Result<T, AdapterError>;
