//! Remote-control client error types.
//!
//! # Error Classification
//!
//! Every public operation ends with a value or exactly one `RemoteError`.
//! The variants map onto the failure classes a caller has to tell apart:
//!
//! - **Establishment**: `Connection`, `ConnectTimeout`, `HandshakeTimeout`,
//!   `Unauthorized`
//! - **Per-operation deadlines**: `CommandTimeout` (after the single retry),
//!   `RequestTimeout`
//! - **Device-reported**: `Device` carries the device's own code and message
//! - **Teardown**: `Disconnected` is injected into every outstanding request
//!   when the command channel goes away
//! - **Transfer**: `InvalidUpload`, `IncompleteConnectionInfo`, `Transfer`
//! - **Fallback trigger**: `Unsupported` tells the session to try the REST path
//!
//! [`RemoteError::is_retryable`] separates transient conditions from terminal ones.

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Remote-control client errors.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// The command channel could not be opened.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The command channel did not open within the connect timeout.
    #[error("Connect to {url} timed out after {timeout:?}")]
    ConnectTimeout {
        /// URL that was being dialled (token redacted).
        url: String,
        /// Deadline that expired.
        timeout: Duration,
    },

    /// The device did not emit both handshake events in time.
    #[error("Handshake timed out after {timeout:?} (connect seen: {connect_seen}, ready seen: {ready_seen})")]
    HandshakeTimeout {
        /// Deadline that expired.
        timeout: Duration,
        /// Whether the channel-connect event was observed.
        connect_seen: bool,
        /// Whether the channel-ready event was observed.
        ready_seen: bool,
    },

    /// The device refused the pairing request.
    #[error("Device rejected the connection: {0}")]
    Unauthorized(String),

    /// Operation requires a connected session.
    #[error("Session not connected")]
    NotConnected,

    /// The command channel has been closed.
    #[error("Command channel closed")]
    ChannelClosed,

    /// A command was not acknowledged after the retry.
    #[error("Command {command} timed out after {attempts} attempts")]
    CommandTimeout {
        /// Key or command that was being sent.
        command: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// The device reported an error for a request.
    #[error("Device error during {operation}: {code} {message}")]
    Device {
        /// Request kind the error was reported for.
        operation: String,
        /// Device error code.
        code: String,
        /// Device error message, empty when none was sent.
        message: String,
    },

    /// An application request got no reply in time.
    #[error("Request {kind} timed out after {timeout:?}")]
    RequestTimeout {
        /// Request kind that timed out.
        kind: String,
        /// Deadline that expired.
        timeout: Duration,
    },

    /// An outstanding request was failed because the channel went away.
    #[error("Request {kind} abandoned: channel disconnected")]
    Disconnected {
        /// Request kind that was outstanding.
        kind: String,
    },

    /// Upload input failed validation.
    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    /// The transfer-prepare reply lacked a connection coordinate.
    #[error("Incomplete connection information: missing {missing}")]
    IncompleteConnectionInfo {
        /// Name of the missing field.
        missing: &'static str,
    },

    /// The binary transfer failed.
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// The device or channel cannot perform the operation.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// An inbound message could not be interpreted.
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// Protocol-level error.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// Token store failure.
    #[error("Token store error: {0}")]
    TokenStore(String),

    /// REST fallback failure.
    #[error("Network error: {0}")]
    Network(String),

    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for remote-control operations
pub type Result<T> = std::result::Result<T, RemoteError>;

impl RemoteError {
    /// Whether repeating the operation (possibly after a reconnect) may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::ConnectTimeout { .. }
                | Self::HandshakeTimeout { .. }
                | Self::NotConnected
                | Self::ChannelClosed
                | Self::CommandTimeout { .. }
                | Self::RequestTimeout { .. }
                | Self::Disconnected { .. }
                | Self::Network(_)
                | Self::WebSocket(_)
                | Self::Io(_)
        )
    }

    /// Whether the session should fall back to the REST upload path.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        RemoteError::Network(err.to_string())
    }
}

impl From<toml::de::Error> for RemoteError {
    fn from(err: toml::de::Error) -> Self {
        RemoteError::Config(err.to_string())
    }
}

impl From<base64::DecodeError> for RemoteError {
    fn from(err: base64::DecodeError) -> Self {
        RemoteError::InvalidMessage(format!("Base64 decode error: {err}"))
    }
}
