//! Connection state.

use std::fmt;

/// Connection lifecycle.
///
/// ```text
/// Disconnected ─> Connecting ─> Authenticating ─> Connected ─> Disconnecting ─> Disconnected
///       any state ───────────────────────────────> Error (reconnect required)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No channel
    #[default]
    Disconnected,
    /// Opening the channel
    Connecting,
    /// Channel open, handshake in progress
    Authenticating,
    /// Handshake complete, channel usable
    Connected,
    /// Local teardown in progress
    Disconnecting,
    /// Establishment failed or the channel dropped
    Error,
}

impl ConnectionState {
    /// Whether operations may be issued
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    /// Lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
