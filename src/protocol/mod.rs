//! Command channel wire protocol.
//!
//! Implements the remote-control message formats, the connection URL, and
//! the two-event handshake a device runs after the channel opens.
//!
//! # Protocol Overview
//!
//! ```text
//! Client                                Device
//!    |                                     |
//!    |==== WebSocket upgrade (name,token) =>|
//!    |                                     |  (pairing prompt, if no token)
//!    |<--- ms.channel.connect {token} -----|  either order
//!    |<--- ms.channel.ready ---------------|
//!    |                                     |
//!    |---- ms.remote.control {Click} ----->|  key presses
//!    |                                     |
//!    |---- ms.channel.emit art_app_request>|  application requests
//!    |<--- d2d_service_message {event} ----|  unsolicited replies
//! ```
//!
//! ## Handshake States
//!
//! | State               | Description                    | Valid Transitions          |
//! |---------------------|--------------------------------|----------------------------|
//! | `WaitingForBoth`    | Nothing seen yet               | → WaitingFor*, Failed      |
//! | `WaitingForReady`   | Connect seen                   | → Complete, Failed         |
//! | `WaitingForConnect` | Ready seen                     | → Complete, Failed         |
//! | `Complete`          | Both seen, channel usable      | (terminal)                 |
//! | `Failed`            | Deadline passed or rejected    | (terminal)                 |
//!
//! ## Channel Paths
//!
//! | Path                                        | Use                     |
//! |---------------------------------------------|-------------------------|
//! | `/api/v2/channels/samsung.remote.control`   | Key presses             |
//! | `/api/v2/channels/com.samsung.art-app`      | Art-mode application    |

mod handshake;
mod keys;
mod message;
mod url;

pub use handshake::{Handshake, HandshakeCoordinator, HandshakeOutcome, HandshakeState};
pub use keys::{Key, KeyAction};
pub use message::{
    EmitParams, InboundMessage, OutboundMessage, RemoteControlParams, APPLICATION_EVENTS,
    EVENT_ART_APP_REQUEST, EVENT_CHANNEL_CONNECT, EVENT_CHANNEL_READY, EVENT_CHANNEL_TIMEOUT,
    EVENT_CHANNEL_UNAUTHORIZED, EVENT_D2D_SERVICE_MESSAGE, EVENT_ERROR, METHOD_CHANNEL_EMIT,
    METHOD_REMOTE_CONTROL,
};
pub use url::{ConnectionUrl, Scheme, PLAIN_PORT, SECURE_PORT};

/// Remote-control channel path
pub const REMOTE_CONTROL_PATH: &str = "/api/v2/channels/samsung.remote.control";

/// Art-mode application channel path
pub const ART_APP_PATH: &str = "/api/v2/channels/com.samsung.art-app";

/// Default handshake deadline (covers a human approving the pairing prompt)
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 90;
