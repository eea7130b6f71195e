//! # tvremote - Smart-TV Remote-Control Client
//!
//! Client for the smart-TV remote-control WebSocket protocol: a persistent
//! command channel with a two-event handshake, key presses with timeout and
//! single retry, request/response correlation over the application
//! sub-channel, and one-shot D2D sockets for bulk image transfer.
//!
//! ## Features
//!
//! - **Handshake**: waits for `ms.channel.connect` and `ms.channel.ready` in
//!   either order, tolerating a human approving the pairing prompt
//! - **Token capture**: freshly issued tokens are persisted per device
//! - **Command dispatch**: 5 s deadline, one retry after a 500 ms backoff
//! - **Correlation**: FIFO per request kind, per-request timeouts, teardown
//!   fails everything outstanding
//! - **D2D transfer**: length-prefixed JSON header plus payload over raw TCP,
//!   with a REST multipart fallback
//!
//! ## Architecture
//!
//! ```text
//!                       Session
//!    ┌─────────────┬───────┴──────┬─────────────┐
//!    │             │              │             │
//! Handshake   Dispatcher     Correlator ──> ArtClient ──> BinaryTransfer
//!    │             │              │                         (raw TCP)
//!    └─────────────┴──────┬───────┘
//!                   CommandChannel
//!               (WebSocket + observers)
//! ```
//!
//! ### Connection States
//!
//! ```text
//!     [Disconnected] ──connect()──> [Connecting] ──open──> [Authenticating]
//!          ^                             │                       │
//!          │                             │ failure               │ connect + ready
//!          │                             v                       v
//!   [Disconnecting] <──disconnect()── [Error] <──drop──── [Connected]
//! ```
//!
//! ### Wire Formats
//!
//! | Channel      | Format                                                   |
//! |--------------|----------------------------------------------------------|
//! | Key press    | `{method:"ms.remote.control", params:{Cmd, DataOfCmd,..}}` |
//! | Application  | `{method:"ms.channel.emit", params:{event, to, data}}`   |
//! | D2D          | `u32 BE length` + JSON header + raw bytes                |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tvremote::{Config, Key, Session};
//!
//! let mut config = Config::from_env();
//! config.device.host = "192.168.1.20".to_string();
//!
//! let session = Session::from_config(config)?;
//! session.connect().await?;
//!
//! session.send_key(&Key::POWER).await?;
//!
//! let art = session.art()?;
//! if !art.artmode_status().await? {
//!     art.set_artmode(true).await?;
//! }
//!
//! let upload = session.prepare_upload(std::fs::read("sunset.jpg")?, "jpg")?;
//! let content_id = session.upload(&upload).await?;
//! art.select_image(&content_id, true).await?;
//!
//! session.disconnect().await;
//! ```
//!
//! ## Modules
//!
//! - [`channel`]: Command channel and observer registry
//! - [`protocol`]: Messages, key codes, connection URL, handshake
//! - [`dispatch`]: Key presses with timeout and retry
//! - [`correlator`]: Request/response matching
//! - [`transfer`]: D2D header codec and socket
//! - [`art`]: Art-mode operations
//! - [`rest`]: REST upload fallback
//! - [`token`]: Token persistence
//! - [`session`]: Session façade
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod art;
pub mod channel;
pub mod config;
pub mod correlator;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod rest;
pub mod session;
pub mod token;
pub mod transfer;

// Re-exports for convenience
pub use art::{ArtClient, ImageFormat, UploadRequest};
pub use channel::{CommandChannel, MessageSink, ObserverGuard, ObserverRegistry};
pub use config::Config;
pub use correlator::{correlation_key, PendingReply, ResponseCorrelator};
pub use dispatch::{CommandDispatcher, RetryPolicy};
pub use error::{RemoteError, Result};
pub use protocol::{ConnectionUrl, HandshakeCoordinator, InboundMessage, Key, KeyAction, OutboundMessage};
pub use rest::{RestUploader, UploadFallback};
pub use session::{ConnectionState, Session};
pub use token::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use transfer::{BinaryTransfer, ConnectionInfo, TransferHeader};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
