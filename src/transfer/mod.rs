//! Binary transfer channel (D2D).
//!
//! A one-shot raw TCP connection to a peer the device names in a
//! transfer-prepare reply. One transfer per connection; a closed transfer is
//! never reused.
//!
//! ## Transfer States
//!
//! | State       | Description                  | Valid Transitions     |
//! |-------------|------------------------------|-----------------------|
//! | `Idle`      | Nothing opened yet           | → Connected, Closed   |
//! | `Connected` | Socket open                  | → Sent, Closed        |
//! | `Sent`      | Payload written or read      | → Closed              |
//! | `Closed`    | Socket released              | (terminal)            |

mod header;

pub use header::{TransferHeader, HEADER_VERSION, LENGTH_PREFIX_SIZE, MAX_HEADER_SIZE};

use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{RemoteError, Result};

/// Largest payload accepted on a receive
pub const MAX_RECEIVE_BYTES: u64 = 64 * 1024 * 1024;

/// Peer coordinates from a transfer-prepare reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Peer address
    pub ip: String,
    /// Peer port
    pub port: u16,
    /// Session key to echo in the header
    pub key: String,
    /// Peer expects TLS
    pub secured: bool,
}

impl ConnectionInfo {
    /// Extract coordinates from a reply's `conn_info`, which the device
    /// sends either as an object or as a JSON-encoded string.
    pub fn from_reply(reply: &Value) -> Result<Self> {
        let decoded;
        let info = match reply.get("conn_info") {
            Some(Value::String(text)) => {
                decoded = serde_json::from_str::<Value>(text).map_err(|e| {
                    RemoteError::InvalidMessage(format!("conn_info is not JSON: {}", e))
                })?;
                &decoded
            },
            Some(value @ Value::Object(_)) => value,
            _ => return Err(RemoteError::IncompleteConnectionInfo { missing: "conn_info" }),
        };

        let ip = info
            .get("ip")
            .and_then(Value::as_str)
            .filter(|ip| !ip.is_empty())
            .ok_or(RemoteError::IncompleteConnectionInfo { missing: "ip" })?;

        let port = match info.get("port") {
            Some(Value::Number(n)) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
            Some(Value::String(s)) => s.parse().ok(),
            _ => None,
        }
        .filter(|port| *port != 0)
        .ok_or(RemoteError::IncompleteConnectionInfo { missing: "port" })?;

        let key = info
            .get("key")
            .and_then(Value::as_str)
            .ok_or(RemoteError::IncompleteConnectionInfo { missing: "key" })?;

        let secured = match info.get("secured") {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        };

        Ok(Self {
            ip: ip.to_string(),
            port,
            key: key.to_string(),
            secured,
        })
    }

    /// `ip:port`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// Binary transfer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Not connected
    Idle,
    /// Socket open
    Connected,
    /// Payload transferred
    Sent,
    /// Socket released
    Closed,
}

/// One-shot binary transfer over raw TCP
#[derive(Debug)]
pub struct BinaryTransfer {
    state: TransferState,
    stream: Option<TcpStream>,
    peer: String,
    timeout: Duration,
}

impl BinaryTransfer {
    /// New idle transfer; `timeout` bounds each step
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: TransferState::Idle,
            stream: None,
            peer: String::new(),
            timeout,
        }
    }

    /// Current state
    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Open the connection
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        self.expect_state(TransferState::Idle, "connect")?;
        self.peer = format!("{}:{}", host, port);

        tracing::debug!("Opening D2D connection to {}", self.peer);
        let stream = self
            .step("connect", TcpStream::connect((host, port)))
            .await
            .map_err(|e| {
                self.state = TransferState::Closed;
                e
            })?;
        stream.set_nodelay(true)?;

        self.stream = Some(stream);
        self.state = TransferState::Connected;
        Ok(())
    }

    /// Write the length-prefixed header followed by the payload
    pub async fn send(&mut self, header: &TransferHeader, payload: &[u8]) -> Result<()> {
        self.expect_state(TransferState::Connected, "send")?;
        if header.file_length != payload.len() as u64 {
            return Err(RemoteError::Transfer(format!(
                "Header declares {} bytes, payload has {}",
                header.file_length,
                payload.len()
            )));
        }

        let prefix = header.encode()?;
        let timeout = self.timeout;
        let peer = self.peer.clone();
        let stream = self.stream.as_mut().ok_or(RemoteError::ChannelClosed)?;

        let write = async {
            stream.write_all(&prefix).await?;
            stream.write_all(payload).await?;
            stream.flush().await
        };
        tokio::time::timeout(timeout, write)
            .await
            .map_err(|_| RemoteError::Transfer(format!("send to {} timed out", peer)))?
            .map_err(|e| RemoteError::Transfer(format!("send to {} failed: {}", peer, e)))?;

        tracing::debug!(
            "Sent {} header bytes + {} payload bytes to {}",
            prefix.len(),
            payload.len(),
            peer
        );
        self.state = TransferState::Sent;
        Ok(())
    }

    /// Read one length-prefixed header and exactly `fileLength` payload bytes
    pub async fn receive(&mut self) -> Result<(TransferHeader, Bytes)> {
        self.expect_state(TransferState::Connected, "receive")?;

        let timeout = self.timeout;
        let peer = self.peer.clone();
        let stream = self.stream.as_mut().ok_or(RemoteError::ChannelClosed)?;

        let read = async {
            let len = header::check_header_len(stream.read_u32().await?)?;
            let mut json = vec![0u8; len];
            stream.read_exact(&mut json).await?;
            let header = TransferHeader::from_json(&json)?;

            if header.file_length > MAX_RECEIVE_BYTES {
                return Err(RemoteError::Transfer(format!(
                    "Declared payload of {} bytes exceeds limit",
                    header.file_length
                )));
            }
            let mut payload = vec![0u8; header.file_length as usize];
            stream.read_exact(&mut payload).await?;
            Ok::<_, RemoteError>((header, Bytes::from(payload)))
        };

        let (header, payload) = tokio::time::timeout(timeout, read)
            .await
            .map_err(|_| RemoteError::Transfer(format!("receive from {} timed out", peer)))?
            .map_err(|e| match e {
                RemoteError::Io(io) => {
                    RemoteError::Transfer(format!("receive from {} failed: {}", peer, io))
                },
                other => other,
            })?;

        tracing::debug!("Received {} payload bytes from {}", payload.len(), peer);
        self.state = TransferState::Sent;
        Ok((header, payload))
    }

    /// Release the socket. Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                tracing::trace!("D2D shutdown for {}: {}", self.peer, e);
            }
        }
        self.state = TransferState::Closed;
    }

    /// Connect, send, close
    pub async fn upload(
        info: &ConnectionInfo,
        header: &TransferHeader,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<()> {
        let mut transfer = Self::new(timeout);
        transfer.connect(&info.ip, info.port).await?;
        let result = transfer.send(header, payload).await;
        transfer.close().await;
        result
    }

    /// Connect, receive, close
    pub async fn download(info: &ConnectionInfo, timeout: Duration) -> Result<(TransferHeader, Bytes)> {
        let mut transfer = Self::new(timeout);
        transfer.connect(&info.ip, info.port).await?;
        let result = transfer.receive().await;
        transfer.close().await;
        result
    }

    fn expect_state(&self, expected: TransferState, op: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(RemoteError::Transfer(format!(
                "Cannot {} in state {:?}",
                op, self.state
            )))
        }
    }

    async fn step<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = std::io::Result<T>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| RemoteError::Transfer(format!("{} to {} timed out", op, self.peer)))?
            .map_err(|e| RemoteError::Transfer(format!("{} to {} failed: {}", op, self.peer, e)))
    }
}
