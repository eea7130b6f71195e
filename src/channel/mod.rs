//! Command channel: the one persistent duplex connection to the device.
//!
//! # Architecture
//!
//! ```text
//!  send_text() ──> [writer half] ─────────────> device
//!
//!  device ──> [reader half] ── receive loop ──> ObserverRegistry
//!                                                 ├─> handshake observer
//!                                                 ├─> token observer
//!                                                 └─> correlator observer
//! ```
//!
//! The receive loop is the only task that dispatches to observers, so every
//! observer sees messages in arrival order. `send_text` returns once the
//! frame is written and flushed, never waiting for a reply.
//!
//! The receive loop is not started by [`CommandChannel::connect`]: callers
//! register their observers first and then call [`CommandChannel::start`],
//! so events the device emits straight after the upgrade are not lost.

mod observer;
mod tls;

pub use observer::{Observer, ObserverGuard, ObserverRegistry, ObserverToken};
pub use tls::{relaxed_client_config, AcceptAnyCert};

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};

use crate::error::{RemoteError, Result};
use crate::protocol::InboundMessage;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Anything that can carry an outbound text frame to the device.
///
/// The dispatcher and correlator only need this much of the channel, which
/// keeps them testable without a socket.
pub trait MessageSink: Send + Sync {
    /// Write one text frame. Resolves once the transport accepted it.
    fn send_text(&self, text: String) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// The persistent WebSocket connection to the device
pub struct CommandChannel {
    url: String,
    writer: tokio::sync::Mutex<Option<WsWriter>>,
    reader: Mutex<Option<WsReader>>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
    observers: Arc<ObserverRegistry>,
    closed: Arc<watch::Sender<bool>>,
}

impl CommandChannel {
    /// Open the WebSocket within `connect_timeout`.
    ///
    /// `log_url` is what appears in logs and errors (tokens redacted).
    pub async fn connect(
        url: &str,
        log_url: &str,
        subprotocols: &[String],
        connect_timeout: Duration,
    ) -> Result<Arc<Self>> {
        let mut request = url.into_client_request()?;
        if !subprotocols.is_empty() {
            let value = HeaderValue::from_str(&subprotocols.join(", "))
                .map_err(|e| RemoteError::Config(format!("Invalid subprotocol list: {}", e)))?;
            request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
        }

        tracing::debug!("Opening command channel to {}", log_url);

        let connector = Connector::Rustls(relaxed_client_config());
        let connect = tokio_tungstenite::connect_async_tls_with_config(
            request,
            None,
            false,
            Some(connector),
        );

        let (stream, _response) = tokio::time::timeout(connect_timeout, connect)
            .await
            .map_err(|_| RemoteError::ConnectTimeout {
                url: log_url.to_string(),
                timeout: connect_timeout,
            })?
            .map_err(|e| RemoteError::Connection(format!("{}: {}", log_url, e)))?;

        tracing::info!("Command channel open to {}", log_url);

        let (writer, reader) = stream.split();
        let (closed, _) = watch::channel(false);

        Ok(Arc::new(Self {
            url: log_url.to_string(),
            writer: tokio::sync::Mutex::new(Some(writer)),
            reader: Mutex::new(Some(reader)),
            receive_task: Mutex::new(None),
            observers: Arc::new(ObserverRegistry::new()),
            closed: Arc::new(closed),
        }))
    }

    /// Redacted URL this channel is connected to
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Register an observer for every inbound message
    pub fn observe<F>(&self, observer: F) -> ObserverGuard
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        let token = self.observers.register(Arc::new(observer));
        ObserverGuard::new(&self.observers, token)
    }

    /// Observer table
    pub fn observers(&self) -> &Arc<ObserverRegistry> {
        &self.observers
    }

    /// Start the receive loop. Idempotent.
    pub fn start(&self) {
        let Some(mut reader) = lock(&self.reader).take() else {
            return;
        };

        let observers = self.observers.clone();
        let closed = self.closed.clone();
        let url = self.url.clone();

        let task = tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => {
                            tracing::trace!("Dropping non-UTF-8 binary frame");
                            continue;
                        },
                    },
                    Ok(Message::Close(frame)) => {
                        tracing::info!("Device closed command channel {}: {:?}", url, frame);
                        break;
                    },
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!("Command channel {} read error: {}", url, e);
                        break;
                    },
                };

                match InboundMessage::parse(&text) {
                    Ok(message) => {
                        tracing::trace!(event = ?message.event(), "inbound message");
                        observers.dispatch(&message);
                    },
                    Err(e) => tracing::debug!("Dropping undecodable frame: {}", e),
                }
            }

            closed.send_replace(true);
        });

        *lock(&self.receive_task) = Some(task);
    }

    /// Whether the channel has stopped (locally or by the device)
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves when the channel stops
    pub fn closed(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.closed.subscribe();
        async move {
            loop {
                let closed = *rx.borrow_and_update();
                // A dropped sender also means closed
                if closed || rx.changed().await.is_err() {
                    return;
                }
            }
        }
    }

    /// Send one text frame
    pub async fn send(&self, text: String) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(RemoteError::ChannelClosed)?;
        if self.is_closed() {
            return Err(RemoteError::ChannelClosed);
        }
        writer.send(Message::Text(text)).await?;
        Ok(())
    }

    /// Stop the receive loop, close the transport and clear every observer.
    ///
    /// Components with outstanding work fail it through their own teardown;
    /// the channel resolves nothing on their behalf.
    pub async fn disconnect(&self) {
        if let Some(task) = lock(&self.receive_task).take() {
            task.abort();
        }
        lock(&self.reader).take();

        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.close().await {
                tracing::debug!("Error closing command channel {}: {}", self.url, e);
            }
        }

        self.observers.clear();
        self.closed.send_replace(true);
        tracing::info!("Command channel {} disconnected", self.url);
    }
}

impl MessageSink for CommandChannel {
    fn send_text(&self, text: String) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(self.send(text))
    }
}

impl std::fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandChannel")
            .field("url", &self.url)
            .field("closed", &self.is_closed())
            .field("observers", &self.observers.len())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
