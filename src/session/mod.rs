//! Session façade.
//!
//! Owns the "current channel" and everything bound to it. A connect builds a
//! fresh [`CommandChannel`], runs the handshake, then installs the dispatcher
//! and correlator. Replacing or dropping the channel always fails the old
//! correlator's outstanding requests before anything new is installed.
//!
//! # Lifecycle
//!
//! ```text
//! connect()
//!   ├─ tear down previous channel (fail_all, disconnect)
//!   ├─ open channel (scheme fallback on failure)        [Connecting]
//!   ├─ token observer + handshake observer, start loop  [Authenticating]
//!   ├─ wait for connect + ready
//!   └─ correlator observer, dispatcher, drop monitor    [Connected]
//!
//! channel drops unexpectedly ──> fail_all ──> [Error]
//! disconnect() ──> [Disconnecting] ──> fail_all, close ──> [Disconnected]
//! ```
//!
//! A disconnect during the handshake closes the channel being established,
//! which fails the pending `connect()` straight away.

mod state;

pub use state::ConnectionState;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::art::{ArtClient, UploadRequest};
use crate::channel::{CommandChannel, MessageSink, ObserverGuard};
use crate::config::Config;
use crate::correlator::ResponseCorrelator;
use crate::dispatch::{CommandDispatcher, RetryPolicy};
use crate::error::{RemoteError, Result};
use crate::protocol::{ConnectionUrl, HandshakeCoordinator, InboundMessage, Key, EVENT_CHANNEL_CONNECT};
use crate::rest::{RestUploader, UploadFallback};
use crate::token::{FileTokenStore, MemoryTokenStore, TokenStore};

/// Everything bound to one open channel
struct Active {
    channel: Arc<CommandChannel>,
    dispatcher: CommandDispatcher,
    correlator: ResponseCorrelator,
    _correlator_observer: ObserverGuard,
    monitor: JoinHandle<()>,
}

impl Active {
    /// Fail outstanding work and close the channel
    async fn teardown(&self) {
        self.monitor.abort();
        self.correlator.fail_all();
        self.channel.disconnect().await;
    }
}

/// Externally visible connect / command surface
pub struct Session {
    config: Config,
    tokens: Arc<dyn TokenStore>,
    fallback: Option<Arc<dyn UploadFallback>>,
    token: Arc<Mutex<Option<String>>>,
    state: Arc<watch::Sender<ConnectionState>>,
    active: Mutex<Option<Arc<Active>>>,
    // Channel still in its handshake, closed by `disconnect`
    establishing: Mutex<Option<Arc<CommandChannel>>>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl Session {
    /// Session with an explicit token store and no upload fallback
    pub fn new(config: Config, tokens: Arc<dyn TokenStore>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            tokens,
            fallback: None,
            token: Arc::new(Mutex::new(None)),
            state: Arc::new(state),
            active: Mutex::new(None),
            establishing: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Session wired from configuration: file token store (in-memory when no
    /// config directory exists) and the REST upload fallback.
    pub fn from_config(config: Config) -> Result<Self> {
        let tokens: Arc<dyn TokenStore> = match config.tokens.resolved_path() {
            Some(path) => Arc::new(FileTokenStore::new(path)),
            None => {
                tracing::warn!("No config directory, tokens will not persist");
                Arc::new(MemoryTokenStore::new())
            },
        };
        let rest = RestUploader::new(
            &config.device.host,
            config.transfer.rest_port,
            &config.transfer.rest_upload_path,
            config.timeouts.transfer(),
        )?;
        Ok(Self::new(config, tokens).with_fallback(Arc::new(rest)))
    }

    /// Install an upload fallback
    pub fn with_fallback(mut self, fallback: Arc<dyn UploadFallback>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Token currently held (loaded or freshly issued)
    pub fn token(&self) -> Option<String> {
        lock(&self.token).clone()
    }

    /// Open the channel and complete the handshake.
    ///
    /// Any previous channel is torn down first. On failure the state is
    /// [`ConnectionState::Error`].
    pub async fn connect(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        let previous = lock(&self.active).take();
        if let Some(previous) = previous {
            tracing::debug!("Replacing existing channel {}", previous.channel.url());
            previous.teardown().await;
        }

        let established = self.establish().await;
        lock(&self.establishing).take();

        match established {
            Ok(active) => {
                let active = Arc::new(active);
                *lock(&self.active) = Some(active.clone());
                self.set_state(ConnectionState::Connected);

                // The drop monitor ignores a close seen before this point
                if active.channel.is_closed() {
                    tracing::warn!("Command channel {} closed right after the handshake", active.channel.url());
                    lock(&self.active).take();
                    active.teardown().await;
                    self.set_state(ConnectionState::Error);
                    return Err(RemoteError::ChannelClosed);
                }
                Ok(())
            },
            Err(e) => {
                tracing::warn!("Connect failed: {}", e);
                self.set_state(ConnectionState::Error);
                Err(e)
            },
        }
    }

    /// Close the channel. Every outstanding request fails with
    /// [`RemoteError::Disconnected`].
    pub async fn disconnect(&self) {
        let establishing = lock(&self.establishing).take();
        if let Some(channel) = establishing {
            tracing::debug!("Aborting handshake on {}", channel.url());
            channel.disconnect().await;
        }

        let _lifecycle = self.lifecycle.lock().await;

        let active = lock(&self.active).take();
        let Some(active) = active else {
            self.set_state(ConnectionState::Disconnected);
            return;
        };

        self.set_state(ConnectionState::Disconnecting);
        active.teardown().await;
        self.set_state(ConnectionState::Disconnected);
    }

    /// Click a key
    pub async fn send_key(&self, key: &Key) -> Result<()> {
        self.active()?.dispatcher.send_key(key).await
    }

    /// Click keys in order, pausing `delay` between them
    pub async fn send_keys(&self, keys: &[Key], delay: Duration) -> Result<()> {
        self.active()?.dispatcher.send_keys(keys, delay).await
    }

    /// Press, hold and release a key
    pub async fn hold_key(&self, key: &Key, duration: Duration) -> Result<()> {
        self.active()?.dispatcher.hold_key(key, duration).await
    }

    /// Raw application request; `timeout` defaults to the configured request timeout
    pub async fn perform_request(
        &self,
        kind: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let timeout = timeout.unwrap_or_else(|| self.config.timeouts.request());
        self.active()?
            .correlator
            .perform_request(kind, payload, timeout)
            .await
    }

    /// Art-mode operations on the current channel
    pub fn art(&self) -> Result<ArtClient> {
        let active = self.active()?;
        Ok(ArtClient::new(
            active.correlator.clone(),
            self.config.timeouts.request(),
            self.config.timeouts.transfer(),
        ))
    }

    /// Validate raw image bytes against the configured limits
    pub fn prepare_upload(&self, data: impl Into<Bytes>, file_type: &str) -> Result<UploadRequest> {
        UploadRequest::new(data, file_type, self.config.transfer.max_upload_bytes)
    }

    /// Upload an image; returns the new content id.
    ///
    /// Uses D2D when enabled and falls back to the REST collaborator when
    /// D2D is disabled or reports the transfer unsupported.
    pub async fn upload(&self, upload: &UploadRequest) -> Result<String> {
        if self.config.transfer.d2d_enabled {
            match self.art()?.upload(upload).await {
                Err(e) if e.is_unsupported() && self.fallback.is_some() => {
                    tracing::info!("D2D upload unavailable ({}), falling back", e);
                },
                other => return other,
            }
        }

        match &self.fallback {
            Some(fallback) => {
                tracing::debug!("Uploading via {} fallback", fallback.name());
                fallback.upload(upload).await
            },
            None => Err(RemoteError::Unsupported(
                "D2D upload disabled and no fallback configured".to_string(),
            )),
        }
    }

    /// Download an artwork thumbnail
    pub async fn thumbnail(&self, content_id: &str) -> Result<Bytes> {
        self.art()?.thumbnail(content_id).await
    }

    async fn establish(&self) -> Result<Active> {
        self.set_state(ConnectionState::Connecting);

        let device = &self.config.device;
        let timeouts = &self.config.timeouts;
        let device_id = device.device_id().to_string();

        if lock(&self.token).is_none() {
            match self.tokens.load(&device_id) {
                Ok(Some(stored)) => *lock(&self.token) = Some(stored),
                Ok(None) => {},
                Err(e) => tracing::warn!("Could not load stored token: {}", e),
            }
        }
        let token = self.token();
        let has_token = token.is_some();

        let url = ConnectionUrl::new(
            &device.host,
            device.port,
            &device.channel_path,
            &device.name,
            token,
        );
        let channel = match self.open(&url).await {
            Ok(channel) => channel,
            Err(first) => {
                let alternate = url.fallback();
                tracing::warn!(
                    "Connect over {} failed ({}), trying {}",
                    url.scheme,
                    first,
                    alternate.redacted()
                );
                self.open(&alternate).await?
            },
        };

        *lock(&self.establishing) = Some(channel.clone());
        self.set_state(ConnectionState::Authenticating);

        // Token capture runs before the handshake observer for the same message
        let (issued_tx, mut issued) = mpsc::unbounded_channel();
        let token_observer = channel.observe(token_capture(self.token.clone(), issued_tx));
        let handshake = HandshakeCoordinator::begin(&channel);
        channel.start();

        let timeout = timeouts.handshake(has_token);
        tracing::info!(
            "Waiting up to {:?} for handshake{}",
            timeout,
            if has_token { "" } else { " (approve the pairing prompt on the device)" }
        );
        let outcome = handshake.wait(timeout).await;
        token_observer.deregister();

        // Persist off the receive loop; only the latest issued token matters
        let mut latest = None;
        while let Ok(token) = issued.try_recv() {
            latest = Some(token);
        }
        if let Some(token) = latest {
            persist_token(self.tokens.clone(), device_id, token).await;
        }

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                channel.disconnect().await;
                return Err(e);
            },
        };
        tracing::info!("Handshake complete in {:?}", outcome.elapsed);

        let sink: Arc<dyn MessageSink> = channel.clone();
        let correlator = ResponseCorrelator::new(sink.clone(), timeouts.request());
        let correlator_observer = {
            let correlator = correlator.clone();
            channel.observe(move |message| correlator.handle_message(message))
        };
        let dispatcher = CommandDispatcher::new(
            sink,
            RetryPolicy {
                timeout: timeouts.command(),
                backoff: timeouts.retry_backoff(),
            },
        );
        let monitor = spawn_drop_monitor(&channel, correlator.clone(), self.state.clone());

        Ok(Active {
            channel,
            dispatcher,
            correlator,
            _correlator_observer: correlator_observer,
            monitor,
        })
    }

    async fn open(&self, url: &ConnectionUrl) -> Result<Arc<CommandChannel>> {
        let device = &self.config.device;
        CommandChannel::connect(
            &url.to_url(),
            &url.redacted(),
            &device.subprotocols,
            self.config.timeouts.connect(),
        )
        .await
    }

    fn active(&self) -> Result<Arc<Active>> {
        match lock(&self.active).as_ref() {
            Some(active) if !active.channel.is_closed() => Ok(active.clone()),
            _ => Err(RemoteError::NotConnected),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!("Connection state {} -> {}", previous, state);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.config.device.host)
            .field("state", &self.state())
            .field("has_token", &self.token().is_some())
            .finish_non_exhaustive()
    }
}

/// Observer recording a freshly issued token. Empty tokens and the token
/// already held are ignored. Newly held tokens are forwarded on `issued`
/// for persistence.
fn token_capture(
    held: Arc<Mutex<Option<String>>>,
    issued: mpsc::UnboundedSender<String>,
) -> impl Fn(&InboundMessage) + Send + Sync + 'static {
    move |message| {
        if message.event() != Some(EVENT_CHANNEL_CONNECT) {
            return;
        }
        let Some(token) = message.token() else {
            return;
        };

        {
            let mut held = lock(&held);
            if held.as_deref() == Some(token) {
                return;
            }
            *held = Some(token.to_string());
        }
        let _ = issued.send(token.to_string());
    }
}

/// Save a token on the blocking pool
async fn persist_token(store: Arc<dyn TokenStore>, device_id: String, token: String) {
    let id = device_id.clone();
    match tokio::task::spawn_blocking(move || store.save(&id, &token)).await {
        Ok(Ok(())) => tracing::info!("Stored new token for {}", device_id),
        Ok(Err(e)) => tracing::warn!("Failed to persist token for {}: {}", device_id, e),
        Err(e) => tracing::warn!("Token save for {} did not complete: {}", device_id, e),
    }
}

/// Moves the session to `Error` and fails outstanding requests when the
/// channel stops while still marked connected.
fn spawn_drop_monitor(
    channel: &CommandChannel,
    correlator: ResponseCorrelator,
    state: Arc<watch::Sender<ConnectionState>>,
) -> JoinHandle<()> {
    let closed = channel.closed();
    let url = channel.url().to_string();
    tokio::spawn(async move {
        closed.await;
        if *state.borrow() == ConnectionState::Connected {
            tracing::warn!("Command channel {} dropped unexpectedly", url);
            correlator.fail_all();
            state.send_replace(ConnectionState::Error);
        }
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
