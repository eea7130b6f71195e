//! Two-event handshake run over a freshly opened command channel.
//!
//! The device emits `ms.channel.connect` and `ms.channel.ready` in either
//! order, possibly after a human approves a pairing prompt. Both must be seen
//! before the channel is usable.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use super::message::{
    EVENT_CHANNEL_CONNECT, EVENT_CHANNEL_READY, EVENT_CHANNEL_TIMEOUT, EVENT_CHANNEL_UNAUTHORIZED,
};
use crate::channel::{CommandChannel, ObserverGuard};
use crate::error::{RemoteError, Result};

/// Handshake state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Neither event seen yet
    WaitingForBoth,
    /// Ready seen, connect outstanding
    WaitingForConnect,
    /// Connect seen, ready outstanding
    WaitingForReady,
    /// Both events seen
    Complete,
    /// Rejected or timed out
    Failed,
}

/// Pure handshake bookkeeping, independent of any channel
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    connect_seen: bool,
    ready_seen: bool,
    failed: bool,
}

impl Handshake {
    /// Fresh handshake
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> HandshakeState {
        match (self.failed, self.connect_seen, self.ready_seen) {
            (true, _, _) => HandshakeState::Failed,
            (false, true, true) => HandshakeState::Complete,
            (false, true, false) => HandshakeState::WaitingForReady,
            (false, false, true) => HandshakeState::WaitingForConnect,
            (false, false, false) => HandshakeState::WaitingForBoth,
        }
    }

    /// Record an event. Unrelated events leave the state unchanged, and a
    /// finished handshake ignores everything.
    pub fn observe(&mut self, event: &str) -> HandshakeState {
        if matches!(self.state(), HandshakeState::Complete | HandshakeState::Failed) {
            return self.state();
        }

        match event {
            EVENT_CHANNEL_CONNECT => self.connect_seen = true,
            EVENT_CHANNEL_READY => self.ready_seen = true,
            _ => {},
        }
        self.state()
    }

    /// Mark as failed
    pub fn fail(&mut self) {
        if self.state() != HandshakeState::Complete {
            self.failed = true;
        }
    }

    /// Whether the connect event was seen
    pub fn connect_seen(&self) -> bool {
        self.connect_seen
    }

    /// Whether the ready event was seen
    pub fn ready_seen(&self) -> bool {
        self.ready_seen
    }

    /// Whether both events were seen
    pub fn is_complete(&self) -> bool {
        self.state() == HandshakeState::Complete
    }
}

/// Result of a completed handshake
#[derive(Debug, Clone, Copy)]
pub struct HandshakeOutcome {
    /// Time from registration to completion
    pub elapsed: Duration,
}

/// Drives a [`Handshake`] from a channel's message stream.
///
/// Its observer is transient: it is removed when the coordinator finishes,
/// whichever way that happens. A channel that stops mid-handshake, by the
/// device or a local disconnect, fails the wait with
/// [`RemoteError::ChannelClosed`].
pub struct HandshakeCoordinator {
    events: mpsc::UnboundedReceiver<String>,
    closed: Pin<Box<dyn Future<Output = ()> + Send>>,
    observer: ObserverGuard,
    started: Instant,
}

impl HandshakeCoordinator {
    /// Register the handshake observer. Call before the channel's receive
    /// loop starts so no event is missed.
    pub fn begin(channel: &CommandChannel) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let observer = channel.observe(move |message| {
            if let Some(event) = message.event() {
                let _ = tx.send(event.to_string());
            }
        });

        Self {
            events,
            closed: Box::pin(channel.closed()),
            observer,
            started: Instant::now(),
        }
    }

    /// Wait until both events are seen, the device refuses, or `timeout` expires
    pub async fn wait(mut self, timeout: Duration) -> Result<HandshakeOutcome> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut handshake = Handshake::new();

        let result = loop {
            let next = async {
                tokio::select! {
                    // Events delivered before the close still count
                    biased;
                    event = self.events.recv() => event,
                    () = &mut self.closed => None,
                }
            };
            let event = match tokio::time::timeout_at(deadline, next).await {
                Ok(Some(event)) => event,
                Ok(None) => {
                    tracing::debug!(
                        connect_seen = handshake.connect_seen(),
                        ready_seen = handshake.ready_seen(),
                        "channel closed during handshake"
                    );
                    handshake.fail();
                    break Err(RemoteError::ChannelClosed);
                },
                Err(_) => {
                    handshake.fail();
                    break Err(RemoteError::HandshakeTimeout {
                        timeout,
                        connect_seen: handshake.connect_seen(),
                        ready_seen: handshake.ready_seen(),
                    });
                },
            };

            match event.as_str() {
                EVENT_CHANNEL_UNAUTHORIZED => {
                    handshake.fail();
                    break Err(RemoteError::Unauthorized(
                        "pairing request denied on the device".to_string(),
                    ));
                },
                EVENT_CHANNEL_TIMEOUT => {
                    handshake.fail();
                    break Err(RemoteError::HandshakeTimeout {
                        timeout,
                        connect_seen: handshake.connect_seen(),
                        ready_seen: handshake.ready_seen(),
                    });
                },
                _ => {},
            }

            let state = handshake.observe(&event);
            tracing::debug!(event = %event, ?state, "handshake progress");
            if state == HandshakeState::Complete {
                break Ok(HandshakeOutcome {
                    elapsed: self.started.elapsed(),
                });
            }
        };

        self.observer.deregister();
        result
    }
}
