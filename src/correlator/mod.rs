//! Response correlator: request/response semantics over unsolicited pushes.
//!
//! The application sub-channel only delivers push messages. Each logical
//! request registers a pending entry under the key its reply will carry;
//! inbound messages resolve the oldest entry of their key.
//!
//! # Invariants
//!
//! - Same-kind requests resolve first-in-first-out.
//! - An entry resolves exactly once: reply, device failure, timeout, or
//!   teardown, whichever comes first. Late arrivals are no-ops.
//! - A timeout removes its own entry by identity, never a sibling of the
//!   same kind.
//! - [`ResponseCorrelator::fail_all`] resolves every outstanding entry.
//!
//! ```text
//!  perform_request(kind) ─┬─> queue[kind].push_back(entry)
//!                         ├─> send ms.channel.emit
//!                         └─> await entry
//!
//!  inbound message ──> correlation_key() ──> queue[key].pop_front() ──> resolve
//! ```

mod key;

pub use key::{correlation_key, device_error, DeviceFailure, ERROR_EVENT};

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::channel::MessageSink;
use crate::error::{RemoteError, Result};
use crate::protocol::{InboundMessage, OutboundMessage};

type Reply = Result<Value>;

struct Waiter {
    id: u64,
    origin: Option<String>,
    tx: oneshot::Sender<Reply>,
}

#[derive(Default)]
struct Queues {
    next_id: u64,
    closed: bool,
    by_kind: HashMap<String, VecDeque<Waiter>>,
}

impl Queues {
    /// Remove a specific entry by identity
    fn remove(&mut self, kind: &str, id: u64) -> Option<Waiter> {
        let queue = self.by_kind.get_mut(kind)?;
        let pos = queue.iter().position(|w| w.id == id)?;
        let waiter = queue.remove(pos);
        if queue.is_empty() {
            self.by_kind.remove(kind);
        }
        waiter
    }

    fn pop_head(&mut self, kind: &str) -> Option<Waiter> {
        let queue = self.by_kind.get_mut(kind)?;
        let waiter = queue.pop_front();
        if queue.is_empty() {
            self.by_kind.remove(kind);
        }
        waiter
    }

    /// Oldest entry (across kinds) whose originating request is `origin`
    fn pop_by_origin(&mut self, origin: &str) -> Option<(String, Waiter)> {
        let (kind, id) = self
            .by_kind
            .iter()
            .flat_map(|(kind, queue)| queue.iter().map(move |w| (kind, w)))
            .filter(|(_, w)| w.origin.as_deref() == Some(origin))
            .min_by_key(|(_, w)| w.id)
            .map(|(kind, w)| (kind.clone(), w.id))?;
        let waiter = self.remove(&kind, id)?;
        Some((kind, waiter))
    }

    fn len(&self) -> usize {
        self.by_kind.values().map(VecDeque::len).sum()
    }
}

/// Matches inbound application messages to outstanding requests
#[derive(Clone)]
pub struct ResponseCorrelator {
    sink: Arc<dyn MessageSink>,
    queues: Arc<Mutex<Queues>>,
    default_timeout: Duration,
}

impl ResponseCorrelator {
    /// Create a correlator sending through `sink`
    pub fn new(sink: Arc<dyn MessageSink>, default_timeout: Duration) -> Self {
        Self {
            sink,
            queues: Arc::new(Mutex::new(Queues::default())),
            default_timeout,
        }
    }

    /// Default request timeout
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Send an application request and wait for the reply keyed `kind`.
    ///
    /// A correlation id is injected as `id` unless the payload carries one.
    pub async fn perform_request(
        &self,
        kind: &str,
        mut payload: Value,
        timeout: Duration,
    ) -> Result<Value> {
        if let Some(object) = payload.as_object_mut() {
            object
                .entry("id")
                .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));
        }
        let origin = payload
            .get("request")
            .and_then(Value::as_str)
            .map(str::to_string);

        let pending = self.expect(kind, origin, timeout);
        let message = OutboundMessage::art_request(&payload)?.to_json()?;

        tracing::debug!(kind, "sending application request");
        // The deadline covers the send too. On failure the pending entry is
        // dropped, which removes it.
        match tokio::time::timeout_at(pending.deadline, self.sink.send_text(message)).await {
            Ok(sent) => sent?,
            Err(_) => {
                tracing::debug!(kind, "request send stalled past its deadline");
                return Err(pending.timed_out());
            },
        }

        pending.wait().await
    }

    /// Register interest in the next reply keyed `kind` without sending.
    ///
    /// The timeout starts now, not when the reply is first awaited.
    ///
    /// Used when one request produces several replies, e.g. a transfer
    /// prepare acknowledgement followed by a completion event. `origin`
    /// names the request that error replies will point back to.
    pub fn expect(&self, kind: &str, origin: Option<String>, timeout: Duration) -> PendingReply {
        let (tx, rx) = oneshot::channel();
        let mut queues = self.lock();
        let id = queues.next_id;
        queues.next_id += 1;

        if queues.closed {
            let _ = tx.send(Err(RemoteError::Disconnected {
                kind: kind.to_string(),
            }));
        } else {
            queues
                .by_kind
                .entry(kind.to_string())
                .or_default()
                .push_back(Waiter { id, origin, tx });
        }

        PendingReply {
            id,
            kind: kind.to_string(),
            timeout,
            deadline: tokio::time::Instant::now() + timeout,
            rx,
            queues: self.queues.clone(),
        }
    }

    /// Observer entry point: route one inbound message.
    ///
    /// Non-application messages and messages with no waiting queue are dropped.
    pub fn handle_message(&self, message: &InboundMessage) {
        if !message.is_application() {
            return;
        }

        let payload = message.payload();
        let Some(key) = correlation_key(&payload) else {
            tracing::trace!(event = ?message.event(), "dropping application message without correlation key");
            return;
        };

        let failure = device_error(&payload, message.event());
        let mut queues = self.lock();

        let (kind, waiter) = match queues.pop_head(&key) {
            Some(waiter) => (key.clone(), waiter),
            None if failure.is_some() => match queues.pop_by_origin(&key) {
                Some(found) => found,
                None => {
                    tracing::debug!(key = %key, "dropping unmatched device error");
                    return;
                },
            },
            None => {
                tracing::trace!(key = %key, "dropping unsolicited application message");
                return;
            },
        };
        drop(queues);

        let reply = match failure {
            Some(failure) => {
                tracing::debug!(kind = %kind, code = %failure.code, "device reported failure");
                Err(RemoteError::Device {
                    operation: waiter.origin.clone().unwrap_or(kind),
                    code: failure.code,
                    message: failure.message,
                })
            },
            None => Ok(payload),
        };

        // Receiver gone means the caller already timed out or was cancelled
        let _ = waiter.tx.send(reply);
    }

    /// Fail every outstanding request with a disconnect error and refuse new
    /// ones. Returns how many were failed.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<(String, Waiter)> = {
            let mut queues = self.lock();
            queues.closed = true;
            queues
                .by_kind
                .drain()
                .flat_map(|(kind, queue)| queue.into_iter().map(move |w| (kind.clone(), w)))
                .collect()
        };

        let count = drained.len();
        for (kind, waiter) in drained {
            let _ = waiter.tx.send(Err(RemoteError::Disconnected { kind }));
        }
        if count > 0 {
            tracing::info!("Failed {} outstanding request(s) on teardown", count);
        }
        count
    }

    /// Number of outstanding requests
    pub fn outstanding(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Queues> {
        lock_queues(&self.queues)
    }
}

impl std::fmt::Debug for ResponseCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCorrelator")
            .field("outstanding", &self.outstanding())
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

/// One outstanding request. Dropping it withdraws the request.
pub struct PendingReply {
    id: u64,
    kind: String,
    timeout: Duration,
    deadline: tokio::time::Instant,
    rx: oneshot::Receiver<Reply>,
    queues: Arc<Mutex<Queues>>,
}

impl PendingReply {
    /// Reply kind this entry waits for
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Wait for the single resolution of this request
    pub async fn wait(mut self) -> Result<Value> {
        match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(RemoteError::Disconnected {
                kind: self.kind.clone(),
            }),
            Err(_) => {
                if self.withdraw() {
                    tracing::debug!(kind = %self.kind, "request timed out");
                    return Err(self.timed_out());
                }
                // Resolved between the deadline and the withdrawal
                match self.rx.try_recv() {
                    Ok(reply) => reply,
                    Err(_) => Err(self.timed_out()),
                }
            },
        }
    }

    fn timed_out(&self) -> RemoteError {
        RemoteError::RequestTimeout {
            kind: self.kind.clone(),
            timeout: self.timeout,
        }
    }

    /// Remove this entry if still queued
    fn withdraw(&self) -> bool {
        lock_queues(&self.queues)
            .remove(&self.kind, self.id)
            .is_some()
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.withdraw();
    }
}

impl std::fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingReply")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn lock_queues(queues: &Mutex<Queues>) -> MutexGuard<'_, Queues> {
    queues.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
