//! Command dispatcher: key presses with a fixed deadline and one retry.
//!
//! ```text
//! attempt 1 ──(timeout)──> sleep(backoff) ──> attempt 2 ──(timeout)──> CommandTimeout
//!     │                                           │
//!     └──(other error)──> surfaced, no retry      └──(other error)──> surfaced
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::channel::MessageSink;
use crate::error::{RemoteError, Result};
use crate::protocol::{Key, KeyAction, OutboundMessage};

/// Deadline and retry settings for commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Per-attempt deadline
    pub timeout: Duration,
    /// Pause before the single retry
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            backoff: Duration::from_millis(500),
        }
    }
}

/// Turns keys into messages and sends them with timeout + retry
#[derive(Clone)]
pub struct CommandDispatcher {
    sink: Arc<dyn MessageSink>,
    policy: RetryPolicy,
}

impl CommandDispatcher {
    /// Create a dispatcher over a sink
    pub fn new(sink: Arc<dyn MessageSink>, policy: RetryPolicy) -> Self {
        Self { sink, policy }
    }

    /// Active policy
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Click a key
    pub async fn send_key(&self, key: &Key) -> Result<()> {
        self.send_action(KeyAction::Click, key).await
    }

    /// Send a key action. A timed-out attempt is retried exactly once after
    /// the backoff; any other failure is returned as-is.
    pub async fn send_action(&self, action: KeyAction, key: &Key) -> Result<()> {
        let payload = OutboundMessage::remote_key(action, key).to_json()?;

        match self.attempt(payload.clone()).await {
            Err(Attempt::TimedOut) => {
                tracing::warn!(
                    "{} {} not acknowledged within {:?}, retrying in {:?}",
                    action.name(),
                    key,
                    self.policy.timeout,
                    self.policy.backoff
                );
            },
            Err(Attempt::Failed(e)) => return Err(e),
            Ok(()) => return Ok(()),
        }

        tokio::time::sleep(self.policy.backoff).await;

        match self.attempt(payload).await {
            Ok(()) => Ok(()),
            Err(Attempt::Failed(e)) => Err(e),
            Err(Attempt::TimedOut) => Err(RemoteError::CommandTimeout {
                command: key.to_string(),
                attempts: 2,
            }),
        }
    }

    /// Send keys strictly one after another, pausing `delay` between them
    pub async fn send_keys(&self, keys: &[Key], delay: Duration) -> Result<()> {
        for (i, key) in keys.iter().enumerate() {
            self.send_key(key).await?;
            if i + 1 < keys.len() {
                tokio::time::sleep(delay).await;
            }
        }
        Ok(())
    }

    /// Press, hold for `duration`, release
    pub async fn hold_key(&self, key: &Key, duration: Duration) -> Result<()> {
        self.send_action(KeyAction::Press, key).await?;
        tokio::time::sleep(duration).await;
        self.send_action(KeyAction::Release, key).await
    }

    async fn attempt(&self, payload: String) -> std::result::Result<(), Attempt> {
        match tokio::time::timeout(self.policy.timeout, self.sink.send_text(payload)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Attempt::Failed(e)),
            Err(_) => Err(Attempt::TimedOut),
        }
    }
}

impl std::fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

enum Attempt {
    TimedOut,
    Failed(RemoteError),
}
