//! Message observer registry.
//!
//! An explicit table keyed by opaque tokens. Every decoded inbound message is
//! offered to every registered observer in registration order; a message may
//! match none, one, or many of them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::protocol::InboundMessage;

/// Observer callback. Runs on the receive loop and must not block.
pub type Observer = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

/// Opaque observer identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverToken(u64);

/// Registered observers for one command channel
#[derive(Default)]
pub struct ObserverRegistry {
    next: AtomicU64,
    observers: Mutex<BTreeMap<ObserverToken, Observer>>,
}

impl ObserverRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer
    pub fn register(&self, observer: Observer) -> ObserverToken {
        let token = ObserverToken(self.next.fetch_add(1, Ordering::Relaxed));
        self.lock().insert(token, observer);
        token
    }

    /// Remove an observer. Returns false if it was already gone.
    pub fn deregister(&self, token: ObserverToken) -> bool {
        self.lock().remove(&token).is_some()
    }

    /// Offer a message to every observer.
    ///
    /// The table is snapshotted first so observers may deregister themselves
    /// (or others) from inside the callback.
    pub fn dispatch(&self, message: &InboundMessage) -> usize {
        let snapshot: Vec<Observer> = self.lock().values().cloned().collect();
        for observer in &snapshot {
            observer(message);
        }
        snapshot.len()
    }

    /// Remove every observer
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of registered observers
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no observer is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<ObserverToken, Observer>> {
        // A panicking observer must not wedge the channel
        self.observers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observers", &self.len())
            .finish()
    }
}

/// Deregisters its observer when dropped.
#[derive(Debug)]
pub struct ObserverGuard {
    registry: Weak<ObserverRegistry>,
    token: ObserverToken,
}

impl ObserverGuard {
    pub(crate) fn new(registry: &Arc<ObserverRegistry>, token: ObserverToken) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            token,
        }
    }

    /// Token of the guarded observer
    pub fn token(&self) -> ObserverToken {
        self.token
    }

    /// Deregister now. Idempotent.
    pub fn deregister(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.deregister(self.token))
    }
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        self.deregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn message(event: &str) -> InboundMessage {
        InboundMessage::from_value(serde_json::json!({ "event": event })).unwrap()
    }

    #[test]
    fn test_fan_out_to_all_observers() {
        let registry = ObserverRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let hits = hits.clone();
            registry.register(Arc::new(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            }));
        }

        assert_eq!(registry.dispatch(&message("ms.channel.ready")), 3);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_deregister_is_idempotent() {
        let registry = ObserverRegistry::new();
        let token = registry.register(Arc::new(|_| {}));

        assert!(registry.deregister(token));
        assert!(!registry.deregister(token));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_observer_may_deregister_itself() {
        let registry = Arc::new(ObserverRegistry::new());
        let slot: Arc<Mutex<Option<ObserverToken>>> = Arc::new(Mutex::new(None));

        let reg = registry.clone();
        let own = slot.clone();
        let token = registry.register(Arc::new(move |_| {
            if let Some(token) = *own.lock().unwrap() {
                reg.deregister(token);
            }
        }));
        *slot.lock().unwrap() = Some(token);

        registry.dispatch(&message("x"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_guard_deregisters_on_drop() {
        let registry = Arc::new(ObserverRegistry::new());
        let token = registry.register(Arc::new(|_| {}));
        let guard = ObserverGuard::new(&registry, token);
        assert_eq!(registry.len(), 1);

        drop(guard);
        assert!(registry.is_empty());
    }
}
