//! Session lifecycle and error notifications.
//!
//! The bus fans every published event out to all registered subscribers.
//! Publishing never blocks: each subscriber gets its own unbounded queue and
//! consumes it on its own task. Subscribers whose receiver has been dropped
//! are pruned on the next publish.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::error::DecodeError;
use crate::types::SessionHandle;

/// A notification published by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// The session the notification concerns.
    pub handle: SessionHandle,
    /// What happened.
    pub kind: EventKind,
}

/// The kinds of notification a session publishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// The session reached the active state.
    Established,
    /// The session closed.
    Closed {
        /// Why the session closed.
        reason: CloseReason,
    },
    /// A received datagram failed to decode and was dropped.
    DecodeError {
        /// The structural failure.
        reason: DecodeError,
    },
    /// A request hit its deadline and was failed with a timeout.
    RequestTimeout {
        /// Requestor sequence number of the request.
        seq: u8,
    },
    /// A decoded response matched no in-flight request and was dropped.
    NoRequestor {
        /// Requestor sequence number carried by the response.
        seq: u8,
        /// Network function of the response.
        netfn: u8,
        /// Command of the response.
        cmd: u8,
        /// Completion code of the response.
        completion_code: u8,
    },
    /// A SEL record failed to decode and was skipped during a log read.
    MalformedSelRecord {
        /// Record id claimed by the raw entry.
        record_id: u16,
        /// Record type that failed to classify.
        record_type: u8,
    },
}

/// Why a session closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The caller closed it (or dropped the handle).
    User,
    /// The BMC closed it or rejected the session id.
    Remote,
    /// A socket error tore it down.
    Transport,
    /// An unrecoverable decode error during setup tore it down.
    Decode,
}

/// Identifies one subscriber on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

/// A subscriber's end of the bus.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::UnboundedReceiver<Event>,
}

impl Subscription {
    /// The id to pass to [`EventBus::unsubscribe`].
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Receive the next event; `None` after unsubscribing.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

/// Fan-out of session notifications to registered observers.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

#[derive(Debug, Default)]
struct BusInner {
    next_id: u64,
    subscribers: HashMap<SubscriberId, mpsc::UnboundedSender<Event>>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register an observer.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let id = SubscriberId(inner.next_id);
        inner.next_id += 1;
        inner.subscribers.insert(id, tx);
        Subscription { id, rx }
    }

    /// Remove an observer. Returns false when the id is unknown.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.lock().subscribers.remove(&id).is_some()
    }

    /// Ids of all live observers.
    pub fn observers(&self) -> Vec<SubscriberId> {
        let mut ids: Vec<_> = self.lock().subscribers.keys().copied().collect();
        ids.sort();
        ids
    }

    pub(crate) fn publish(&self, handle: SessionHandle, kind: EventKind) {
        let mut inner = self.lock();
        inner.subscribers.retain(|_, tx| {
            tx.send(Event {
                handle,
                kind: kind.clone(),
            })
            .is_ok()
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusInner> {
        // The bus holds no invariants across panics worth preserving.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn handle() -> SessionHandle {
        let target: SocketAddr = "192.0.2.1:623".parse().unwrap();
        SessionHandle::new(target, 0)
    }

    #[test]
    fn events_fan_out_to_every_subscriber() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(handle(), EventKind::Established);

        assert_eq!(a.try_recv().unwrap().kind, EventKind::Established);
        assert_eq!(b.try_recv().unwrap().kind, EventKind::Established);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        let id = sub.id();

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));

        bus.publish(handle(), EventKind::Established);
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn dropped_receivers_are_pruned_on_publish() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        let id = sub.id();
        drop(sub);

        bus.publish(handle(), EventKind::Established);
        assert!(!bus.observers().contains(&id));
    }
}
