use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::SessionOptions;
use crate::error::Result;
use crate::events::{EventBus, SubscriberId, Subscription};
use crate::session::{Session, SessionTable};
use crate::types::SessionHandle;

/// Entry point: discovers BMCs, opens sessions, and owns the event bus.
///
/// Sessions opened through one `Ipmi` share its bus and are enumerable with
/// [`stats`](Ipmi::stats). There is no automatic re-opening: a session that
/// closes (for any reason) stays closed until the caller opens a new one.
pub struct Ipmi {
    bus: EventBus,
    sessions: SessionTable,
    next_tag: AtomicU32,
}

impl Ipmi {
    /// Create an instance with no sessions and no observers.
    pub fn new() -> Self {
        Self {
            bus: EventBus::new(),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_tag: AtomicU32::new(0),
        }
    }

    /// Probe `host` on UDP/623 for IPMI support. See [`crate::ping`].
    pub async fn ping(&self, host: IpAddr, wait: Duration) -> bool {
        crate::ping::ping(host, wait).await
    }

    /// Open a session to `host` and drive it to the active state.
    ///
    /// The port and all credentials come from `options`. On failure the
    /// session never existed: nothing is enumerated and no close event fires.
    pub async fn open(&self, host: IpAddr, options: SessionOptions) -> Result<Session> {
        let resolved = options.resolve()?;
        let target = SocketAddr::new(host, resolved.port);
        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
        Session::open(
            target,
            resolved,
            self.bus.clone(),
            Arc::clone(&self.sessions),
            tag,
        )
        .await
    }

    /// Register an observer for session lifecycle and error notifications.
    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    /// Remove an observer. Returns false when the id is unknown.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Live sessions and observers.
    pub fn stats(&self) -> Stats {
        let mut sessions: Vec<SessionHandle> = match self.sessions.lock() {
            Ok(mut table) => {
                table.retain(|_, weak| {
                    weak.upgrade().map(|tx| !tx.is_closed()).unwrap_or(false)
                });
                table.keys().copied().collect()
            }
            Err(_) => Vec::new(),
        };
        sessions.sort_by_key(|handle| handle.tag());

        Stats {
            sessions,
            observers: self.bus.observers(),
        }
    }
}

impl Default for Ipmi {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of live sessions and registered observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    /// Handles of every live session, in opening order.
    pub sessions: Vec<SessionHandle>,
    /// Ids of every registered observer.
    pub observers: Vec<SubscriberId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_start_empty_and_track_observers() {
        let ipmi = Ipmi::new();
        assert!(ipmi.stats().sessions.is_empty());
        assert!(ipmi.stats().observers.is_empty());

        let sub = ipmi.subscribe();
        assert_eq!(ipmi.stats().observers, vec![sub.id()]);

        assert!(ipmi.unsubscribe(sub.id()));
        assert!(ipmi.stats().observers.is_empty());
    }
}
