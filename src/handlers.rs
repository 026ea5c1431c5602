//! Handler notification queue.
//!
//! Changed tasks notify handlers by name. Notifications are deduplicated:
//! however many tasks notify a handler before a flush, it runs at most once
//! per flush, and only for the hosts whose tasks actually reported a change.
//! Flush order is first-notified order, not declaration order.

use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;

/// The reserved module name that forces a mid-play handler flush.
pub const FLUSH_HANDLERS: &str = "flush_handlers";

/// One drained notification: a handler name and the hosts that notified it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingHandler {
    /// Handler name
    pub name: String,
    /// Hosts whose changed tasks notified this handler, in notification order
    pub hosts: Vec<String>,
}

#[derive(Debug, Default)]
struct QueueState {
    // handler name -> notifying hosts; insertion order is first-notified order
    pending: IndexMap<String, IndexSet<String>>,
}

/// Deduplicating, order-preserving handler notification queue.
///
/// Shared across per-host executors; interior mutability keeps notification
/// a cheap synchronous operation inside async task bodies.
#[derive(Debug, Default)]
pub struct HandlerQueue {
    state: Mutex<QueueState>,
}

impl HandlerQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `host` notified `handler`. Idempotent per (handler, host).
    pub fn notify(&self, handler: &str, host: &str) {
        let mut state = self.state.lock();
        state
            .pending
            .entry(handler.to_string())
            .or_default()
            .insert(host.to_string());
    }

    /// Whether any notification is pending
    pub fn has_pending(&self) -> bool {
        !self.state.lock().pending.is_empty()
    }

    /// Pending handler names in first-notified order, without draining
    pub fn pending_names(&self) -> Vec<String> {
        self.state.lock().pending.keys().cloned().collect()
    }

    /// Drain all pending notifications in first-notified order.
    ///
    /// After a drain the queue is empty; a failed handler run is not
    /// re-queued.
    pub fn drain(&self) -> Vec<PendingHandler> {
        let mut state = self.state.lock();
        std::mem::take(&mut state.pending)
            .into_iter()
            .map(|(name, hosts)| PendingHandler {
                name,
                hosts: hosts.into_iter().collect(),
            })
            .collect()
    }

    /// Drop all pending notifications (called between plays)
    pub fn reset(&self) {
        self.state.lock().pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_per_handler_and_host() {
        let queue = HandlerQueue::new();
        for _ in 0..5 {
            queue.notify("restart nginx", "web1");
        }
        queue.notify("restart nginx", "web2");

        let drained = queue.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].name, "restart nginx");
        assert_eq!(drained[0].hosts, vec!["web1", "web2"]);
        assert!(!queue.has_pending());
    }

    #[test]
    fn test_first_notified_order() {
        let queue = HandlerQueue::new();
        queue.notify("reload firewall", "web1");
        queue.notify("restart nginx", "web1");
        queue.notify("reload firewall", "web2");

        assert_eq!(
            queue.pending_names(),
            vec!["reload firewall", "restart nginx"]
        );
    }

    #[test]
    fn test_drain_empties_queue() {
        let queue = HandlerQueue::new();
        queue.notify("h", "web1");
        assert!(!queue.drain().is_empty());
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_reset_discards() {
        let queue = HandlerQueue::new();
        queue.notify("h", "web1");
        queue.reset();
        assert!(!queue.has_pending());
    }
}
