//! Request table: outstanding caller ids mapped to pending completions.
//!
//! An entry is either pending or absent; there is no retained "done"
//! state. [`PendingCalls::take`] removes the entry as it hands the
//! completion out, which is what enforces at-most-once delivery.

use std::collections::HashMap;

use tokio::sync::oneshot;

use super::Payload;
use crate::protocol::RpcError;

/// What a completed call resolves to.
pub type CallOutcome = Result<Payload, RpcError>;

/// One-shot channel delivering a call outcome to the waiting caller.
pub type Completion = oneshot::Sender<CallOutcome>;

/// Map of in-flight request ids to their completions.
#[derive(Debug, Default)]
pub struct PendingCalls {
    entries: HashMap<u32, Completion>,
}

impl PendingCalls {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a completion for `id`. Ids are unique per session, so a
    /// collision means the allocator rolled all the way over into a live
    /// request; the older entry is dropped.
    pub fn insert(&mut self, id: u32, completion: Completion) {
        if self.entries.insert(id, completion).is_some() {
            tracing::warn!(id, "request id reused while still pending");
        }
    }

    /// Remove and return the completion for `id`, if any.
    pub fn take(&mut self, id: u32) -> Option<Completion> {
        self.entries.remove(&id)
    }

    /// Number of in-flight requests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether no requests are in flight.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check whether `id` has a pending completion.
    pub fn contains(&self, id: u32) -> bool {
        self.entries.contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_and_take() {
        let mut pending = PendingCalls::new();
        let (tx, mut rx) = oneshot::channel();

        pending.insert(2, tx);
        assert!(pending.contains(2));
        assert_eq!(pending.len(), 1);

        let completion = pending.take(2).unwrap();
        assert!(pending.is_empty());

        completion.send(Ok(Payload::Json(json!(3)))).unwrap();
        assert!(matches!(rx.try_recv(), Ok(Ok(Payload::Json(_)))));
    }

    #[test]
    fn test_take_is_at_most_once() {
        let mut pending = PendingCalls::new();
        let (tx, _rx) = oneshot::channel();

        pending.insert(4, tx);
        assert!(pending.take(4).is_some());
        assert!(pending.take(4).is_none());
    }

    #[test]
    fn test_take_unknown_id() {
        let mut pending = PendingCalls::new();
        assert!(pending.take(99).is_none());
    }

    #[test]
    fn test_send_to_abandoned_caller_is_silent() {
        let mut pending = PendingCalls::new();
        let (tx, rx) = oneshot::channel();
        pending.insert(6, tx);

        // Caller walked away before the reply arrived.
        drop(rx);

        let completion = pending.take(6).unwrap();
        assert!(completion.send(Ok(Payload::Json(json!(null)))).is_err());
    }
}
