//! Request correlation and admission scheduling.
//!
//! The hub answers requests in whatever order it pleases, so replies are
//! matched strictly by identifier: the engine keeps one single-resolution
//! completion slot per in-flight request. Admission is FIFO under a fixed cap
//! on concurrently pending requests; each completion frees a slot and lets
//! the queue head advance.
//!
//! The engine is a plain state machine with no I/O of its own; the
//! [`Connection`](crate::connection::Connection) serializes access to it and
//! performs the actual transmits.

use crate::error::ClientError;
use hublink_protocol::message::{generate_id, Request};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use tokio::sync::oneshot;

/// Default bound on concurrently in-flight requests.
pub const MAX_INFLIGHT_REQUESTS: usize = 12;

/// Resolves one caller: result on a matching response, error on a matching
/// error reply, transmit failure, deadline expiry, or close.
pub(crate) type ReplySlot = oneshot::Sender<Result<Value, ClientError>>;

/// A request parked until capacity frees up. FIFO.
struct QueuedRequest {
    request: Request,
    slot: ReplySlot,
}

/// Outcome of submitting a request.
pub(crate) enum Admission {
    /// Admitted and registered as pending; the caller must transmit it now.
    Transmit(Request),
    /// Capacity reached; parked in the queue under the returned identifier.
    Queued(String),
}

pub(crate) struct CorrelationEngine {
    max_inflight: usize,
    pending: HashMap<String, ReplySlot>,
    queue: VecDeque<QueuedRequest>,
}

impl CorrelationEngine {
    pub fn new(max_inflight: usize) -> Self {
        Self {
            max_inflight,
            pending: HashMap::new(),
            queue: VecDeque::new(),
        }
    }

    /// Submits a request for admission.
    ///
    /// The identifier is regenerated until unique among pending and queued
    /// requests, then the request is either admitted (registered as pending,
    /// ready to transmit) or parked at the queue tail.
    pub fn submit(&mut self, mut request: Request, slot: ReplySlot) -> Admission {
        while self.knows_id(&request.id) {
            request.id = generate_id();
        }
        if self.pending.len() < self.max_inflight {
            self.pending.insert(request.id.clone(), slot);
            Admission::Transmit(request)
        } else {
            let id = request.id.clone();
            self.queue.push_back(QueuedRequest { request, slot });
            Admission::Queued(id)
        }
    }

    /// Takes the completion slot for `id`, freeing its in-flight capacity.
    /// Returns `None` for replies with no pending request.
    pub fn complete(&mut self, id: &str) -> Option<ReplySlot> {
        self.pending.remove(id)
    }

    /// Admits the queue head if capacity allows.
    ///
    /// The returned request is already registered as pending; the caller must
    /// transmit it (or [`abort`](Self::abort) it on transmit failure).
    pub fn admit_next(&mut self) -> Option<Request> {
        if self.pending.len() >= self.max_inflight {
            return None;
        }
        let queued = self.queue.pop_front()?;
        self.pending.insert(queued.request.id.clone(), queued.slot);
        Some(queued.request)
    }

    /// Removes a request wherever it currently sits (pending or queued) and
    /// returns its slot. Used on transmit failure and deadline expiry.
    pub fn abort(&mut self, id: &str) -> Option<ReplySlot> {
        if let Some(slot) = self.pending.remove(id) {
            return Some(slot);
        }
        let pos = self.queue.iter().position(|q| q.request.id == id)?;
        self.queue.remove(pos).map(|q| q.slot)
    }

    /// Drains every pending and queued slot. Used on close and reader EOF.
    pub fn reject_all(&mut self) -> Vec<ReplySlot> {
        self.pending
            .drain()
            .map(|(_, slot)| slot)
            .chain(self.queue.drain(..).map(|q| q.slot))
            .collect()
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    fn knows_id(&self, id: &str) -> bool {
        self.pending.contains_key(id) || self.queue.iter().any(|q| q.request.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(id: &str) -> Request {
        Request::new("get_hub_info", json!({})).with_id(id)
    }

    fn slot() -> ReplySlot {
        oneshot::channel().0
    }

    #[test]
    fn test_admits_until_cap_then_queues() {
        let mut engine = CorrelationEngine::new(2);
        assert!(matches!(
            engine.submit(request("a"), slot()),
            Admission::Transmit(_)
        ));
        assert!(matches!(
            engine.submit(request("b"), slot()),
            Admission::Transmit(_)
        ));
        assert!(matches!(
            engine.submit(request("c"), slot()),
            Admission::Queued(_)
        ));
        assert_eq!(engine.in_flight(), 2);
        assert_eq!(engine.queued(), 1);
    }

    #[test]
    fn test_cap_never_exceeded() {
        let mut engine = CorrelationEngine::new(12);
        for n in 0..14 {
            engine.submit(request(&format!("r{n}")), slot());
        }
        assert_eq!(engine.in_flight(), 12);
        assert_eq!(engine.queued(), 2);
        assert!(engine.admit_next().is_none());
    }

    #[test]
    fn test_completion_drains_fifo() {
        let mut engine = CorrelationEngine::new(1);
        engine.submit(request("a"), slot());
        engine.submit(request("b"), slot());
        engine.submit(request("c"), slot());

        assert!(engine.complete("a").is_some());
        let admitted = engine.admit_next().unwrap();
        assert_eq!(admitted.id, "b");
        // at cap again; "c" stays queued
        assert!(engine.admit_next().is_none());
        assert_eq!(engine.queued(), 1);

        assert!(engine.complete("b").is_some());
        assert_eq!(engine.admit_next().unwrap().id, "c");
        assert_eq!(engine.queued(), 0);
    }

    #[test]
    fn test_unknown_id_completes_nothing() {
        let mut engine = CorrelationEngine::new(2);
        engine.submit(request("a"), slot());
        assert!(engine.complete("nope").is_none());
        assert_eq!(engine.in_flight(), 1);
    }

    #[test]
    fn test_colliding_id_regenerated() {
        let mut engine = CorrelationEngine::new(4);
        let Admission::Transmit(first) = engine.submit(request("dup"), slot()) else {
            panic!("expected admission");
        };
        let Admission::Transmit(second) = engine.submit(request("dup"), slot()) else {
            panic!("expected admission");
        };
        assert_eq!(first.id, "dup");
        assert_ne!(second.id, "dup");
        assert_eq!(engine.in_flight(), 2);
    }

    #[test]
    fn test_abort_from_pending_and_queue() {
        let mut engine = CorrelationEngine::new(1);
        engine.submit(request("a"), slot());
        engine.submit(request("b"), slot());

        assert!(engine.abort("b").is_some());
        assert_eq!(engine.queued(), 0);
        assert!(engine.abort("a").is_some());
        assert_eq!(engine.in_flight(), 0);
        assert!(engine.abort("a").is_none());
    }

    #[test]
    fn test_reject_all_clears_everything() {
        let mut engine = CorrelationEngine::new(1);
        engine.submit(request("a"), slot());
        engine.submit(request("b"), slot());
        engine.submit(request("c"), slot());

        let slots = engine.reject_all();
        assert_eq!(slots.len(), 3);
        assert_eq!(engine.in_flight(), 0);
        assert_eq!(engine.queued(), 0);
    }
}
