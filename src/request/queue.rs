//! Priority ordering and per-subscription coalescing for queued fetches
//! (spec §4.3 "Ordering": interactive > scheduled > background, FIFO within
//! a priority tier, and "at most one in-flight request per subscription").

use std::collections::{BinaryHeap, HashSet, VecDeque};

use crate::node::NodeId;
use crate::request::UpdateRequest;

/// Relative urgency of a queued request. Ordered so that
/// `Priority::Interactive > Priority::Scheduled > Priority::Background`
/// under `Ord`, matching a max-heap pop order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// Background maintenance fetches (favicon refresh, etc).
    Background,
    /// Due via the scheduler's normal tick.
    Scheduled,
    /// Explicit user-triggered refresh; jumps ahead of scheduled work.
    Interactive,
}

/// A request waiting to be dispatched, tagged with the node it updates.
#[derive(Debug, Clone)]
pub struct QueuedRequest {
    /// The owning node, used for in-flight coalescing and cancellation.
    pub node_id: NodeId,
    /// Fetch priority.
    pub priority: Priority,
    /// Monotonically increasing enqueue sequence, used to break priority
    /// ties in FIFO order.
    pub sequence: u64,
    /// The request to execute.
    pub request: UpdateRequest,
}

impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl Eq for QueuedRequest {}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedRequest {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Higher priority first; within a priority, earlier sequence (older)
        // first — so reverse the sequence comparison for the max-heap.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// A priority queue of pending fetches with per-subscription in-flight
/// coalescing (spec §4.3: "a node already in flight is not re-enqueued;
/// a repeat request coalesces into the in-flight one").
#[derive(Debug, Default)]
pub struct RequestQueue {
    heap: BinaryHeap<QueuedRequest>,
    queued_nodes: HashSet<NodeId>,
    in_flight: HashSet<NodeId>,
    next_sequence: u64,
    /// Nodes whose queued-but-not-yet-dispatched request should be dropped
    /// instead of sent (best-effort idempotent cancellation).
    cancelled: HashSet<NodeId>,
}

impl RequestQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues `request` for `node_id` at `priority`, unless that node
    /// already has a request queued or in flight.
    pub fn enqueue(&mut self, node_id: NodeId, priority: Priority, request: UpdateRequest) -> bool {
        if self.in_flight.contains(&node_id) || self.queued_nodes.contains(&node_id) {
            return false;
        }
        self.cancelled.remove(&node_id);
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.queued_nodes.insert(node_id);
        self.heap.push(QueuedRequest { node_id, priority, sequence, request });
        true
    }

    /// Requests cancellation of `node_id`'s pending (not yet dispatched)
    /// fetch. If it has already been popped for dispatch this is a no-op;
    /// cancellation is best-effort, not guaranteed (spec §4.3).
    pub fn cancel(&mut self, node_id: NodeId) {
        if self.queued_nodes.contains(&node_id) {
            self.cancelled.insert(node_id);
        }
    }

    /// Pops the highest-priority, oldest-enqueued request, skipping any
    /// that were cancelled while waiting. Marks the node in flight.
    pub fn dispatch_next(&mut self) -> Option<QueuedRequest> {
        loop {
            let next = self.heap.pop()?;
            self.queued_nodes.remove(&next.node_id);
            if self.cancelled.remove(&next.node_id) {
                continue;
            }
            self.in_flight.insert(next.node_id);
            return Some(next);
        }
    }

    /// Marks `node_id` as no longer in flight, allowing it to be enqueued
    /// again.
    pub fn complete(&mut self, node_id: NodeId) {
        self.in_flight.remove(&node_id);
    }

    /// Whether `node_id` currently has a request queued or in flight.
    #[must_use]
    pub fn is_busy(&self, node_id: NodeId) -> bool {
        self.in_flight.contains(&node_id) || self.queued_nodes.contains(&node_id)
    }

    /// Number of requests waiting to be dispatched (in flight not included).
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.heap.len()
    }
}

/// FIFO fallback list retained for callers that want simple drain order
/// without priority (unused by the scheduler itself, kept for node-source
/// edit-action style consumers that build their own ordering on top).
#[derive(Debug, Default)]
pub struct FifoQueue<T> {
    items: VecDeque<T>,
}

impl<T> FifoQueue<T> {
    /// Creates an empty FIFO queue.
    #[must_use]
    pub fn new() -> Self {
        Self { items: VecDeque::new() }
    }

    /// Appends to the tail.
    pub fn push_back(&mut self, item: T) {
        self.items.push_back(item);
    }

    /// Prepends to the head, jumping the normal FIFO order.
    pub fn push_front(&mut self, item: T) {
        self.items.push_front(item);
    }

    /// Removes and returns the head item.
    pub fn pop_front(&mut self) -> Option<T> {
        self.items.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_request(source: &str) -> UpdateRequest {
        UpdateRequest {
            source: source.to_string(),
            source_type: crate::subscription::SourceType::Http,
            options: crate::request::RequestOptions::default(),
            prior_etag: None,
            prior_last_modified: None,
            post_body: None,
            post_content_type: None,
            filter_cmd: None,
        }
    }

    #[test]
    fn higher_priority_dispatches_first() {
        let mut q = RequestQueue::new();
        q.enqueue(NodeId(1), Priority::Background, dummy_request("a"));
        q.enqueue(NodeId(2), Priority::Interactive, dummy_request("b"));
        let first = q.dispatch_next().unwrap();
        assert_eq!(first.node_id, NodeId(2));
    }

    #[test]
    fn same_priority_is_fifo() {
        let mut q = RequestQueue::new();
        q.enqueue(NodeId(1), Priority::Scheduled, dummy_request("a"));
        q.enqueue(NodeId(2), Priority::Scheduled, dummy_request("b"));
        assert_eq!(q.dispatch_next().unwrap().node_id, NodeId(1));
        assert_eq!(q.dispatch_next().unwrap().node_id, NodeId(2));
    }

    #[test]
    fn busy_node_is_not_double_enqueued() {
        let mut q = RequestQueue::new();
        assert!(q.enqueue(NodeId(1), Priority::Scheduled, dummy_request("a")));
        assert!(!q.enqueue(NodeId(1), Priority::Interactive, dummy_request("a2")));
        let popped = q.dispatch_next().unwrap();
        assert!(!q.enqueue(NodeId(1), Priority::Interactive, dummy_request("a3")));
        q.complete(popped.node_id);
        assert!(q.enqueue(NodeId(1), Priority::Interactive, dummy_request("a4")));
    }

    #[test]
    fn cancelled_request_is_skipped_on_dispatch() {
        let mut q = RequestQueue::new();
        q.enqueue(NodeId(1), Priority::Scheduled, dummy_request("a"));
        q.cancel(NodeId(1));
        assert!(q.dispatch_next().is_none());
    }
}
