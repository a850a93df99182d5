//! Request Queue: a priority FIFO keyed by `(-priority, submitTs)`.
//!
//! Grounded on the `BinaryHeap` + monotonic sequence counter pattern used
//! elsewhere in this codebase for ordering events fairly within a priority
//! band; `seq` breaks ties when two requests share both priority and
//! millisecond-resolution `submit_ts`.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use dispatch_core::model::RequestState;

struct QueueEntry {
    priority: i32,
    submit_ts: i64,
    seq: u64,
    state: RequestState,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.submit_ts == other.submit_ts && self.seq == other.seq
    }
}
impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    /// Higher priority sorts first; among equal priorities, earlier
    /// `submit_ts` (then lower `seq`) sorts first — `BinaryHeap` is a
    /// max-heap, so "sorts first" means "compares greater".
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.submit_ts.cmp(&self.submit_ts))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Pending requests, ordered by priority then submission time.
#[derive(Default)]
pub struct RequestQueue {
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub fn enqueue(&mut self, state: RequestState) {
        let entry = QueueEntry {
            priority: state.spec.priority,
            submit_ts: state.submit_ts,
            seq: self.next_seq,
            state,
        };
        self.next_seq += 1;
        self.heap.push(entry);
    }

    /// Pop the single most eligible request, if any.
    pub fn dequeue_eligible(&mut self) -> Option<RequestState> {
        self.heap.pop().map(|entry| entry.state)
    }

    /// Remove a pending request by id. Returns `true` if it was found (and
    /// removed) in the queue; callers must separately check the in-flight
    /// map for ids no longer queued.
    pub fn cancel(&mut self, id: &str) -> bool {
        let before = self.heap.len();
        let remaining: Vec<QueueEntry> = self.heap.drain().filter(|e| e.state.spec.id != id).collect();
        let found = remaining.len() != before;
        self.heap = remaining.into_iter().collect();
        found
    }

    pub fn size(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// A read-only snapshot in priority order, without consuming the queue.
    pub fn snapshot(&self) -> Vec<RequestState> {
        let mut items: Vec<&QueueEntry> = self.heap.iter().collect();
        items.sort_by(|a, b| b.cmp(a));
        items.into_iter().map(|e| e.state.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_core::model::RequestSpec;

    fn state(id: &str, priority: i32, submit_ts: i64) -> RequestState {
        let mut spec = RequestSpec::new("hi").with_priority(priority);
        spec.id = id.to_string();
        spec.submit_ts = submit_ts;
        RequestState::new(spec)
    }

    #[test]
    fn higher_priority_dequeues_first() {
        let mut q = RequestQueue::new();
        q.enqueue(state("low", 0, 1));
        q.enqueue(state("high", 5, 2));
        assert_eq!(q.dequeue_eligible().unwrap().spec.id, "high");
        assert_eq!(q.dequeue_eligible().unwrap().spec.id, "low");
    }

    #[test]
    fn equal_priority_is_fifo_by_submit_ts() {
        let mut q = RequestQueue::new();
        q.enqueue(state("first", 0, 100));
        q.enqueue(state("second", 0, 200));
        assert_eq!(q.dequeue_eligible().unwrap().spec.id, "first");
        assert_eq!(q.dequeue_eligible().unwrap().spec.id, "second");
    }

    #[test]
    fn cancel_removes_from_queue() {
        let mut q = RequestQueue::new();
        q.enqueue(state("a", 0, 1));
        q.enqueue(state("b", 0, 2));
        assert!(q.cancel("a"));
        assert!(!q.cancel("a"));
        assert_eq!(q.size(), 1);
        assert_eq!(q.dequeue_eligible().unwrap().spec.id, "b");
    }

    #[test]
    fn snapshot_does_not_consume() {
        let mut q = RequestQueue::new();
        q.enqueue(state("a", 1, 1));
        q.enqueue(state("b", 2, 1));
        let snap = q.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(q.size(), 2);
        assert_eq!(snap[0].spec.id, "b");
    }
}
