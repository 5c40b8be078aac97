//! Shared media buffer queue: one producer, many independent consumers.
//!
//! A demuxer or live ingest thread owns a [`Producer`] and appends packets;
//! every RTP session holds a [`Consumer`] and walks the same sequence at its
//! own pace. An element stays in the queue until the slowest attached
//! consumer has advanced past it, at which point its payload is dropped —
//! exactly once, no matter how many consumers read it.
//!
//! Consumers attach at the tail: a consumer only ever observes elements
//! enqueued *after* its attachment, in enqueue order. Positions never move
//! backwards.
//!
//! All operations are callable from any thread. A single mutex per queue
//! guards the element list, sequence counter, consumer count, and
//! per-element owed-counts; a condvar wakes consumers parked in
//! [`Consumer::wait_timeout`] on every put and when the producer goes away.
//!
//! ```
//! use rivulet::queue::Producer;
//!
//! let producer = Producer::new();
//! let mut consumer = producer.subscribe();
//!
//! producer.put("packet");
//! assert_eq!(consumer.unseen(), 1);
//! assert_eq!(*consumer.get().unwrap(), "packet");
//! assert!(!consumer.advance()); // nothing further queued yet
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

struct Element<T> {
    seq: u64,
    payload: Arc<T>,
    /// Attached consumers that have not yet advanced past this element.
    /// Fixed to the consumer count at put time, decremented as they pass.
    owed: usize,
}

struct State<T> {
    /// Elements with contiguous sequence numbers; reaped from the front
    /// once fully seen. For any two queued elements, the older one is owed
    /// by a superset of the consumers owing the newer one, so a zero owed
    /// count can only appear as a prefix.
    elements: VecDeque<Element<T>>,
    /// Sequence number the next put will be assigned.
    next_seq: u64,
    /// Currently attached consumers.
    consumers: usize,
    /// Set when the producer handle is dropped.
    closed: bool,
}

impl<T> State<T> {
    /// Drop the fully-seen prefix. Payload `Drop` runs here (or later, if a
    /// reader still holds the `Arc` returned by a `get`).
    fn reap(&mut self) {
        while let Some(front) = self.elements.front() {
            if front.owed > 0 {
                break;
            }
            self.elements.pop_front();
        }
    }
}

struct Shared<T> {
    state: Mutex<State<T>>,
    available: Condvar,
}

/// Write half of the queue. Single-owner: dropping it finalizes the queue
/// and signals end-of-stream to every consumer.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
}

/// Read cursor over a [`Producer`]'s element sequence.
///
/// Dropping a consumer counts as advancing past everything it still owed,
/// so a slow session going away never pins elements in memory.
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
    /// Sequence number of the next element this consumer will read.
    position: u64,
}

impl<T> Producer<T> {
    /// Create an empty queue with no consumers attached.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    elements: VecDeque::new(),
                    next_seq: 0,
                    consumers: 0,
                    closed: false,
                }),
                available: Condvar::new(),
            }),
        }
    }

    /// Append a payload as the next element and wake parked consumers.
    ///
    /// The queue takes ownership; the payload is dropped once the last
    /// consumer attached at this point has advanced past it. With no
    /// consumers attached the element is released immediately — a consumer
    /// attaching later would never observe it anyway.
    pub fn put(&self, payload: T) {
        let mut state = self.shared.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        let owed = state.consumers;
        state.elements.push_back(Element {
            seq,
            payload: Arc::new(payload),
            owed,
        });
        state.reap();
        drop(state);
        self.shared.available.notify_all();
    }

    /// Attach a new consumer positioned at the tail: it observes only
    /// elements put after this call.
    pub fn subscribe(&self) -> Consumer<T> {
        let mut state = self.shared.state.lock();
        state.consumers += 1;
        Consumer {
            shared: Arc::clone(&self.shared),
            position: state.next_seq,
        }
    }

    /// Number of elements currently retained in the queue.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().elements.len()
    }

    /// Number of consumers currently attached.
    pub fn consumer_count(&self) -> usize {
        self.shared.state.lock().consumers
    }
}

impl<T> Default for Producer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Producer<T> {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.closed = true;
        drop(state);
        // Parked consumers must observe end-of-stream.
        self.shared.available.notify_all();
    }
}

impl<T> Consumer<T> {
    /// Non-destructive read of the element at the current position.
    ///
    /// Returns `None` when the consumer is past the last queued element,
    /// whether the producer is still live or already gone; use
    /// [`is_closed`](Self::is_closed) to tell the two apart.
    pub fn get(&self) -> Option<Arc<T>> {
        let state = self.shared.state.lock();
        if self.position >= state.next_seq {
            return None;
        }
        let front_seq = state.elements.front().map(|e| e.seq)?;
        let index = (self.position - front_seq) as usize;
        Some(Arc::clone(&state.elements[index].payload))
    }

    /// Advance past the current element, releasing it if this consumer was
    /// the last one owing it. Returns whether a next element is already
    /// available. A no-op (returning `false`) when already at the tail.
    pub fn advance(&mut self) -> bool {
        let mut state = self.shared.state.lock();
        if self.position >= state.next_seq {
            return false;
        }
        if let Some(front_seq) = state.elements.front().map(|e| e.seq) {
            let index = (self.position - front_seq) as usize;
            state.elements[index].owed -= 1;
            self.position += 1;
            state.reap();
        }
        self.position < state.next_seq
    }

    /// Number of elements at sequence positions at or after this consumer's.
    ///
    /// Grows by exactly one per put and never grows between
    /// [`advance`](Self::advance) calls without an intervening put.
    pub fn unseen(&self) -> usize {
        let state = self.shared.state.lock();
        (state.next_seq - self.position) as usize
    }

    /// Park until an element is available at the current position, the
    /// producer goes away, or the timeout elapses. Returns whether an
    /// element is now readable.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut state = self.shared.state.lock();
        while self.position >= state.next_seq && !state.closed {
            if self
                .shared
                .available
                .wait_for(&mut state, timeout)
                .timed_out()
            {
                break;
            }
        }
        self.position < state.next_seq
    }

    /// True once the producer is gone and every remaining element has been
    /// read: no further `get` will ever succeed.
    pub fn is_closed(&self) -> bool {
        let state = self.shared.state.lock();
        state.closed && self.position >= state.next_seq
    }
}

impl<T> Drop for Consumer<T> {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        // Detaching counts as advancing past everything still owed.
        if let Some(front_seq) = state.elements.front().map(|e| e.seq) {
            let start = self.position.max(front_seq);
            let from = (start - front_seq) as usize;
            for element in state.elements.iter_mut().skip(from) {
                element.owed -= 1;
            }
        }
        state.consumers -= 1;
        state.reap();
    }
}
