//! Fan-out over `K` independent lock-free queues.
//!
//! Producers can name a sub-queue explicitly or let a thread-id registry
//! route them: each thread gets a stable sequential id on first contact,
//! taken modulo `K`. Consumers either name a sub-queue or take the next
//! one from a round-robin cursor. Ordering is FIFO per sub-queue only;
//! there is no total order across sub-queues.

use std::collections::HashMap;
use std::thread::ThreadId;

use parking_lot::Mutex;

use crate::arena::ArenaOptions;
use crate::queue::Queue;
use crate::status::Status;
use crate::sync::{AtomicUsize, Ordering};

const DEFAULT_OPTIONS: ArenaOptions = ArenaOptions::new(64, 64, 0, 0);

/// Hands out stable sequential ids per thread.
#[derive(Debug, Default)]
struct ThreadRegistry {
    map: Mutex<HashMap<ThreadId, usize>>,
}

impl ThreadRegistry {
    fn id(&self) -> usize {
        let tid = std::thread::current().id();
        let mut map = self.map.lock();
        let next = map.len();
        *map.entry(tid).or_insert(next)
    }
}

/// `K` lock-free queues with routed push and round-robin pop.
pub struct MultiQueue<T: Send + 'static, const K: usize> {
    queues: [Queue<T>; K],
    cursor: AtomicUsize,
    threads: ThreadRegistry,
}

impl<T: Send + 'static, const K: usize> MultiQueue<T, K> {
    /// Multi-queue with the default per-queue geometry (64-slot chunks,
    /// inline growth).
    pub fn new() -> Self {
        Self::with_options(DEFAULT_OPTIONS)
    }

    /// Multi-queue whose sub-queues share explicit arena geometry.
    pub fn with_options(opts: ArenaOptions) -> Self {
        assert!(K > 0, "at least one sub-queue is required");
        MultiQueue {
            queues: core::array::from_fn(|_| Queue::with_options(opts)),
            cursor: AtomicUsize::new(0),
            threads: ThreadRegistry::default(),
        }
    }

    /// The sub-queue id the calling thread routes to.
    pub fn queue_id(&self) -> usize {
        self.threads.id() % K
    }

    /// Push to the calling thread's sub-queue.
    pub fn push(&self, value: T) -> Status {
        self.push_to(self.queue_id(), value)
    }

    /// Push to sub-queue `id`.
    ///
    /// # Panics
    ///
    /// Panics when `id >= K`.
    pub fn push_to(&self, id: usize, value: T) -> Status {
        self.queues[id].push(value)
    }

    /// Pop from the sub-queue under the round-robin cursor, advancing the
    /// cursor by one. A miss on that one sub-queue reports
    /// [`Status::Empty`] even if others hold items; callers cycle.
    pub fn pop(&self, out: &mut T) -> Status {
        let ndx = self.cursor.fetch_add(1, Ordering::AcqRel) % K;
        self.queues[ndx].pop(out)
    }

    /// Pop from sub-queue `id`.
    ///
    /// # Panics
    ///
    /// Panics when `id >= K`.
    pub fn pop_from(&self, id: usize, out: &mut T) -> Status {
        self.queues[id].pop(out)
    }

    /// Total items across all sub-queues.
    pub fn len(&self) -> u32 {
        self.queues.iter().map(Queue::len).sum()
    }

    /// Items in sub-queue `id`.
    pub fn len_of(&self, id: usize) -> u32 {
        self.queues[id].len()
    }

    /// True when every sub-queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all queued items across all sub-queues.
    pub fn clear(&mut self) {
        for queue in self.queues.iter_mut() {
            queue.clear();
        }
    }
}

impl<T: Send + 'static, const K: usize> Default for MultiQueue<T, K> {
    fn default() -> Self {
        Self::new()
    }
}
