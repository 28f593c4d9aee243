//! FIFO queue over the arena.
//!
//! One generic implementation serves four compile-time variants selected
//! by a [`Discipline`] tag. The locked variants wrap the list
//! manipulation in their lock; the lock-free variant runs the Michael &
//! Scott protocol on tagged words.
//!
//! # Representation
//!
//! The list always starts with a sentinel node claimed from the arena at
//! construction. `head` points at the sentinel; the first real element is
//! the sentinel's successor; `tail` points at the last node (the sentinel
//! when empty). Popping moves the value out of the successor, swings
//! `head` to it, and recycles the old sentinel, so the node whose value
//! was just taken becomes the new sentinel. The sentinel's payload region
//! is therefore never initialized and is recycled without running a
//! destructor.
//!
//! Queue membership reuses the slot's own link word as the next pointer:
//! a node's link keeps `IN_USE` and its owner's instance index for the
//! whole time it sits in the queue, with the address field holding the
//! successor (null at the tail).
//!
//! # Lock-free protocol
//!
//! Head and tail are [`AddrTag`] words whose counters are bumped on every
//! successful CAS, which defeats ABA matches against recycled nodes.
//! Push links the new node onto the tail's link word, then swings `tail`;
//! a push that finds `tail` lagging helps swing it forward first. Pop is
//! linearized at the head CAS. A node's link word losing `IN_USE` means
//! the node went back to the free list; push re-reads the tail when it
//! sees that, instead of chasing a recycled link.

use core::marker::PhantomData;

use crate::addr::AddrTag;
use crate::arena::{Arena, ArenaOptions};
use crate::discipline::{Concurrent, ContainerLock, Discipline, LockFree};
use crate::slot::Slot;
use crate::status::Status;
use crate::sync::{spin_loop, AtomicU64, Ordering};

/// Arena geometry the original container defaults to.
const DEFAULT_OPTIONS: ArenaOptions = ArenaOptions::new(1024, 1024, 0, 1024 / 3);

/// A multi-producer multi-consumer FIFO queue.
///
/// Nodes come from a dedicated [`Arena`]; a push allocates one slot and a
/// pop recycles it, so a long-lived queue causes no global heap traffic
/// after warm-up.
pub struct Queue<T: Send + 'static, D: Discipline = LockFree> {
    head: AtomicU64,
    tail: AtomicU64,
    arena: Arena<T>,
    lock: D::Lock,
    _kind: PhantomData<D>,
    /// Suppresses auto-Sync; re-granted below for concurrent disciplines.
    _marker: PhantomData<core::cell::Cell<()>>,
}

// SAFETY: the queue's shared state is the two tagged words, the arena,
// and the discipline's lock, all of which synchronize themselves; `Raw`
// is excluded because it synchronizes nothing.
unsafe impl<T: Send + 'static, D: Concurrent> Sync for Queue<T, D> {}

impl<T: Send + 'static, D: Discipline> Queue<T, D> {
    /// Queue with the default arena geometry (1024-slot chunks, grower
    /// threshold at a third of a chunk).
    pub fn new() -> Self {
        Self::with_options(DEFAULT_OPTIONS)
    }

    /// Queue over an arena with explicit geometry.
    pub fn with_options(opts: ArenaOptions) -> Self {
        let arena = Arena::with_options(opts);
        let sentinel = arena
            .allocate_uninit()
            .expect("arena failed to reserve the initial chunk");
        let tag = AddrTag::from_ptr(sentinel);
        Queue {
            head: AtomicU64::new(tag.raw()),
            tail: AtomicU64::new(tag.raw()),
            arena,
            lock: D::Lock::default(),
            _kind: PhantomData,
            _marker: PhantomData,
        }
    }

    /// Number of queued items. Racy under concurrency, exact at rest.
    pub fn len(&self) -> u32 {
        // The sentinel is always live in the arena but never an item.
        self.arena.len().saturating_sub(1)
    }

    /// True when no item is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `value`.
    ///
    /// [`Status::Failure`] means the node allocation failed (size limit
    /// reached, or growth has not caught up; the latter is transient);
    /// the queue is unchanged and the value is dropped.
    pub fn push(&self, value: T) -> Status {
        if D::LOCK_FREE {
            self.push_lockfree(value)
        } else {
            self.lock.acquire();
            let status = self.push_exclusive(value);
            self.lock.release();
            status
        }
    }

    /// Remove the first item into `*out`.
    ///
    /// Returns [`Status::Empty`] without touching `out`, or the arena's
    /// verdict on the recycled node: normally [`Status::Success`], but a
    /// detected [`Status::DoubleFree`] is passed through verbatim.
    pub fn pop(&self, out: &mut T) -> Status {
        let taken = if D::LOCK_FREE {
            self.take_lockfree()
        } else {
            self.lock.acquire();
            let taken = self.take_exclusive();
            self.lock.release();
            taken
        };
        match taken {
            Some((value, status)) => {
                *out = value;
                status
            }
            None => Status::Empty,
        }
    }

    /// Drop every queued item and release the arena's chunks. The queue
    /// is usable (and empty) afterwards.
    pub fn clear(&mut self) {
        // Drain through the normal pop path so every node is recycled and
        // every value dropped.
        while let Some((value, _)) = self.take_exclusive() {
            drop(value);
        }
        // The sentinel's payload was never constructed; recycle the slot
        // without running a destructor before the arena tears down.
        let sentinel = AddrTag::from_raw(self.head.load(Ordering::Relaxed)).ptr::<Slot<T>>();
        // SAFETY: the sentinel is a live slot of our arena.
        let _ = unsafe { self.arena.release_slot(sentinel, false) };
        self.arena.clear();

        let sentinel = self
            .arena
            .allocate_uninit()
            .expect("arena failed to re-reserve after clear");
        let tag = AddrTag::from_ptr(sentinel);
        self.head.store(tag.raw(), Ordering::Relaxed);
        self.tail.store(tag.raw(), Ordering::Relaxed);
    }

    /// Take the queue's lock. [`Status::NotImplemented`] for the raw and
    /// lock-free variants, which have none.
    pub fn lock(&self) -> Status {
        if D::Lock::PRESENT {
            self.lock.acquire();
            Status::Success
        } else {
            Status::NotImplemented
        }
    }

    /// Release the queue's lock taken by [`Queue::lock`].
    pub fn unlock(&self) -> Status {
        if D::Lock::PRESENT {
            self.lock.release();
            Status::Success
        } else {
            Status::NotImplemented
        }
    }

    /// Exclusive-access push: used under the discipline lock and by `Raw`.
    fn push_exclusive(&self, value: T) -> Status {
        let node = match self.arena.allocate(value) {
            // SAFETY: the pointer came from our arena's slot payload.
            Ok(p) => unsafe { Slot::from_payload(p.as_ptr()) },
            Err(_) => return Status::Failure,
        };
        let tail = AddrTag::from_raw(self.tail.load(Ordering::Relaxed));
        let tail_slot = tail.ptr::<Slot<T>>();
        // SAFETY: tail always points at a live node (the sentinel at rest).
        unsafe {
            let link = (*tail_slot).load_link(Ordering::Relaxed);
            (*tail_slot).store_link(link.with_addr(node), Ordering::Relaxed);
        }
        self.tail.store(tail.with_addr(node).raw(), Ordering::Relaxed);
        Status::Success
    }

    /// Exclusive-access pop.
    fn take_exclusive(&self) -> Option<(T, Status)> {
        let head = AddrTag::from_raw(self.head.load(Ordering::Relaxed));
        let head_slot = head.ptr::<Slot<T>>();
        // SAFETY: head always points at the live sentinel.
        let next = unsafe { (*head_slot).load_link(Ordering::Relaxed) };
        let next_slot = next.ptr::<Slot<T>>();
        if next_slot.is_null() {
            return None;
        }
        // SAFETY: next is a live queued node; we have exclusive access.
        let value = unsafe { core::ptr::read((*next_slot).payload_ptr()) };
        self.head.store(head.with_addr(next_slot).raw(), Ordering::Relaxed);
        // SAFETY: the old sentinel is ours to recycle; its payload was
        // moved out when it was popped (or never built, for the original
        // sentinel), so it must not be dropped.
        let status = unsafe { self.arena.release_slot(head_slot, false) };
        Some((value, status))
    }

    fn push_lockfree(&self, value: T) -> Status {
        let node = match self.arena.allocate(value) {
            // SAFETY: the pointer came from our arena's slot payload.
            Ok(p) => unsafe { Slot::from_payload(p.as_ptr()) },
            Err(_) => return Status::Failure,
        };
        loop {
            let tail = AddrTag::from_raw(self.tail.load(Ordering::Acquire));
            let tail_slot = tail.ptr::<Slot<T>>();
            // SAFETY: chunks are never released while the queue lives, so
            // the read hits valid memory even if the node was recycled.
            let next = unsafe { (*tail_slot).load_link(Ordering::Acquire) };
            if !next.test_flag(AddrTag::IN_USE) {
                // The node behind our tail snapshot went back to the free
                // list; the snapshot is stale.
                spin_loop();
                continue;
            }
            if !next.is_null() {
                // Tail is lagging behind the real last node; help it
                // forward and retry.
                let _ = self.tail.compare_exchange_weak(
                    tail.raw(),
                    tail.with_addr(next.ptr::<Slot<T>>()).bump().raw(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                continue;
            }
            // SAFETY: as above; a stale expected value makes the CAS fail.
            if unsafe {
                (*tail_slot)
                    .cas_link_weak(next, next.with_addr(node), Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            } {
                // Linearization point. Swing tail; losing this CAS only
                // means another thread already helped.
                let _ = self.tail.compare_exchange(
                    tail.raw(),
                    tail.with_addr(node).bump().raw(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                return Status::Success;
            }
            spin_loop();
        }
    }

    fn take_lockfree(&self) -> Option<(T, Status)> {
        loop {
            let head = AddrTag::from_raw(self.head.load(Ordering::Acquire));
            let tail = AddrTag::from_raw(self.tail.load(Ordering::Acquire));
            let head_slot = head.ptr::<Slot<T>>();
            // SAFETY: valid memory as in push; staleness is caught by the
            // head CAS below.
            let next = unsafe { (*head_slot).load_link(Ordering::Acquire) };
            let next_slot = next.ptr::<Slot<T>>();

            if head.ptr::<Slot<T>>() == tail.ptr::<Slot<T>>() {
                if next_slot.is_null() {
                    return None;
                }
                // A push linked a node but has not swung tail yet; help.
                let _ = self.tail.compare_exchange_weak(
                    tail.raw(),
                    tail.with_addr(next_slot).bump().raw(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                continue;
            }
            if next_slot.is_null() {
                // Inconsistent snapshot (head moved under us).
                spin_loop();
                continue;
            }

            // Speculative read, kept as MaybeUninit until the CAS proves
            // the snapshot was current: a racing pop may have recycled the
            // node, making these bytes anything at all.
            // SAFETY: next_slot addresses valid slot memory either way.
            let value = unsafe {
                core::ptr::read((*next_slot).payload_ptr().cast::<core::mem::MaybeUninit<T>>())
            };
            if self
                .head
                .compare_exchange_weak(
                    head.raw(),
                    head.with_addr(next_slot).bump().raw(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                // SAFETY: winning the CAS means the snapshot was coherent,
                // so `value` is the initialized payload; the old sentinel
                // is exclusively ours and its own payload was moved out
                // long ago (or never existed), so no destructor runs.
                let (value, status) = unsafe {
                    (value.assume_init(), self.arena.release_slot(head_slot, false))
                };
                return Some((value, status));
            }
            // Losing the CAS discards the MaybeUninit without a drop.
            spin_loop();
        }
    }
}

impl<T: Send + 'static, D: Discipline> Default for Queue<T, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static, D: Discipline> Drop for Queue<T, D> {
    fn drop(&mut self) {
        while let Some((value, _)) = self.take_exclusive() {
            drop(value);
        }
        let sentinel = AddrTag::from_raw(self.head.load(Ordering::Relaxed)).ptr::<Slot<T>>();
        if !sentinel.is_null() {
            // SAFETY: the sentinel is live and its payload uninitialized;
            // recycle without dropping before the arena tears down.
            let _ = unsafe { self.arena.release_slot(sentinel, false) };
        }
    }
}
