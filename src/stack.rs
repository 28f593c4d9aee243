//! LIFO stack over the arena (Treiber variant).
//!
//! Structurally the stack is the arena's own free list pointed at user
//! data: a single tagged head word, nodes chained through their slot
//! links. No sentinel is needed: a null head means empty, and the
//! popped node is exclusively owned after the head CAS, so the value is
//! moved out only by its winner. The head counter is bumped on every
//! successful CAS, which is all the ABA protection the pop loop needs.

use core::marker::PhantomData;

use crate::addr::AddrTag;
use crate::arena::{Arena, ArenaOptions};
use crate::discipline::{Concurrent, ContainerLock, Discipline, LockFree};
use crate::slot::Slot;
use crate::status::Status;
use crate::sync::{spin_loop, AtomicU64, Ordering};

const DEFAULT_OPTIONS: ArenaOptions = ArenaOptions::new(1024, 1024, 0, 1024 / 3);

/// A multi-producer multi-consumer LIFO stack.
pub struct Stack<T: Send + 'static, D: Discipline = LockFree> {
    head: AtomicU64,
    arena: Arena<T>,
    lock: D::Lock,
    _kind: PhantomData<D>,
    /// Suppresses auto-Sync; re-granted below for concurrent disciplines.
    _marker: PhantomData<core::cell::Cell<()>>,
}

// SAFETY: same argument as for Queue: every shared field synchronizes
// itself; `Raw` is excluded via the Concurrent bound.
unsafe impl<T: Send + 'static, D: Concurrent> Sync for Stack<T, D> {}

impl<T: Send + 'static, D: Discipline> Stack<T, D> {
    /// Stack with the default arena geometry.
    pub fn new() -> Self {
        Self::with_options(DEFAULT_OPTIONS)
    }

    /// Stack over an arena with explicit geometry.
    pub fn with_options(opts: ArenaOptions) -> Self {
        Stack {
            head: AtomicU64::new(AddrTag::null().raw()),
            arena: Arena::with_options(opts),
            lock: D::Lock::default(),
            _kind: PhantomData,
            _marker: PhantomData,
        }
    }

    /// Number of stacked items. Racy under concurrency, exact at rest.
    pub fn len(&self) -> u32 {
        self.arena.len()
    }

    /// True when nothing is stacked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push `value` on top.
    ///
    /// [`Status::Failure`] means the node allocation failed; the stack is
    /// unchanged and the value is dropped.
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

    /// Pop the top item into `*out`.
    ///
    /// Returns [`Status::Empty`] without touching `out`, or the arena's
    /// verdict on the recycled node ([`Status::Success`] normally,
    /// [`Status::DoubleFree`] passed through verbatim).
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

    /// Drop every stacked item and release the arena's chunks. The stack
    /// is usable (and empty) afterwards.
    pub fn clear(&mut self) {
        self.head.store(AddrTag::null().raw(), Ordering::Relaxed);
        // Items still on the stack are IN_USE slots; the arena drops them.
        self.arena.clear();
    }

    /// Take the stack's lock. [`Status::NotImplemented`] for the raw and
    /// lock-free variants.
    pub fn lock(&self) -> Status {
        if D::Lock::PRESENT {
            self.lock.acquire();
            Status::Success
        } else {
            Status::NotImplemented
        }
    }

    /// Release the stack's lock taken by [`Stack::lock`].
    pub fn unlock(&self) -> Status {
        if D::Lock::PRESENT {
            self.lock.release();
            Status::Success
        } else {
            Status::NotImplemented
        }
    }

    fn push_exclusive(&self, value: T) -> Status {
        let node = match self.arena.allocate(value) {
            // SAFETY: the pointer came from our arena's slot payload.
            Ok(p) => unsafe { Slot::from_payload(p.as_ptr()) },
            Err(_) => return Status::Failure,
        };
        let head = AddrTag::from_raw(self.head.load(Ordering::Relaxed));
        // SAFETY: node is ours until published.
        unsafe {
            let link = (*node).load_link(Ordering::Relaxed);
            (*node).store_link(link.with_addr(head.ptr::<Slot<T>>()), Ordering::Relaxed);
        }
        self.head.store(head.with_addr(node).raw(), Ordering::Relaxed);
        Status::Success
    }

    fn take_exclusive(&self) -> Option<(T, Status)> {
        let head = AddrTag::from_raw(self.head.load(Ordering::Relaxed));
        let slot = head.ptr::<Slot<T>>();
        if slot.is_null() {
            return None;
        }
        // SAFETY: exclusive access; the node is live.
        let (value, status) = unsafe {
            let next = (*slot).load_link(Ordering::Relaxed);
            self.head
                .store(head.with_addr(next.ptr::<Slot<T>>()).raw(), Ordering::Relaxed);
            let value = core::ptr::read((*slot).payload_ptr());
            (value, self.arena.release_slot(slot, false))
        };
        Some((value, status))
    }

    fn push_lockfree(&self, value: T) -> Status {
        let node = match self.arena.allocate(value) {
            // SAFETY: the pointer came from our arena's slot payload.
            Ok(p) => unsafe { Slot::from_payload(p.as_ptr()) },
            Err(_) => return Status::Failure,
        };
        loop {
            let head = AddrTag::from_raw(self.head.load(Ordering::Acquire));
            // SAFETY: node is unpublished; only we write its link.
            unsafe {
                let link = (*node).load_link(Ordering::Relaxed);
                (*node).store_link(link.with_addr(head.ptr::<Slot<T>>()), Ordering::Release);
            }
            if self
                .head
                .compare_exchange_weak(
                    head.raw(),
                    head.with_addr(node).bump().raw(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return Status::Success;
            }
            spin_loop();
        }
    }

    fn take_lockfree(&self) -> Option<(T, Status)> {
        loop {
            let head = AddrTag::from_raw(self.head.load(Ordering::Acquire));
            let slot = head.ptr::<Slot<T>>();
            if slot.is_null() {
                return None;
            }
            // SAFETY: chunks outlive the stack; a stale read is caught by
            // the CAS below via the head counter.
            let next = unsafe { (*slot).load_link(Ordering::Acquire) };
            if self
                .head
                .compare_exchange_weak(
                    head.raw(),
                    head.with_addr(next.ptr::<Slot<T>>()).bump().raw(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                // SAFETY: the CAS made us the node's sole owner.
                let (value, status) = unsafe {
                    let value = core::ptr::read((*slot).payload_ptr());
                    (value, self.arena.release_slot(slot, false))
                };
                return Some((value, status));
            }
            spin_loop();
        }
    }
}

impl<T: Send + 'static, D: Discipline> Default for Stack<T, D> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::discipline::{Mutexed, Raw, SpinLocked};

    fn opts() -> ArenaOptions {
        ArenaOptions::new(8, 8, 0, 0)
    }

    #[test]
    fn lifo_order() {
        let stack: Stack<u64> = Stack::with_options(opts());
        for i in 1..=5 {
            assert_eq!(stack.push(i), Status::Success);
        }
        let mut v = 0u64;
        for expected in (1..=5).rev() {
            assert_eq!(stack.pop(&mut v), Status::Success);
            assert_eq!(v, expected);
        }
        assert_eq!(stack.pop(&mut v), Status::Empty);
    }

    #[test]
    fn variants_behave_alike() {
        fn exercise<D: Discipline>() {
            let stack: Stack<u64, D> = Stack::with_options(ArenaOptions::new(4, 4, 0, 0));
            for i in 0..6 {
                assert_eq!(stack.push(i), Status::Success);
            }
            assert_eq!(stack.len(), 6);
            let mut v = 0u64;
            for expected in (0..6).rev() {
                assert_eq!(stack.pop(&mut v), Status::Success);
                assert_eq!(v, expected);
            }
        }
        exercise::<Raw>();
        exercise::<Mutexed>();
        exercise::<SpinLocked>();
        exercise::<LockFree>();
    }

    #[test]
    fn lock_surface_matches_variant() {
        let raw: Stack<u64, Raw> = Stack::with_options(opts());
        assert_eq!(raw.lock(), Status::NotImplemented);
        let mutexed: Stack<u64, Mutexed> = Stack::with_options(opts());
        assert_eq!(mutexed.lock(), Status::Success);
        assert_eq!(mutexed.unlock(), Status::Success);
    }

    #[test]
    fn clear_drops_stacked_values() {
        use std::sync::atomic::{AtomicUsize, Ordering as StdOrdering};
        static DROPS: AtomicUsize = AtomicUsize::new(0);
        struct Counted;
        impl Drop for Counted {
            fn drop(&mut self) {
                DROPS.fetch_add(1, StdOrdering::SeqCst);
            }
        }

        let mut stack: Stack<Counted> = Stack::with_options(ArenaOptions::new(4, 4, 0, 0));
        let _ = stack.push(Counted);
        let _ = stack.push(Counted);
        stack.clear();
        assert_eq!(DROPS.load(StdOrdering::SeqCst), 2);
        assert!(stack.is_empty());
        assert_eq!(stack.push(Counted), Status::Success);
    }
}
