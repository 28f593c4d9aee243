//! Bounded MPMC ring buffer with per-slot status words.
//!
//! Producers and consumers first reserve a ticket by CAS-advancing the
//! monotonic write/read position (reduced modulo the capacity to find the
//! slot), then drive their slot through its status machine
//! (`Empty → BusyWrite → Full → BusyRead → Empty`). The full/empty checks
//! happen before the reservation, so a failed push or pop consumes
//! nothing and leaves every index untouched.
//!
//! A ticket holder may briefly spin waiting for the previous lap's peer
//! to clear its slot; that wait is bounded by the peer's progress. Push
//! fails only when the ring is full (and hands the value back), pop only
//! when it is empty.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;

use crossbeam_utils::CachePadded;

use crate::sync::{spin_loop, AtomicU32, AtomicU64, AtomicUsize, Ordering};

/// Slot states, in lifecycle order.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Empty = 0,
    BusyWrite = 1,
    Full = 2,
    BusyRead = 3,
}

struct RingSlot<T> {
    status: AtomicU32,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Fixed-capacity MPMC ring buffer of `N` slots.
pub struct RingBuffer<T, const N: usize> {
    slots: Box<[RingSlot<T>]>,
    /// Producer position (monotonic; slot = position % N).
    write: CachePadded<AtomicU64>,
    /// Consumer position (monotonic; slot = position % N).
    read: CachePadded<AtomicU64>,
    /// Population count; `len()` reads this.
    count: AtomicUsize,
}

// SAFETY: slot hand-off is synchronized by the per-slot status words;
// ticket reservation makes each (position, slot) pair single-owner.
unsafe impl<T: Send, const N: usize> Send for RingBuffer<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for RingBuffer<T, N> {}

impl<T, const N: usize> RingBuffer<T, N> {
    pub fn new() -> Self {
        assert!(N > 0, "capacity must be positive");
        let slots = (0..N)
            .map(|_| RingSlot {
                status: AtomicU32::new(SlotState::Empty as u32),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        RingBuffer {
            slots,
            write: CachePadded::new(AtomicU64::new(0)),
            read: CachePadded::new(AtomicU64::new(0)),
            count: AtomicUsize::new(0),
        }
    }

    /// Ring capacity.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Current population. Always within `0..=N`.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store `value` in the next write slot.
    ///
    /// `Err(value)` if and only if the ring is full; the indices are left
    /// untouched in that case.
    pub fn push(&self, value: T) -> Result<(), T> {
        // Reserve a ticket, or bail while the ring is full.
        let ticket = loop {
            let w = self.write.load(Ordering::Acquire);
            let r = self.read.load(Ordering::Acquire);
            if w.wrapping_sub(r) >= N as u64 {
                return Err(value);
            }
            if self
                .write
                .compare_exchange_weak(w, w.wrapping_add(1), Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                break w;
            }
            spin_loop();
        };

        let slot = &self.slots[(ticket % N as u64) as usize];
        // The previous lap's consumer may still be draining this slot;
        // its progress bounds the wait.
        while slot
            .status
            .compare_exchange_weak(
                SlotState::Empty as u32,
                SlotState::BusyWrite as u32,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            spin_loop();
        }
        // SAFETY: BusyWrite gives us exclusive slot access.
        unsafe { (*slot.value.get()).write(value) };
        slot.status.store(SlotState::Full as u32, Ordering::Release);
        self.count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Take the value from the next read slot.
    ///
    /// `None` if and only if the ring is empty (counting in-flight
    /// pushes whose tickets are already reserved); the indices are left
    /// untouched in that case.
    pub fn pop(&self) -> Option<T> {
        let ticket = loop {
            let r = self.read.load(Ordering::Acquire);
            let w = self.write.load(Ordering::Acquire);
            if r == w {
                return None;
            }
            if self
                .read
                .compare_exchange_weak(r, r.wrapping_add(1), Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                break r;
            }
            spin_loop();
        };

        let slot = &self.slots[(ticket % N as u64) as usize];
        // The producer holding this ticket's write may not have published
        // yet; its progress bounds the wait.
        while slot
            .status
            .compare_exchange_weak(
                SlotState::Full as u32,
                SlotState::BusyRead as u32,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            spin_loop();
        }
        // SAFETY: BusyRead gives us exclusive access to a Full slot.
        let value = unsafe { (*slot.value.get()).assume_init_read() };
        slot.status.store(SlotState::Empty as u32, Ordering::Release);
        self.count.fetch_sub(1, Ordering::AcqRel);
        Some(value)
    }
}

impl<T, const N: usize> Default for RingBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Drop for RingBuffer<T, N> {
    fn drop(&mut self) {
        // Exclusive access: drop whatever is still buffered.
        for slot in self.slots.iter() {
            if slot.status.load(Ordering::Acquire) == SlotState::Full as u32 {
                // SAFETY: Full slots hold an initialized value.
                unsafe { (*slot.value.get()).assume_init_drop() };
            }
        }
    }
}
