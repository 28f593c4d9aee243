//! Intrusive slot: one tagged link word followed by the payload.
//!
//! The link word is the whole story of a slot's life:
//!
//! - free: address = next free slot (or null), `IN_USE` clear
//! - live: `IN_USE` set; the address field belongs to whatever container
//!   the payload sits in (queue/stack next pointer, or null)
//!
//! In both states the counter field holds the owning arena's instance
//! index, written once when the chunk is initialized and never rewritten.
//! That is how `deallocate` finds the owner from a bare payload pointer.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;

use crate::addr::AddrTag;
use crate::sync::{AtomicU64, Ordering};

#[repr(C)]
pub(crate) struct Slot<T> {
    link: AtomicU64,
    payload: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    /// Byte offset of the payload within a slot; `deallocate` subtracts
    /// this to get back from a payload pointer to its slot.
    pub(crate) const PAYLOAD_OFFSET: usize = core::mem::offset_of!(Slot<T>, payload);

    /// Initialize a slot in place as free, linked to `next`.
    ///
    /// # Safety
    ///
    /// `at` must be valid for writes of `Slot<T>` and properly aligned.
    pub(crate) unsafe fn init_free(at: *mut Slot<T>, next: *mut Slot<T>, instance: u64) {
        let link = AddrTag::from_ptr(next).with_counter(instance);
        // SAFETY: caller guarantees `at` is writable and aligned.
        unsafe {
            at.write(Slot {
                link: AtomicU64::new(link.raw()),
                payload: UnsafeCell::new(MaybeUninit::uninit()),
            });
        }
    }

    #[inline]
    pub(crate) fn load_link(&self, order: Ordering) -> AddrTag {
        AddrTag::from_raw(self.link.load(order))
    }

    #[inline]
    pub(crate) fn store_link(&self, link: AddrTag, order: Ordering) {
        self.link.store(link.raw(), order);
    }

    #[inline]
    pub(crate) fn cas_link_weak(
        &self,
        current: AddrTag,
        new: AddrTag,
        success: Ordering,
        failure: Ordering,
    ) -> Result<AddrTag, AddrTag> {
        self.link
            .compare_exchange_weak(current.raw(), new.raw(), success, failure)
            .map(AddrTag::from_raw)
            .map_err(AddrTag::from_raw)
    }

    /// Pointer to the payload region.
    #[inline]
    pub(crate) fn payload_ptr(&self) -> *mut T {
        self.payload.get() as *mut T
    }

    /// Recover the slot pointer from a payload pointer.
    ///
    /// # Safety
    ///
    /// `payload` must point at the payload region of a live `Slot<T>`.
    #[inline]
    pub(crate) unsafe fn from_payload(payload: *mut T) -> *mut Slot<T> {
        // SAFETY: caller guarantees `payload` sits PAYLOAD_OFFSET bytes into
        // a slot, so the subtraction stays within the same allocation.
        unsafe { (payload as *mut u8).sub(Self::PAYLOAD_OFFSET) as *mut Slot<T> }
    }
}
