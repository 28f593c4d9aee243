//! Fixed-width pointer lookup table with a null sentinel.
//!
//! Maps small instance indices back to live arena headers so a bare payload
//! pointer can find its owner. Registration scans linearly under a small
//! lock; that is fine because it only happens at arena construction and
//! teardown. Lookups are plain atomic loads and never take the lock.
//!
//! Tables live in the process-wide registry for the life of the process,
//! so they deliberately use std atomics even in loom builds; they are
//! never part of a modeled execution.

use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use parking_lot::Mutex;

/// Bounded array of `N` pointer entries; null marks an empty entry.
#[derive(Debug)]
pub struct FixedLookupTable<T, const N: usize> {
    entries: Box<[AtomicPtr<T>]>,
    lock: Mutex<()>,
}

impl<T, const N: usize> FixedLookupTable<T, N> {
    pub fn new() -> Self {
        assert!(N > 0, "table width must be positive");
        let entries = (0..N)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        FixedLookupTable {
            entries,
            lock: Mutex::new(()),
        }
    }

    /// Number of entries.
    pub const fn width(&self) -> usize {
        N
    }

    /// Claim the first empty entry for `value`. Returns its index, or
    /// `None` when all `N` entries are taken.
    pub fn add(&self, value: *mut T) -> Option<usize> {
        debug_assert!(!value.is_null());
        let _guard = self.lock.lock();
        for (ndx, entry) in self.entries.iter().enumerate() {
            if entry.load(Ordering::Acquire).is_null() {
                entry.store(value, Ordering::Release);
                return Some(ndx);
            }
        }
        None
    }

    /// Read entry `index`; null when empty or out of range.
    #[inline]
    pub fn get(&self, index: usize) -> *mut T {
        match self.entries.get(index) {
            Some(entry) => entry.load(Ordering::Acquire),
            None => ptr::null_mut(),
        }
    }

    /// Clear entry `index`. Returns false when out of range.
    pub fn reset_at(&self, index: usize) -> bool {
        let _guard = self.lock.lock();
        match self.entries.get(index) {
            Some(entry) => {
                entry.store(ptr::null_mut(), Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Clear every entry holding `value`. Returns true when at least one
    /// entry matched.
    pub fn reset_value(&self, value: *mut T) -> bool {
        let _guard = self.lock.lock();
        let mut any = false;
        for entry in self.entries.iter() {
            if entry.load(Ordering::Acquire) == value {
                entry.store(ptr::null_mut(), Ordering::Release);
                any = true;
            }
        }
        any
    }

    /// Clear every entry.
    pub fn reset(&self) {
        let _guard = self.lock.lock();
        for entry in self.entries.iter() {
            entry.store(ptr::null_mut(), Ordering::Release);
        }
    }
}

impl<T, const N: usize> Default for FixedLookupTable<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
