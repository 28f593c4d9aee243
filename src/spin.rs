//! Spin mutex over one atomic boolean.
//!
//! In highly contended, short critical sections this beats a native mutex
//! by avoiding the syscall path entirely; the arena's chunk directory and
//! the spinlock container variants use it.

use crate::sync::{spin_loop, AtomicBool, Ordering};

/// A spin lock. `lock` busy-waits; there is no OS-level parking.
#[derive(Debug)]
pub struct SpinMutex {
    locked: AtomicBool,
}

impl Default for SpinMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl SpinMutex {
    pub fn new() -> Self {
        SpinMutex {
            locked: AtomicBool::new(false),
        }
    }

    /// Spin until the lock is acquired.
    #[inline]
    pub fn lock(&self) -> SpinGuard<'_> {
        while self.locked.swap(true, Ordering::Acquire) {
            spin_loop();
        }
        SpinGuard { mutex: self }
    }

    /// Single non-blocking attempt.
    #[inline]
    pub fn try_lock(&self) -> Option<SpinGuard<'_>> {
        if self.locked.swap(true, Ordering::Acquire) {
            None
        } else {
            Some(SpinGuard { mutex: self })
        }
    }

    /// Guard-free acquire for callers that pair lock/unlock manually
    /// (the container `lock`/`unlock` surface).
    #[inline]
    pub(crate) fn acquire(&self) {
        while self.locked.swap(true, Ordering::Acquire) {
            spin_loop();
        }
    }

    #[inline]
    pub(crate) fn release(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

/// RAII guard for [`SpinMutex`]; releases on drop.
#[derive(Debug)]
pub struct SpinGuard<'a> {
    mutex: &'a SpinMutex,
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        self.mutex.release();
    }
}
