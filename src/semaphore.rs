//! Counting semaphore bounded by a compile-time maximum.
//!
//! Built on a blocking mutex + condition variable rather than atomics:
//! waiters are expected to sleep (the arena grower spends its life parked
//! here), so parking beats spinning.

use parking_lot::{Condvar, Mutex};

/// A counting semaphore whose count never exceeds `MAX`.
///
/// `release` above `MAX` is silently dropped, which makes a
/// [`BinarySemaphore`] collapse any number of pending wake requests into
/// one, which is the collapse the grower wants.
#[derive(Debug)]
pub struct CountingSemaphore<const MAX: u32> {
    count: Mutex<u32>,
    cv: Condvar,
}

impl<const MAX: u32> CountingSemaphore<MAX> {
    /// Create the semaphore with `initial` permits (`initial <= MAX`).
    pub fn new(initial: u32) -> Self {
        assert!(MAX > 0, "semaphore maximum must be positive");
        assert!(initial <= MAX, "initial count exceeds maximum");
        CountingSemaphore {
            count: Mutex::new(initial),
            cv: Condvar::new(),
        }
    }

    /// Block until a permit is available, then take it.
    pub fn acquire(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.cv.wait(&mut count);
        }
        *count -= 1;
    }

    /// Return a permit and wake one waiter. No-op at `MAX`.
    pub fn release(&self) {
        let mut count = self.count.lock();
        if *count < MAX {
            *count += 1;
            self.cv.notify_one();
        }
    }
}

/// One-permit semaphore.
pub type BinarySemaphore = CountingSemaphore<1>;
