//! Condition-variable event: lets consumers sleep instead of busy-polling.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::status::Status;

/// A signalable event.
///
/// `wait` may return spuriously without a matching `notify`; callers must
/// re-check their own condition after waking. The mailbox does exactly
/// that by re-polling its queue.
#[derive(Debug, Default)]
pub struct Event {
    mutex: Mutex<()>,
    cv: Condvar,
}

impl Event {
    pub fn new() -> Self {
        Event {
            mutex: Mutex::new(()),
            cv: Condvar::new(),
        }
    }

    /// Wait up to `timeout` for a signal.
    ///
    /// Returns [`Status::Timeout`] when the timeout elapsed and
    /// [`Status::Signaled`] otherwise (including spurious wakeups).
    pub fn wait_timeout(&self, timeout: Duration) -> Status {
        let mut guard = self.mutex.lock();
        if self.cv.wait_for(&mut guard, timeout).timed_out() {
            Status::Timeout
        } else {
            Status::Signaled
        }
    }

    /// Wait indefinitely for a signal. Spurious wakeups are possible.
    pub fn wait(&self) -> Status {
        let mut guard = self.mutex.lock();
        self.cv.wait(&mut guard);
        Status::Signaled
    }

    /// Wake every waiter.
    pub fn notify(&self) {
        self.cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn times_out_without_signal() {
        let event = Event::new();
        let start = Instant::now();
        let status = event.wait_timeout(Duration::from_millis(50));
        assert_eq!(status, Status::Timeout);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn notify_wakes_waiters() {
        let event = Arc::new(Event::new());
        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let event = event.clone();
                thread::spawn(move || event.wait_timeout(Duration::from_secs(5)))
            })
            .collect();
        // Give the waiters a chance to park before signaling.
        thread::sleep(Duration::from_millis(20));
        event.notify();
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), Status::Signaled);
        }
    }
}
