//! Mailbox: a queue paired with an event so consumers can sleep.
//!
//! Producers go through the lock-free queue and ring the event;
//! consumers only wait when the queue looks empty, and re-check it after
//! every wakeup (the event allows spurious wakeups, so the pop result is
//! what decides).

use std::time::Duration;

use crate::arena::ArenaOptions;
use crate::event::Event;
use crate::queue::Queue;
use crate::status::Status;

const DEFAULT_OPTIONS: ArenaOptions = ArenaOptions::new(1024, 1024, 0, 1024 / 3);

/// A named queue that consumers can block on.
pub struct Mailbox<T: Send + 'static> {
    name: String,
    queue: Queue<T>,
    event: Event,
}

impl<T: Send + 'static> Mailbox<T> {
    /// Mailbox with the default queue geometry.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_options(name, DEFAULT_OPTIONS)
    }

    /// Mailbox whose queue arena uses explicit geometry.
    pub fn with_options(name: impl Into<String>, opts: ArenaOptions) -> Self {
        Mailbox {
            name: name.into(),
            queue: Queue::with_options(opts),
            event: Event::new(),
        }
    }

    /// The mailbox name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of pending messages.
    pub fn len(&self) -> u32 {
        self.queue.len()
    }

    /// True when no message is pending.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Deliver `value` and wake any waiting reader.
    pub fn write(&self, value: T) -> Status {
        let status = self.queue.push(value);
        if status == Status::Success {
            self.event.notify();
        }
        status
    }

    /// Read one message into `*out`, waiting up to `timeout` when the
    /// mailbox is empty.
    ///
    /// [`Status::Timeout`] consumes nothing. After a wakeup the pop speaks
    /// for itself: a racing reader may still leave us with
    /// [`Status::Empty`].
    pub fn read(&self, out: &mut T, timeout: Duration) -> Status {
        if self.is_empty() {
            if self.event.wait_timeout(timeout) == Status::Timeout {
                return Status::Timeout;
            }
        }
        self.queue.pop(out)
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn opts() -> ArenaOptions {
        ArenaOptions::new(8, 8, 0, 0)
    }

    #[test]
    fn write_then_read() {
        let mailbox: Mailbox<u64> = Mailbox::with_options("jobs", opts());
        assert_eq!(mailbox.name(), "jobs");
        assert_eq!(mailbox.write(42), Status::Success);
        assert_eq!(mailbox.len(), 1);

        let mut v = 0u64;
        assert_eq!(mailbox.read(&mut v, Duration::from_millis(10)), Status::Success);
        assert_eq!(v, 42);
        assert!(mailbox.is_empty());
    }

    #[test]
    fn read_empty_times_out() {
        let mailbox: Mailbox<u64> = Mailbox::with_options("idle", opts());
        let start = Instant::now();
        let mut v = 0u64;
        assert_eq!(mailbox.read(&mut v, Duration::from_millis(60)), Status::Timeout);
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn write_wakes_a_blocked_reader() {
        let mailbox: Arc<Mailbox<u64>> = Arc::new(Mailbox::with_options("wake", opts()));
        let reader = {
            let mailbox = mailbox.clone();
            thread::spawn(move || {
                let mut v = 0u64;
                let status = mailbox.read(&mut v, Duration::from_secs(5));
                (status, v)
            })
        };
        thread::sleep(Duration::from_millis(30));
        assert_eq!(mailbox.write(7), Status::Success);
        let (status, v) = reader.join().unwrap();
        assert_eq!(status, Status::Success);
        assert_eq!(v, 7);
    }

    #[test]
    fn messages_keep_fifo_order() {
        let mailbox: Mailbox<u64> = Mailbox::with_options("fifo", opts());
        for i in 0..4 {
            assert_eq!(mailbox.write(i), Status::Success);
        }
        let mut v = 0u64;
        for expected in 0..4 {
            assert_eq!(mailbox.read(&mut v, Duration::from_millis(10)), Status::Success);
            assert_eq!(v, expected);
        }
    }
}
