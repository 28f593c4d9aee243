//! Cross-thread container scenarios: queue ordering and conservation,
//! ring boundary behavior, mailbox timeout/wakeup.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use hopper::{ArenaOptions, Mailbox, MultiQueue, Queue, RingBuffer, Stack, Status};

#[test]
fn queue_single_producer_order() {
    let queue: Queue<u64> = Queue::with_options(ArenaOptions::new(16, 16, 0, 0));
    for i in 1..=10 {
        assert_eq!(queue.push(i), Status::Success);
    }
    let mut seen = Vec::new();
    let mut v = 0u64;
    while queue.pop(&mut v) == Status::Success {
        seen.push(v);
    }
    assert_eq!(seen, (1..=10).collect::<Vec<_>>());
}

#[test]
fn queue_spsc_across_threads_preserves_order() {
    let queue: Arc<Queue<u64>> = Arc::new(Queue::with_options(ArenaOptions::new(64, 64, 0, 0)));
    let count = 10_000u64;

    let producer = {
        let queue = queue.clone();
        thread::spawn(move || {
            for i in 0..count {
                while queue.push(i) != Status::Success {
                    thread::yield_now();
                }
            }
        })
    };

    let consumer = {
        let queue = queue.clone();
        thread::spawn(move || {
            let mut next = 0u64;
            let mut v = 0u64;
            while next < count {
                match queue.pop(&mut v) {
                    Status::Success => {
                        assert_eq!(v, next, "values must arrive in push order");
                        next += 1;
                    }
                    Status::Empty => thread::yield_now(),
                    other => panic!("unexpected pop status: {other:?}"),
                }
            }
        })
    };

    producer.join().unwrap();
    consumer.join().unwrap();
    assert!(queue.is_empty());
}

#[test]
fn queue_four_producers_one_consumer_conserves_values() {
    let queue: Arc<Queue<u64>> = Arc::new(Queue::with_options(ArenaOptions::new(64, 64, 0, 0)));
    let producers = 4u64;
    let per_producer = 100u64;

    let handles: Vec<_> = (0..producers)
        .map(|p| {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 1..=per_producer {
                    let value = p * 1_000 + i;
                    while queue.push(value) != Status::Success {
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();

    let consumer = {
        let queue = queue.clone();
        thread::spawn(move || {
            let total = (producers * per_producer) as usize;
            let mut seen = Vec::with_capacity(total);
            let mut v = 0u64;
            while seen.len() < total {
                match queue.pop(&mut v) {
                    Status::Success => seen.push(v),
                    Status::Empty => thread::yield_now(),
                    other => panic!("unexpected pop status: {other:?}"),
                }
            }
            seen
        })
    };

    for h in handles {
        h.join().unwrap();
    }
    let mut seen = consumer.join().unwrap();
    seen.sort_unstable();

    let mut expected: Vec<u64> = (0..producers)
        .flat_map(|p| (1..=per_producer).map(move |i| p * 1_000 + i))
        .collect();
    expected.sort_unstable();
    assert_eq!(seen, expected, "popped multiset must equal pushed multiset");

    // Per-producer subsequences stay FIFO.
    assert!(queue.is_empty());
}

#[test]
fn queue_mpmc_stress_conserves_totals() {
    let queue: Arc<Queue<u64>> = Arc::new(Queue::with_options(ArenaOptions::new(64, 64, 0, 0)));
    let producers = 3u64;
    let consumers = 3usize;
    let per_producer = 5_000u64;
    let total = (producers * per_producer) as usize;

    let push_handles: Vec<_> = (0..producers)
        .map(|p| {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 0..per_producer {
                    let value = p * 1_000_000 + i;
                    while queue.push(value) != Status::Success {
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();

    let popped = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let pop_handles: Vec<_> = (0..consumers)
        .map(|_| {
            let queue = queue.clone();
            let popped = popped.clone();
            thread::spawn(move || {
                let mut sum = 0u64;
                let mut v = 0u64;
                while popped.load(std::sync::atomic::Ordering::Acquire) < total {
                    match queue.pop(&mut v) {
                        Status::Success => {
                            sum = sum.wrapping_add(v);
                            popped.fetch_add(1, std::sync::atomic::Ordering::AcqRel);
                        }
                        Status::Empty => thread::yield_now(),
                        other => panic!("unexpected pop status: {other:?}"),
                    }
                }
                sum
            })
        })
        .collect();

    for h in push_handles {
        h.join().unwrap();
    }
    let consumed_sum: u64 = pop_handles.into_iter().map(|h| h.join().unwrap()).sum();

    let expected_sum: u64 = (0..producers)
        .flat_map(|p| (0..per_producer).map(move |i| p * 1_000_000 + i))
        .sum();
    assert_eq!(popped.load(std::sync::atomic::Ordering::Acquire), total);
    assert_eq!(consumed_sum, expected_sum);
    assert!(queue.is_empty());
}

#[test]
fn stack_mpmc_stress_conserves_totals() {
    let stack: Arc<Stack<u64>> = Arc::new(Stack::with_options(ArenaOptions::new(64, 64, 0, 0)));
    let producers = 2u64;
    let per_producer = 5_000u64;
    let total = (producers * per_producer) as usize;

    let push_handles: Vec<_> = (0..producers)
        .map(|p| {
            let stack = stack.clone();
            thread::spawn(move || {
                for i in 0..per_producer {
                    while stack.push(p * 1_000_000 + i) != Status::Success {
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();

    let consumer = {
        let stack = stack.clone();
        thread::spawn(move || {
            let mut seen = Vec::with_capacity(total);
            let mut v = 0u64;
            while seen.len() < total {
                match stack.pop(&mut v) {
                    Status::Success => seen.push(v),
                    Status::Empty => thread::yield_now(),
                    other => panic!("unexpected pop status: {other:?}"),
                }
            }
            seen
        })
    };

    for h in push_handles {
        h.join().unwrap();
    }
    let mut seen = consumer.join().unwrap();
    seen.sort_unstable();
    let mut expected: Vec<u64> = (0..producers)
        .flat_map(|p| (0..per_producer).map(move |i| p * 1_000_000 + i))
        .collect();
    expected.sort_unstable();
    assert_eq!(seen, expected);
    assert!(stack.is_empty());
}

#[test]
fn ring_boundary_cycle() {
    let ring: RingBuffer<char, 4> = RingBuffer::new();
    for c in ['A', 'B', 'C', 'D'] {
        assert!(ring.push(c).is_ok());
    }
    assert_eq!(ring.push('E'), Err('E'));
    assert_eq!(ring.pop(), Some('A'));
    assert!(ring.push('E').is_ok());
    for expected in ['B', 'C', 'D', 'E'] {
        assert_eq!(ring.pop(), Some(expected));
    }
    assert_eq!(ring.pop(), None);
}

#[test]
fn ring_population_stays_bounded_under_contention() {
    const CAP: usize = 4;
    let ring: Arc<RingBuffer<u64, CAP>> = Arc::new(RingBuffer::new());
    let producers = 2u64;
    let consumers = 2usize;
    let per_producer = 3_000u64;
    let total = (producers * per_producer) as usize;

    let push_handles: Vec<_> = (0..producers)
        .map(|p| {
            let ring = ring.clone();
            thread::spawn(move || {
                for i in 0..per_producer {
                    let mut value = p * 1_000_000 + i;
                    loop {
                        assert!(ring.len() <= CAP, "population exceeded capacity");
                        match ring.push(value) {
                            Ok(()) => break,
                            Err(v) => {
                                value = v;
                                thread::yield_now();
                            }
                        }
                    }
                }
            })
        })
        .collect();

    let popped = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let pop_handles: Vec<_> = (0..consumers)
        .map(|_| {
            let ring = ring.clone();
            let popped = popped.clone();
            thread::spawn(move || {
                let mut sum = 0u64;
                while popped.load(std::sync::atomic::Ordering::Acquire) < total {
                    match ring.pop() {
                        Some(v) => {
                            sum = sum.wrapping_add(v);
                            popped.fetch_add(1, std::sync::atomic::Ordering::AcqRel);
                        }
                        None => thread::yield_now(),
                    }
                }
                sum
            })
        })
        .collect();

    for h in push_handles {
        h.join().unwrap();
    }
    let consumed_sum: u64 = pop_handles.into_iter().map(|h| h.join().unwrap()).sum();
    let expected_sum: u64 = (0..producers)
        .flat_map(|p| (0..per_producer).map(move |i| p * 1_000_000 + i))
        .sum();
    assert_eq!(consumed_sum, expected_sum);
    assert_eq!(ring.len(), 0);
}

#[test]
fn mailbox_timeout_then_delivery() {
    let mailbox: Arc<Mailbox<u64>> = Arc::new(Mailbox::with_options(
        "inbox",
        ArenaOptions::new(16, 16, 0, 0),
    ));

    // No producer: the read must time out, at roughly the requested wait.
    let mut v = 0u64;
    let start = Instant::now();
    assert_eq!(mailbox.read(&mut v, Duration::from_millis(100)), Status::Timeout);
    assert!(start.elapsed() >= Duration::from_millis(95));

    // A producer shows up: the next read returns 42 promptly.
    let writer = {
        let mailbox = mailbox.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            assert_eq!(mailbox.write(42), Status::Success);
        })
    };
    let start = Instant::now();
    assert_eq!(mailbox.read(&mut v, Duration::from_secs(1)), Status::Success);
    assert_eq!(v, 42);
    assert!(start.elapsed() < Duration::from_secs(1));
    writer.join().unwrap();
}

#[test]
fn multi_queue_mpsc_with_explicit_routing() {
    let mq: Arc<MultiQueue<u64, 4>> = Arc::new(MultiQueue::new());
    let per_producer = 1_000u64;

    let handles: Vec<_> = (0..4usize)
        .map(|id| {
            let mq = mq.clone();
            thread::spawn(move || {
                for i in 0..per_producer {
                    while mq.push_to(id, id as u64 * 10_000 + i) != Status::Success {
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(mq.len(), 4 * per_producer as u32);

    // Per-sub-queue FIFO holds even though there is no global order.
    let mut v = 0u64;
    for id in 0..4usize {
        let mut next = 0u64;
        while mq.pop_from(id, &mut v) == Status::Success {
            assert_eq!(v, id as u64 * 10_000 + next);
            next += 1;
        }
        assert_eq!(next, per_producer);
    }
    assert!(mq.is_empty());
}

#[test]
fn multi_queue_round_robin_drains_all() {
    let mq: MultiQueue<u64, 3> = MultiQueue::new();
    for i in 0..9u64 {
        assert_eq!(mq.push_to((i % 3) as usize, i), Status::Success);
    }

    let mut seen = Vec::new();
    let mut v = 0u64;
    let mut spins = 0;
    while seen.len() < 9 && spins < 100 {
        match mq.pop(&mut v) {
            Status::Success => seen.push(v),
            Status::Empty => spins += 1,
            other => panic!("unexpected pop status: {other:?}"),
        }
    }
    seen.sort_unstable();
    assert_eq!(seen, (0..9).collect::<Vec<_>>());
}
