//! Lock-free container primitives over typed slab arenas.
//!
//! This crate is built for producer/consumer workloads that must avoid
//! global heap traffic and mutex convoys: memory for a fixed payload type
//! is pre-reserved in chunks by an [`Arena`], served in O(1) through an
//! intrusive free list headed by a tagged word, and recycled forever.
//! The containers allocate their nodes from that arena and coordinate
//! with the same tagged-word CAS discipline.
//!
//! # Components
//!
//! - [`Arena`]: chunked slab allocator with a lock-free free list, an
//!   optional background grower thread, and double-free detection
//! - [`Queue`]: Michael–Scott FIFO queue; raw / mutex / spinlock /
//!   lock-free variants selected by a [`Discipline`] tag
//! - [`Stack`]: Treiber LIFO stack, same variants
//! - [`RingBuffer`]: bounded MPMC ring with per-slot status words
//! - [`MultiQueue`]: fan-out over `K` queues with thread-id routing and a
//!   round-robin pop cursor
//! - [`Mailbox`]: queue + [`Event`] so consumers can sleep instead of
//!   busy-polling
//! - Supporting primitives: [`AddrTag`] (pointer + flags + ABA counter in
//!   one word), [`SpinMutex`], [`CountingSemaphore`], [`Event`],
//!   [`FixedLookupTable`], and the chunk [`Backend`] trait with heap and
//!   mmap implementations
//!
//! # Error model
//!
//! Operations return a [`Status`]; nothing panics on an operational
//! failure and nothing tears itself down. A failed push leaves its queue
//! unchanged, a failed allocate consumes nothing, popping an empty
//! container is just [`Status::Empty`].
//!
//! # Loom testing
//!
//! Enable the `loom` feature to run the concurrency models covering the
//! arena free list, the queue, the stack, and the ring:
//!
//! ```text
//! cargo test --features loom --release
//! ```

#![forbid(unsafe_op_in_unsafe_fn)]

mod addr;
mod arena;
mod backend;
mod discipline;
mod event;
mod mailbox;
mod multi_queue;
mod queue;
mod registry;
mod ring;
mod semaphore;
mod slot;
mod spin;
mod stack;
mod status;
pub mod sync;
mod table;

pub use addr::AddrTag;
pub use arena::{Arena, ArenaOptions};
#[cfg(unix)]
pub use backend::MmapBackend;
pub use backend::{Backend, HeapBackend, MAX_ALIGN};
pub use discipline::{Concurrent, ContainerLock, Discipline, LockFree, Mutexed, Raw, SpinLocked};
pub use event::Event;
pub use mailbox::Mailbox;
pub use multi_queue::MultiQueue;
pub use queue::Queue;
pub use registry::INSTANCE_TABLE_WIDTH;
pub use ring::RingBuffer;
pub use semaphore::{BinarySemaphore, CountingSemaphore};
pub use spin::{SpinGuard, SpinMutex};
pub use stack::Stack;
pub use status::Status;
pub use table::FixedLookupTable;
