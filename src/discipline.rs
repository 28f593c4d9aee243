//! Compile-time selection of a container's synchronization strategy.
//!
//! Queues and stacks are generic over a [`Discipline`] tag: `Raw` (no
//! synchronization, single thread), `Mutexed` (one OS mutex around every
//! operation), `SpinLocked` (same, with a spin lock), and `LockFree`
//! (CAS loops, no lock). The tag is a zero-sized type, so variant
//! selection costs nothing at runtime.

use parking_lot::lock_api::RawMutex as _;

use crate::spin::SpinMutex;

/// Lock plumbing behind a discipline. `NoLock` compiles to nothing.
pub trait ContainerLock: Default + Send + Sync + 'static {
    /// Whether `lock`/`unlock` actually do anything.
    const PRESENT: bool;

    fn acquire(&self);
    fn release(&self);
}

/// No lock at all (raw and lock-free variants).
#[derive(Debug, Default)]
pub struct NoLock;

impl ContainerLock for NoLock {
    const PRESENT: bool = false;

    #[inline]
    fn acquire(&self) {}

    #[inline]
    fn release(&self) {}
}

/// An OS mutex (parking on contention).
pub struct StdLock(parking_lot::RawMutex);

impl Default for StdLock {
    fn default() -> Self {
        StdLock(parking_lot::RawMutex::INIT)
    }
}

impl core::fmt::Debug for StdLock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("StdLock")
    }
}

impl ContainerLock for StdLock {
    const PRESENT: bool = true;

    #[inline]
    fn acquire(&self) {
        self.0.lock();
    }

    #[inline]
    fn release(&self) {
        // SAFETY: callers pair acquire/release; the container never
        // releases a lock it does not hold.
        unsafe { self.0.unlock() };
    }
}

/// A spin lock (busy-waiting on contention).
#[derive(Debug, Default)]
pub struct SpinLock(SpinMutex);

impl ContainerLock for SpinLock {
    const PRESENT: bool = true;

    #[inline]
    fn acquire(&self) {
        self.0.acquire();
    }

    #[inline]
    fn release(&self) {
        self.0.release();
    }
}

mod sealed {
    pub trait Sealed {}
}

/// A container synchronization strategy. Sealed: the four provided tags
/// are the only implementations.
pub trait Discipline: sealed::Sealed + 'static {
    /// True for the CAS-based variant.
    const LOCK_FREE: bool;
    type Lock: ContainerLock;
}

/// Single-threaded, no synchronization at all.
pub enum Raw {}

/// Every operation under an OS mutex.
pub enum Mutexed {}

/// Every operation under a spin lock.
pub enum SpinLocked {}

/// CAS loops on tagged words; no lock.
pub enum LockFree {}

impl sealed::Sealed for Raw {}
impl sealed::Sealed for Mutexed {}
impl sealed::Sealed for SpinLocked {}
impl sealed::Sealed for LockFree {}

impl Discipline for Raw {
    const LOCK_FREE: bool = false;
    type Lock = NoLock;
}

impl Discipline for Mutexed {
    const LOCK_FREE: bool = false;
    type Lock = StdLock;
}

impl Discipline for SpinLocked {
    const LOCK_FREE: bool = false;
    type Lock = SpinLock;
}

impl Discipline for LockFree {
    const LOCK_FREE: bool = true;
    type Lock = NoLock;
}

/// Marker for disciplines that make a container safe to share across
/// threads. `Raw` deliberately does not implement it.
pub trait Concurrent: Discipline {}

impl Concurrent for Mutexed {}
impl Concurrent for SpinLocked {}
impl Concurrent for LockFree {}
