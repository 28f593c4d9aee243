//! Typed slab arena with an O(1) lock-free free list.
//!
//! The arena pre-reserves memory for a fixed payload type and serves
//! allocate/deallocate through an intrusive singly-linked free list whose
//! head is a tagged word ([`AddrTag`]): every successful push or pop bumps
//! the embedded counter, so a CAS against a stale head cannot succeed even
//! if the address has been recycled.
//!
//! Memory arrives in fixed-size chunks from a [`Backend`]. Chunks are only
//! released by [`Arena::clear`] or at drop; until then every slot stays
//! valid, which is what makes the optimistic link reads in the CAS loops
//! safe.
//!
//! With a non-zero `alloc_threshold` the arena runs a background grower
//! thread: `allocate` releases a binary semaphore whenever the free count
//! dips below the threshold, and the grower extends the free list without
//! ever touching in-flight CAS loops: new slots are spliced in with a
//! single head CAS, the same way a chunk's chain is linked at startup.

use core::marker::PhantomData;
use core::mem::{align_of, size_of};
use core::ptr::NonNull;

use parking_lot::Mutex;

use crate::addr::AddrTag;
use crate::backend::{Backend, HeapBackend, MAX_ALIGN};
use crate::registry::{self, InstanceTable};
use crate::semaphore::BinarySemaphore;
use crate::slot::Slot;
use crate::status::Status;
use crate::sync::{spin_loop, AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Arena geometry, validated at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaOptions {
    /// Slots per chunk. Must be at least 1.
    pub chunk_size: u32,
    /// Slots reserved eagerly at construction. Must be at least `chunk_size`;
    /// rounded up to a whole number of chunks.
    pub initial_size: u32,
    /// Hard cap on the total slot count; 0 means unbounded growth.
    pub size_limit: u32,
    /// When non-zero, a background grower adds a chunk whenever the free
    /// count drops to this value or below. When zero, growth happens inline
    /// on an empty free list.
    pub alloc_threshold: u32,
}

impl ArenaOptions {
    pub const fn new(chunk_size: u32, initial_size: u32, size_limit: u32, alloc_threshold: u32) -> Self {
        ArenaOptions {
            chunk_size,
            initial_size,
            size_limit,
            alloc_threshold,
        }
    }

    fn validate(&self) {
        assert!(self.chunk_size >= 1, "chunk_size must be at least 1");
        assert!(
            self.initial_size >= self.chunk_size,
            "initial_size must be at least one chunk"
        );
    }
}

impl Default for ArenaOptions {
    fn default() -> Self {
        ArenaOptions::new(1024, 1024, 0, 0)
    }
}

/// The concurrently shared head of an arena: the free list and counters.
///
/// This is what the instance registry points at, so cross-instance
/// deallocation only ever needs the header, never the backend.
pub(crate) struct ArenaHeader<T> {
    /// Free list head: slot address + ABA counter in one word.
    next_free: AtomicU64,
    free_slots: AtomicU32,
    used_slots: AtomicU32,
    max_length: AtomicU32,
    capacity: AtomicUsize,
    /// Index in the per-type instance table; written once at registration.
    instance: AtomicU32,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T> ArenaHeader<T> {
    fn new() -> Self {
        ArenaHeader {
            next_free: AtomicU64::new(AddrTag::null().raw()),
            free_slots: AtomicU32::new(0),
            used_slots: AtomicU32::new(0),
            max_length: AtomicU32::new(0),
            capacity: AtomicUsize::new(0),
            instance: AtomicU32::new(0),
            _marker: PhantomData,
        }
    }

    #[inline]
    fn instance(&self) -> u64 {
        self.instance.load(Ordering::Relaxed) as u64
    }

    /// Pop one slot off the free list. `None` when the list is empty.
    fn pop_free(&self) -> Option<*mut Slot<T>> {
        loop {
            let head = AddrTag::from_raw(self.next_free.load(Ordering::Acquire));
            let slot = head.ptr::<Slot<T>>();
            if slot.is_null() {
                return None;
            }
            // SAFETY: chunks are never released while the arena lives, so
            // `slot` addresses valid memory even if another thread claimed
            // it between our load and the CAS; the CAS fails in that case
            // because the head counter moved.
            let next = unsafe { (*slot).load_link(Ordering::Acquire) };
            let new_head = head.with_addr(next.ptr::<Slot<T>>()).bump();
            if self
                .next_free
                .compare_exchange_weak(head.raw(), new_head.raw(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(slot);
            }
            spin_loop();
        }
    }

    /// Flip a freshly popped slot to the live state and adjust counters.
    fn mark_live(&self, slot: *mut Slot<T>) {
        let live = AddrTag::null()
            .with_counter(self.instance())
            .set_flag(AddrTag::IN_USE);
        // SAFETY: the slot was just popped; we are its sole owner.
        unsafe { (*slot).store_link(live, Ordering::Release) };
        self.free_slots.fetch_sub(1, Ordering::AcqRel);
        self.used_slots.fetch_add(1, Ordering::AcqRel);
    }

    /// Push a slot back onto the free list, clearing `IN_USE` and stamping
    /// the head counter.
    fn push_free(&self, slot: *mut Slot<T>) {
        let instance = self.instance();
        loop {
            let head = AddrTag::from_raw(self.next_free.load(Ordering::Acquire));
            let free = AddrTag::from_ptr(head.ptr::<Slot<T>>()).with_counter(instance);
            // SAFETY: the caller owns the slot until the CAS publishes it.
            unsafe { (*slot).store_link(free, Ordering::Release) };
            let new_head = head.with_addr(slot).bump();
            if self
                .next_free
                .compare_exchange_weak(head.raw(), new_head.raw(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
            spin_loop();
        }
        self.free_slots.fetch_add(1, Ordering::AcqRel);
        self.used_slots.fetch_sub(1, Ordering::AcqRel);
    }
}

struct Chunk<T> {
    first: *mut Slot<T>,
    last: *mut Slot<T>,
    slots: u32,
    bytes: usize,
}

struct ArenaShared<T: Send + 'static, B: Backend> {
    header: ArenaHeader<T>,
    /// Chunk directory. Held across the whole record-and-splice step so a
    /// free-list node always belongs to a recorded chunk.
    chunks: Mutex<Vec<Chunk<T>>>,
    opts: ArenaOptions,
    backend: B,
    table: Arc<InstanceTable<T>>,
    grow_sem: BinarySemaphore,
    grow_exit: AtomicBool,
}

// SAFETY: all cross-thread state in ArenaShared is either atomic, behind a
// mutex, or immutable after construction; payloads are T: Send.
unsafe impl<T: Send + 'static, B: Backend> Send for ArenaShared<T, B> {}
unsafe impl<T: Send + 'static, B: Backend> Sync for ArenaShared<T, B> {}

impl<T: Send + 'static, B: Backend> ArenaShared<T, B> {
    const SLOT_BYTES: usize = size_of::<Slot<T>>();

    fn chunk_align() -> usize {
        align_of::<Slot<T>>().max(MAX_ALIGN)
    }

    /// Allocate, initialize, record, and splice one chunk.
    ///
    /// Returns false when the backend is out of memory or the size limit
    /// forbids further growth.
    fn add_chunk(&self) -> bool {
        let chunk_size = self.opts.chunk_size;
        let limit = self.opts.size_limit;
        if limit > 0 && self.header.max_length.load(Ordering::Acquire) >= limit {
            return false;
        }

        let bytes = Self::SLOT_BYTES * chunk_size as usize;
        let align = Self::chunk_align();
        let raw = self.backend.allocate(bytes, align);
        if raw.is_null() {
            tracing::warn!(bytes, "arena chunk allocation failed");
            return false;
        }

        let first = raw as *mut Slot<T>;
        let instance = self.header.instance();
        // SAFETY: `raw` spans chunk_size properly aligned slots.
        unsafe {
            for i in 0..chunk_size as usize {
                let next = if i + 1 < chunk_size as usize {
                    first.add(i + 1)
                } else {
                    core::ptr::null_mut()
                };
                Slot::init_free(first.add(i), next, instance);
            }
        }
        // SAFETY: chunk_size >= 1, so last stays within the chunk.
        let last = unsafe { first.add(chunk_size as usize - 1) };

        let mut chunks = self.chunks.lock();
        if limit > 0 && self.header.max_length.load(Ordering::Acquire) >= limit {
            // Lost a growth race; hand the chunk back.
            drop(chunks);
            // SAFETY: `raw` was just allocated with these parameters.
            unsafe { self.backend.deallocate(raw, bytes, align) };
            return false;
        }
        chunks.push(Chunk {
            first,
            last,
            slots: chunk_size,
            bytes,
        });
        self.header.max_length.fetch_add(chunk_size, Ordering::AcqRel);
        self.header.capacity.fetch_add(bytes, Ordering::AcqRel);

        // Splice the whole chain with one head CAS: link the chunk's last
        // slot to the current head, then swing the head to the first slot.
        // Still under the directory lock so a concurrent `clear` cannot
        // free the chunk between record and splice.
        loop {
            let head = AddrTag::from_raw(self.header.next_free.load(Ordering::Acquire));
            let tail_link = AddrTag::from_ptr(head.ptr::<Slot<T>>()).with_counter(instance);
            // SAFETY: `last` is inside the chunk we just initialized.
            unsafe { (*last).store_link(tail_link, Ordering::Release) };
            let new_head = head.with_addr(first).bump();
            if self
                .header
                .next_free
                .compare_exchange_weak(head.raw(), new_head.raw(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
            spin_loop();
        }
        drop(chunks);

        self.header.free_slots.fetch_add(chunk_size, Ordering::AcqRel);
        tracing::debug!(
            slots = chunk_size,
            total = self.header.max_length.load(Ordering::Relaxed),
            "arena chunk added"
        );
        true
    }

    /// Drop every live payload and release every chunk.
    fn clear_all(&self) {
        let mut chunks = self.chunks.lock();
        for chunk in chunks.iter() {
            for i in 0..chunk.slots as usize {
                // SAFETY: i stays within the chunk.
                let slot = unsafe { chunk.first.add(i) };
                // SAFETY: the slot is initialized; no other thread touches
                // the arena during clear (it takes &mut at the API level).
                let link = unsafe { (*slot).load_link(Ordering::Acquire) };
                if link.test_flag(AddrTag::IN_USE) {
                    // SAFETY: IN_USE slots hold a constructed payload.
                    unsafe { core::ptr::drop_in_place((*slot).payload_ptr()) };
                }
            }
            // SAFETY: the chunk came from this backend with these parameters.
            unsafe {
                self.backend
                    .deallocate(chunk.first as *mut u8, chunk.bytes, Self::chunk_align())
            };
        }
        chunks.clear();
        self.header.next_free.store(AddrTag::null().raw(), Ordering::Release);
        self.header.free_slots.store(0, Ordering::Release);
        self.header.used_slots.store(0, Ordering::Release);
        self.header.max_length.store(0, Ordering::Release);
        self.header.capacity.store(0, Ordering::Release);
    }
}

impl<T: Send + 'static, B: Backend> Drop for ArenaShared<T, B> {
    fn drop(&mut self) {
        let index = self.header.instance.load(Ordering::Relaxed) as usize;
        self.table.reset_at(index);
        self.clear_all();
    }
}

fn grower_loop<T: Send + 'static, B: Backend>(shared: Arc<ArenaShared<T, B>>) {
    tracing::debug!("arena grower running");
    loop {
        shared.grow_sem.acquire();
        if shared.grow_exit.load(Ordering::Acquire) {
            break;
        }
        let limit = shared.opts.size_limit;
        if limit == 0 || shared.header.max_length.load(Ordering::Acquire) < limit {
            // An allocation failure here is transient: the grower simply
            // parks until the next threshold crossing.
            let _ = shared.add_chunk();
        }
    }
    tracing::debug!("arena grower exiting");
}

/// A typed slab arena.
///
/// `allocate` hands out stable payload pointers constructed in place;
/// `deallocate` runs the payload's destructor and recycles the slot.
/// Both are O(1) and lock-free. Any arena of the same payload type can
/// deallocate any pointer: the slot records its owner's instance index.
pub struct Arena<T: Send + 'static, B: Backend = HeapBackend> {
    shared: Arc<ArenaShared<T, B>>,
    grower: Option<std::thread::JoinHandle<()>>,
}

impl<T: Send + 'static> Arena<T, HeapBackend> {
    /// Heap-backed arena with default geometry.
    pub fn new() -> Self {
        Self::with_options(ArenaOptions::default())
    }

    /// Heap-backed arena with explicit geometry.
    pub fn with_options(opts: ArenaOptions) -> Self {
        Self::with_backend(opts, HeapBackend)
    }
}

impl<T: Send + 'static> Default for Arena<T, HeapBackend> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static, B: Backend> Arena<T, B> {
    /// Arena over a caller-supplied chunk backend.
    ///
    /// # Panics
    ///
    /// Panics when the options are inconsistent or when the per-type
    /// instance table is full (more than
    /// [`INSTANCE_TABLE_WIDTH`](crate::INSTANCE_TABLE_WIDTH) live arenas
    /// of this payload type).
    pub fn with_backend(opts: ArenaOptions, backend: B) -> Self {
        opts.validate();

        let table = registry::instance_table::<T>();
        let shared = Arc::new(ArenaShared {
            header: ArenaHeader::new(),
            chunks: Mutex::new(Vec::new()),
            opts,
            backend,
            table: table.clone(),
            grow_sem: BinarySemaphore::new(0),
            grow_exit: AtomicBool::new(false),
        });

        let header = &shared.header as *const ArenaHeader<T> as *mut ArenaHeader<T>;
        let index = table
            .add(header)
            .expect("too many live arenas for this payload type");
        shared.header.instance.store(index as u32, Ordering::Release);

        while shared.header.max_length.load(Ordering::Acquire) < opts.initial_size {
            if !shared.add_chunk() {
                break;
            }
        }

        let grower = (opts.alloc_threshold > 0).then(|| {
            let shared = shared.clone();
            std::thread::Builder::new()
                .name("hopper-arena-grower".into())
                .spawn(move || grower_loop(shared))
                .expect("failed to spawn arena grower")
        });

        Arena { shared, grower }
    }

    /// Move `value` into a fresh slot and return a pointer to it.
    ///
    /// On failure the value comes back in `Err`. Failure means the free
    /// list was empty and could not grow right now: the size limit was
    /// reached, the backend refused, or the grower has not caught up yet.
    /// The last case is transient and a retry may succeed.
    pub fn allocate(&self, value: T) -> Result<NonNull<T>, T> {
        let shared = &*self.shared;
        let header = &shared.header;

        if shared.opts.alloc_threshold > 0 {
            if header.free_slots.load(Ordering::Acquire) <= shared.opts.alloc_threshold {
                shared.grow_sem.release();
            }
        } else if AddrTag::from_raw(header.next_free.load(Ordering::Acquire)).is_null() {
            let _ = shared.add_chunk();
        }

        let Some(slot) = header.pop_free() else {
            return Err(value);
        };
        header.mark_live(slot);
        // SAFETY: the slot is ours; the payload region is properly aligned
        // uninitialized storage for T.
        unsafe {
            let payload = (*slot).payload_ptr();
            payload.write(value);
            Ok(NonNull::new_unchecked(payload))
        }
    }

    /// Destroy the payload at `ptr` and recycle its slot.
    ///
    /// Detects a null pointer and (advisorily) a slot that is already
    /// free; under a pathological race a freshly recycled slot can elude
    /// the double-free check, but single-ownership usage is safe.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer previously returned by an
    /// `allocate` call on an arena of this payload type, not freed since.
    pub unsafe fn deallocate(&self, ptr: *mut T) -> Status {
        if ptr.is_null() {
            return Status::NullPointer;
        }
        // SAFETY: per contract, ptr came from an arena slot.
        let slot = unsafe { Slot::from_payload(ptr) };
        // SAFETY: slot derived from a live allocation.
        unsafe { self.release_slot(slot, true) }
    }

    /// Claim a live slot without constructing a payload. The queue uses
    /// this for its sentinel node, whose payload region is never
    /// initialized and must never be dropped.
    pub(crate) fn allocate_uninit(&self) -> Option<*mut Slot<T>> {
        let shared = &*self.shared;
        let header = &shared.header;
        if shared.opts.alloc_threshold > 0 {
            if header.free_slots.load(Ordering::Acquire) <= shared.opts.alloc_threshold {
                shared.grow_sem.release();
            }
        } else if AddrTag::from_raw(header.next_free.load(Ordering::Acquire)).is_null() {
            let _ = shared.add_chunk();
        }
        let slot = header.pop_free()?;
        header.mark_live(slot);
        Some(slot)
    }

    /// Shared tail of `deallocate`/container reclaim: resolve the owner
    /// through the instance table and push the slot onto its free list.
    ///
    /// # Safety
    ///
    /// `slot` must point at an initialized slot of this payload type.
    pub(crate) unsafe fn release_slot(&self, slot: *mut Slot<T>, drop_payload: bool) -> Status {
        // SAFETY: caller guarantees slot validity.
        let link = unsafe { (*slot).load_link(Ordering::Acquire) };
        if !link.test_flag(AddrTag::IN_USE) {
            return Status::DoubleFree;
        }
        let owner = self.shared.table.get(link.counter() as usize);
        if owner.is_null() {
            return Status::Failure;
        }
        if drop_payload {
            // SAFETY: IN_USE slots hold a constructed payload.
            unsafe { core::ptr::drop_in_place((*slot).payload_ptr()) };
        }
        // SAFETY: the table only holds headers of live arenas.
        unsafe { (*owner).push_free(slot) };
        Status::Success
    }

    /// Single-threaded allocate: same contract as [`Arena::allocate`]
    /// without the CAS loops. `&mut self` proves exclusivity. Must not be
    /// mixed with a configured background grower.
    pub fn allocate_mut(&mut self, value: T) -> Result<NonNull<T>, T> {
        let shared = &*self.shared;
        let header = &shared.header;

        if shared.opts.alloc_threshold == 0
            && AddrTag::from_raw(header.next_free.load(Ordering::Relaxed)).is_null()
        {
            let _ = shared.add_chunk();
        }

        let head = AddrTag::from_raw(header.next_free.load(Ordering::Relaxed));
        let slot = head.ptr::<Slot<T>>();
        if slot.is_null() {
            return Err(value);
        }
        // SAFETY: exclusive access; the slot is on our free list.
        unsafe {
            let next = (*slot).load_link(Ordering::Relaxed);
            header.next_free.store(
                head.with_addr(next.ptr::<Slot<T>>()).bump().raw(),
                Ordering::Relaxed,
            );
            let live = AddrTag::null()
                .with_counter(header.instance())
                .set_flag(AddrTag::IN_USE);
            (*slot).store_link(live, Ordering::Relaxed);
            header.free_slots.fetch_sub(1, Ordering::Relaxed);
            header.used_slots.fetch_add(1, Ordering::Relaxed);
            let payload = (*slot).payload_ptr();
            payload.write(value);
            Ok(NonNull::new_unchecked(payload))
        }
    }

    /// Single-threaded deallocate; counterpart of [`Arena::allocate_mut`].
    /// Always recycles into this arena.
    ///
    /// # Safety
    ///
    /// Same contract as [`Arena::deallocate`].
    pub unsafe fn deallocate_mut(&mut self, ptr: *mut T) -> Status {
        if ptr.is_null() {
            return Status::NullPointer;
        }
        let header = &self.shared.header;
        // SAFETY: per contract, ptr came from an arena slot.
        let slot = unsafe { Slot::from_payload(ptr) };
        // SAFETY: exclusive access per &mut self.
        unsafe {
            let link = (*slot).load_link(Ordering::Relaxed);
            if !link.test_flag(AddrTag::IN_USE) {
                return Status::DoubleFree;
            }
            core::ptr::drop_in_place((*slot).payload_ptr());
            let head = AddrTag::from_raw(header.next_free.load(Ordering::Relaxed));
            let free = AddrTag::from_ptr(head.ptr::<Slot<T>>()).with_counter(header.instance());
            (*slot).store_link(free, Ordering::Relaxed);
            header
                .next_free
                .store(head.with_addr(slot).bump().raw(), Ordering::Relaxed);
            header.free_slots.fetch_add(1, Ordering::Relaxed);
            header.used_slots.fetch_sub(1, Ordering::Relaxed);
        }
        Status::Success
    }

    /// True when `ptr` falls inside a payload region managed by this arena.
    /// O(number of chunks).
    pub fn is_valid(&self, ptr: *const T) -> bool {
        if ptr.is_null() {
            return false;
        }
        let addr = ptr as usize;
        let chunks = self.shared.chunks.lock();
        chunks.iter().any(|chunk| {
            let first = chunk.first as usize + Slot::<T>::PAYLOAD_OFFSET;
            let last = chunk.last as usize + Slot::<T>::PAYLOAD_OFFSET;
            addr >= first && addr <= last
        })
    }

    /// Number of live (allocated) slots.
    pub fn len(&self) -> u32 {
        self.shared.header.used_slots.load(Ordering::Acquire)
    }

    /// True when no slot is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total slot count across all chunks.
    pub fn max_len(&self) -> u32 {
        self.shared.header.max_length.load(Ordering::Acquire)
    }

    /// Number of free slots.
    pub fn free_len(&self) -> u32 {
        self.shared.header.free_slots.load(Ordering::Acquire)
    }

    /// Bytes currently reserved for chunks.
    pub fn capacity(&self) -> usize {
        self.shared.header.capacity.load(Ordering::Acquire)
    }

    /// Size in bytes of one payload.
    pub const fn type_size(&self) -> usize {
        size_of::<T>()
    }

    /// Largest slot count this arena could ever address.
    pub const fn max_size(&self) -> u32 {
        (u32::MAX as usize / size_of::<Slot<T>>()) as u32
    }

    /// Drop every live payload and release every chunk. The arena is empty
    /// afterwards and grows again on demand.
    ///
    /// Not thread-safe: `&mut self` keeps other users out, and the caller
    /// must not have a grower mid-growth (quiesce producers first).
    pub fn clear(&mut self) {
        self.shared.clear_all();
    }
}

impl<T: Send + 'static, B: Backend> Drop for Arena<T, B> {
    fn drop(&mut self) {
        if let Some(handle) = self.grower.take() {
            self.shared.grow_exit.store(true, Ordering::Release);
            self.shared.grow_sem.release();
            let _ = handle.join();
        }
        // ArenaShared::drop unregisters the instance and releases chunks.
    }
}
