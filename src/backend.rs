//! Chunk memory backends: where the arena gets its slabs from.
//!
//! Two interchangeable sources are provided: the process heap (aligned
//! allocation) and, on unix, anonymous memory mappings. Chunks are large
//! and long-lived, so the backend is never on a hot path.

use core::alloc::Layout;

/// Platform max alignment; chunk allocations are at least this aligned so
/// any payload with ordinary alignment can live in a slot.
pub const MAX_ALIGN: usize = 16;

/// Supplies and reclaims chunk-sized blocks of raw memory.
///
/// `allocate` returns null on failure; the arena treats that as a
/// recoverable out-of-memory condition, not an error to propagate.
pub trait Backend: Send + Sync + 'static {
    /// Allocate `bytes` aligned to at least `align`. Returns null on failure.
    fn allocate(&self, bytes: usize, align: usize) -> *mut u8;

    /// Return a block previously obtained from [`Backend::allocate`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on the same backend with the same
    /// `bytes` and `align`, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: *mut u8, bytes: usize, align: usize);
}

/// Heap-backed chunks via the global allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapBackend;

impl Backend for HeapBackend {
    fn allocate(&self, bytes: usize, align: usize) -> *mut u8 {
        let Ok(layout) = Layout::from_size_align(bytes, align.max(MAX_ALIGN)) else {
            return core::ptr::null_mut();
        };
        if layout.size() == 0 {
            return core::ptr::null_mut();
        }
        // SAFETY: layout has non-zero size.
        unsafe { std::alloc::alloc(layout) }
    }

    unsafe fn deallocate(&self, ptr: *mut u8, bytes: usize, align: usize) {
        if ptr.is_null() {
            return;
        }
        let layout = Layout::from_size_align(bytes, align.max(MAX_ALIGN))
            .expect("layout was valid at allocation time");
        // SAFETY: caller guarantees ptr/layout match the original allocation.
        unsafe { std::alloc::dealloc(ptr, layout) }
    }
}

/// Anonymous-mapping chunks. Pages come straight from the OS, which keeps
/// large arenas out of the process heap entirely.
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct MmapBackend;

#[cfg(unix)]
impl Backend for MmapBackend {
    fn allocate(&self, bytes: usize, _align: usize) -> *mut u8 {
        if bytes == 0 {
            return core::ptr::null_mut();
        }
        // SAFETY: anonymous private mapping, no fd, no fixed address.
        let ptr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                bytes,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_ANONYMOUS | libc::MAP_PRIVATE,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return core::ptr::null_mut();
        }
        // Page alignment satisfies any alignment a slot can ask for.
        ptr as *mut u8
    }

    unsafe fn deallocate(&self, ptr: *mut u8, bytes: usize, _align: usize) {
        if ptr.is_null() {
            return;
        }
        // SAFETY: caller guarantees ptr/bytes name a live mapping from allocate.
        unsafe {
            libc::munmap(ptr as *mut libc::c_void, bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_roundtrip() {
        let backend = HeapBackend;
        let ptr = backend.allocate(4096, MAX_ALIGN);
        assert!(!ptr.is_null());
        assert_eq!(ptr as usize % MAX_ALIGN, 0);
        unsafe { backend.deallocate(ptr, 4096, MAX_ALIGN) };
    }

    #[test]
    fn heap_rejects_zero() {
        assert!(HeapBackend.allocate(0, MAX_ALIGN).is_null());
    }

    #[cfg(unix)]
    #[test]
    fn mmap_roundtrip() {
        let backend = MmapBackend;
        let ptr = backend.allocate(4096, MAX_ALIGN);
        assert!(!ptr.is_null());
        // Touch the mapping to make sure it is actually writable.
        unsafe {
            ptr.write_bytes(0xA5, 4096);
            assert_eq!(*ptr, 0xA5);
            backend.deallocate(ptr, 4096, MAX_ALIGN);
        }
    }
}
