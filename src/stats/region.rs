//! Anonymous shared memory region for counter slots.
//!
//! The parent maps the region before the first fork; every child inherits
//! the same physical pages, so an atomic store in a worker is immediately
//! visible to the parent and to sibling workers. All unsafe operations are
//! encapsulated here with bounds checking.

use std::ptr::NonNull;
use std::sync::atomic::AtomicU64;

use crate::error::{BrimError, Result};

/// A `MAP_SHARED | MAP_ANONYMOUS` mapping holding `slots` atomic counters.
pub struct SharedRegion {
    ptr: NonNull<AtomicU64>,
    slots: usize,
}

// SAFETY: the region is plain shared memory; every access goes through
// AtomicU64, which provides the required synchronization.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Map a zeroed region with room for `slots` counters.
    pub fn create(slots: usize) -> Result<Self> {
        let slots = slots.max(1);
        let size = slots * std::mem::size_of::<AtomicU64>();

        // SAFETY: anonymous mapping, no fd involved; size is non-zero.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(BrimError::Supervisor(format!(
                "could not map {size} bytes of shared stats memory: {}",
                std::io::Error::last_os_error()
            )));
        }

        // SAFETY: ptr is valid for size bytes; MAP_ANONYMOUS pages start
        // zeroed but an explicit zero keeps the invariant obvious.
        unsafe {
            std::ptr::write_bytes(ptr as *mut u8, 0, size);
        }

        let ptr = NonNull::new(ptr as *mut AtomicU64).ok_or_else(|| {
            BrimError::Supervisor("shared stats mapping returned null".to_string())
        })?;

        tracing::debug!(slots, size, "mapped shared stats region");
        Ok(Self { ptr, slots })
    }

    /// Number of counter slots in the region.
    pub fn slots(&self) -> usize {
        self.slots
    }

    /// The atomic counter at `index`.
    ///
    /// # Panics
    /// Panics if `index` is outside the region; slot indexes are assigned at
    /// plan freeze and never reassigned, so an out-of-range index is a bug.
    pub fn slot(&self, index: usize) -> &AtomicU64 {
        assert!(index < self.slots, "stat slot {index} out of range");
        // SAFETY: index is in bounds and the mapping lives as long as self.
        unsafe { &*self.ptr.as_ptr().add(index) }
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        let size = self.slots * std::mem::size_of::<AtomicU64>();
        // SAFETY: ptr/size were produced by mmap in `create`.
        let result = unsafe { libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, size) };
        if result < 0 {
            tracing::error!(
                error = %std::io::Error::last_os_error(),
                "failed to unmap shared stats region"
            );
        }
    }
}
