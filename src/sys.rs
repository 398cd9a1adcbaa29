//! Raw system page provisioning.
//!
//! Blocks must be independently releasable; a block in the middle of the
//! address space can be retired the moment it drains, so this crate asks
//! the kernel for anonymous, private `mmap` regions rather than growing a
//! single `sbrk` break, which only ever gives back memory at the tail.

use std::ptr::NonNull;

use crate::error::ProvisionError;

/// Request `len` bytes of fresh, zeroed, page-aligned memory from the
/// system. `len` should already be rounded up to a page multiple by the
/// caller; `mmap` rounds internally regardless, but keeping callers honest
/// means `munmap` is always handed back the same length it was given.
pub fn map_pages(len: usize) -> Result<NonNull<u8>, ProvisionError> {
    if len == 0 {
        return Err(ProvisionError::ZeroSizeRequest);
    }

    // SAFETY: a fixed, fully-specified anonymous mapping request; the
    // returned pointer is checked against MAP_FAILED before use.
    let addr = unsafe {
        libc::mmap(
            core::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };

    if addr == libc::MAP_FAILED {
        return Err(ProvisionError::SystemOom);
    }

    // SAFETY: mmap succeeded, so addr is non-null and valid for `len` bytes.
    Ok(unsafe { NonNull::new_unchecked(addr.cast::<u8>()) })
}

/// Release a mapping previously obtained from [`map_pages`]. `len` must be
/// the exact length passed to that call.
///
/// # Safety
/// `base` must be the unmodified pointer `map_pages` returned, and no
/// reference into the mapped region may outlive this call.
pub unsafe fn unmap_pages(base: NonNull<u8>, len: usize) {
    // SAFETY: delegated to the caller's contract above.
    let rc = unsafe { libc::munmap(base.as_ptr().cast(), len) };
    debug_assert_eq!(rc, 0, "munmap failed on a pointer/length this crate itself provisioned");
}

/// The system page size, queried once and cached. Pool configuration
/// typically rounds its own page-size parameter to a multiple of this.
pub fn native_page_size() -> usize {
    // SAFETY: sysconf with a well-known, always-valid name.
    let rc = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if rc <= 0 { 4096 } else { rc as usize }
}
