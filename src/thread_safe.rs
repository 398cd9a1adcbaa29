//! Thread-safe wrapper over one [`Pool`].
//!
//! The core allocator is single-threaded cooperative, no internal
//! synchronization, no operation suspends. Everything here is the wrapping
//! concern: a `spin::Mutex` around the pool, with one required shortcut
//! for the common reallocate case that touches no block state at all.

use std::ptr::NonNull;

use spin::Mutex;

use crate::config::PoolConfig;
use crate::pool::Pool;
use crate::realloc_engine::{self, MoveFn, RetainedRange};

pub struct ThreadSafePool {
    inner: Mutex<Pool>,
}

impl ThreadSafePool {
    pub fn new(config: PoolConfig) -> Self {
        ThreadSafePool { inner: Mutex::new(Pool::new(config)) }
    }

    pub fn allocate(&self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        self.inner.lock().allocate(size, alignment)
    }

    pub fn free(&self, p: NonNull<u8>, size: usize, alignment: usize) {
        self.inner.lock().free(p, size, alignment);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn reallocate(
        &self,
        ptr: Option<NonNull<u8>>,
        hint: Option<NonNull<u8>>,
        from_bytes: usize,
        to_bytes: usize,
        keep: [RetainedRange; 2],
        alignment: usize,
        size_of: usize,
        is_trivial: bool,
        move_fn: Option<MoveFn>,
        intermediary_move_fn: Option<MoveFn>,
    ) -> Option<NonNull<u8>> {
        // No block state changes when the byte count is unchanged: the
        // move is purely intra-buffer, so it can run without the lock.
        if let Some(old_ptr) = ptr {
            if from_bytes == to_bytes && from_bytes != 0 {
                // SAFETY: old_ptr is reused as its own destination; the
                // retained ranges describe offsets within that one span.
                unsafe {
                    realloc_engine::move_retained_ranges(
                        old_ptr,
                        old_ptr,
                        keep,
                        size_of,
                        is_trivial,
                        move_fn,
                        intermediary_move_fn,
                    )
                };
                return Some(old_ptr);
            }
        }
        self.inner
            .lock()
            .reallocate(ptr, hint, from_bytes, to_bytes, keep, alignment, size_of, is_trivial, move_fn, intermediary_move_fn)
    }
}
