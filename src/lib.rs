//! A page-based, general-purpose memory allocator.
//!
//! Clients request, release, and resize arbitrarily sized and aligned byte
//! regions. A [`Pool`](pool::Pool) satisfies requests from large pages
//! mapped from the system, tracks free regions within those pages with a
//! pair of sorted indices, coalesces adjacent freed regions, and supports a
//! *structural reallocate* that can grow, shrink, and simultaneously
//! rearrange two retained sub-ranges of a single logical buffer, copying
//! only the surviving bytes and preferring placement locations that avoid
//! moves entirely.
//!
//! The core allocator (everything in [`block`] and [`pool`]) is
//! single-threaded cooperative; [`thread_safe::ThreadSafePool`] is the
//! `spin::Mutex`-guarded wrapper most callers actually want, and
//! [`registry::static_pool`] hands out process-wide instances of it keyed
//! by `(page_size, pool_id)`.

pub mod align;
pub mod block;
pub mod config;
pub mod error;
pub mod free_region;
pub mod global_alloc;
pub mod pool;
pub mod realloc_engine;
pub mod registry;
pub mod sorted_array;
pub mod sys;
pub mod thread_safe;
pub mod typed;

pub use config::PoolConfig;
pub use error::ProvisionError;
pub use global_alloc::GlobalPool;
pub use pool::Pool;
pub use realloc_engine::RetainedRange;
pub use thread_safe::ThreadSafePool;

#[cfg(test)]
mod tests {
    use crate::config::PoolConfig;
    use crate::realloc_engine::RetainedRange;
    use crate::thread_safe::ThreadSafePool;

    fn scenario_pool() -> ThreadSafePool {
        ThreadSafePool::new(PoolConfig::new(4096, 900))
    }

    #[test]
    fn allocate_then_deallocate_a_single_byte() {
        let pool = scenario_pool();
        let p = pool.allocate(1, 1).unwrap();
        pool.free(p, 1, 1);
    }

    #[test]
    fn reallocate_identity_keep_descriptor_is_pointer_stable() {
        let pool = scenario_pool();
        let p = pool.allocate(100, 1).unwrap();
        let identity = [
            RetainedRange { keep_size: 100, from_offset: 0, to_offset: 0, count: 100 },
            RetainedRange { keep_size: 0, from_offset: 0, to_offset: 0, count: 0 },
        ];
        let p2 = pool.reallocate(Some(p), None, 100, 100, identity, 1, 1, true, None, None).unwrap();
        assert_eq!(p, p2);
        pool.free(p2, 100, 1);
    }

    #[test]
    fn grow_with_two_retained_sub_ranges_preserves_both() {
        let pool = scenario_pool();
        // 100 objects of 40 bytes (4000 bytes).
        let p = pool.allocate(4000, 1).unwrap();
        // SAFETY: p is valid for 4000 freshly allocated bytes.
        unsafe {
            for i in 0..4000usize {
                *p.as_ptr().add(i) = (i % 251) as u8;
            }
        }
        // grow to 200 objects of 40 bytes (8000 bytes): keep the first 100
        // items (40*100=4000 bytes) at offset 0, and move the last 60 items
        // (40*60=2400 bytes) from offset 1600 to offset 5600, opening a
        // 100-element gap between them.
        let keep = [
            RetainedRange { keep_size: 4000, from_offset: 0, to_offset: 0, count: 100 },
            RetainedRange { keep_size: 2400, from_offset: 1600, to_offset: 5600, count: 60 },
        ];
        let grown = pool.reallocate(Some(p), None, 4000, 8000, keep, 1, 40, true, None, None).unwrap();
        // SAFETY: grown is valid for 8000 bytes; both retained spans were
        // moved into it by the call above.
        unsafe {
            for i in 0..4000usize {
                assert_eq!(*grown.as_ptr().add(i), (i % 251) as u8);
            }
            for i in 0..2400usize {
                assert_eq!(*grown.as_ptr().add(5600 + i), ((1600 + i) % 251) as u8);
            }
        }
        pool.free(grown, 8000, 1);
    }

    #[test]
    fn shrink_then_free_returns_block_to_fully_free_state() {
        let pool = scenario_pool();
        let p = pool.allocate(1000, 1).unwrap();
        let keep = [
            RetainedRange { keep_size: 200, from_offset: 0, to_offset: 0, count: 200 },
            RetainedRange { keep_size: 0, from_offset: 0, to_offset: 0, count: 0 },
        ];
        let shrunk = pool.reallocate(Some(p), None, 1000, 200, keep, 1, 1, true, None, None).unwrap();
        pool.free(shrunk, 200, 1);
    }

    #[test]
    fn alignment_roundtrips_through_allocate_and_free() {
        let pool = scenario_pool();
        for &alignment in &[2usize, 8, 32, 128] {
            let p = pool.allocate(17, alignment).unwrap();
            assert_eq!(p.as_ptr() as usize % alignment, 0);
            pool.free(p, 17, alignment);
        }
    }

    #[test]
    fn many_interleaved_allocations_and_frees_stay_consistent() {
        let pool = scenario_pool();
        let mut live: Vec<(std::ptr::NonNull<u8>, usize)> = Vec::new();
        for round in 0..50 {
            let size = 8 + (round % 37);
            live.push((pool.allocate(size, 1).unwrap(), size));
            if round % 3 == 0 {
                if let Some((p, s)) = live.pop() {
                    pool.free(p, s, 1);
                }
            }
        }
        for (p, s) in live {
            pool.free(p, s, 1);
        }
    }
}
