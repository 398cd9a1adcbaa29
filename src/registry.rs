//! Process-wide static pools, keyed by `(page_size, pool_id)`.
//!
//! Most callers want one pool per size class living for the life of the
//! process; this is the lazy, `OnceLock`-backed cache that avoids wiring
//! that lifetime management through every call site.

use std::collections::HashMap;
use std::sync::OnceLock;

use spin::Mutex;

use crate::config::PoolConfig;
use crate::thread_safe::ThreadSafePool;

static REGISTRY: OnceLock<Mutex<HashMap<(usize, u32), &'static ThreadSafePool>>> = OnceLock::new();

/// The process-wide pool for `(page_size, pool_id)`, creating and leaking
/// it on first use. Leaking is deliberate: a static pool registry has no
/// natural point at which to tear a pool down, and a `'static` reference is
/// the cheapest way to hand every caller a stable handle.
pub fn static_pool(config: PoolConfig) -> &'static ThreadSafePool {
    let registry = REGISTRY.get_or_init(|| Mutex::new(HashMap::new()));
    let key = (config.page_size, config.pool_id);

    let mut map = registry.lock();
    if let Some(pool) = map.get(&key) {
        return pool;
    }
    let pool: &'static ThreadSafePool = Box::leak(Box::new(ThreadSafePool::new(config)));
    map.insert(key, pool);
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_lookups_return_the_same_pool() {
        let a = static_pool(PoolConfig::new(4096, 7));
        let b = static_pool(PoolConfig::new(4096, 7));
        assert!(std::ptr::eq(a, b));
    }

    #[test]
    fn different_pool_ids_get_different_pools() {
        let a = static_pool(PoolConfig::new(4096, 1));
        let b = static_pool(PoolConfig::new(4096, 2));
        assert!(!std::ptr::eq(a, b));
    }
}
