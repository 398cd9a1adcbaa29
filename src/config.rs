//! Plain, `Copy` pool configuration. This crate is an embedded systems
//! library, not a standalone service, so there is no configuration-file
//! format to parse, callers build one of these directly.

/// Parameters a [`Pool`](crate::pool::Pool) is constructed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Requests at or above this size get their own dedicated block.
    /// Also the rounding unit for fresh blocks provisioned below that
    /// threshold.
    pub page_size: usize,
    /// Distinguishes pools sharing a page size in the static registry.
    pub pool_id: u32,
    /// Floor every alignment request is raised to.
    pub min_alignment: usize,
    /// Every allocation size is rounded up to a multiple of this.
    pub byte_rounding: usize,
}

impl PoolConfig {
    pub const fn new(page_size: usize, pool_id: u32) -> Self {
        PoolConfig { page_size, pool_id, min_alignment: 1, byte_rounding: 1 }
    }

    pub const fn with_min_alignment(mut self, min_alignment: usize) -> Self {
        self.min_alignment = min_alignment;
        self
    }

    pub const fn with_byte_rounding(mut self, byte_rounding: usize) -> Self {
        self.byte_rounding = byte_rounding;
        self
    }
}
