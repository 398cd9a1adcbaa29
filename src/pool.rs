//! The Block Pool: owns every mapped [`Block`], dispatches allocate/free/
//! reallocate to the right one, provisions fresh blocks from the system, and
//! retires drained ones.

use std::ptr::NonNull;

use log::{debug, trace, warn};

use crate::align;
use crate::block::Block;
use crate::config::PoolConfig;
use crate::error::ProvisionError;
use crate::realloc_engine::{self, RetainedRange};
use crate::sorted_array::SortedArray;
use crate::sys;

/// How many most-recently-touched blocks [`Pool::allocate`] probes before
/// giving up and provisioning a fresh one.
const FRESHNESS_PROBE_LIMIT: usize = 10;

/// A lightweight, `Copy` reference to a block living at `blocks[slot]`.
/// Kept in two independently ordered arrays so the pool never has to move
/// the (non-`Copy`) [`Block`] itself to re-sort an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlockHandle {
    base_addr: usize,
    slot: usize,
}

pub struct Pool {
    config: PoolConfig,
    blocks: Vec<Block>,
    by_address: SortedArray<BlockHandle>,
    by_freshness: SortedArray<BlockHandle>,
}

fn div_ceil(n: usize, d: usize) -> usize {
    (n + d - 1) / d
}

impl Pool {
    pub fn new(config: PoolConfig) -> Self {
        Pool {
            config,
            blocks: Vec::new(),
            by_address: SortedArray::new(),
            by_freshness: SortedArray::new(),
        }
    }

    fn provision_block(&mut self, bytes: usize, fully_consumed: bool) -> Result<usize, ProvisionError> {
        let base = sys::map_pages(bytes)?;
        let block = if fully_consumed {
            Block::new_fully_consumed(base, bytes)
        } else {
            Block::new_free(base, bytes)
        };
        let slot = self.blocks.len();
        self.blocks.push(block);

        let handle = BlockHandle { base_addr: base.as_ptr() as usize, slot };
        let addr_idx = self.by_address.lower_bound(|h| h.base_addr.cmp(&handle.base_addr));
        self.by_address.insert_at(addr_idx, handle);
        self.by_freshness.insert_at(0, handle);

        debug!(
            "pool {}: provisioned block {:#x} ({bytes} bytes), now {} blocks",
            self.config.pool_id,
            handle.base_addr,
            self.blocks.len()
        );
        Ok(slot)
    }

    fn block_index_at_addr(&self, addr: usize) -> Option<usize> {
        let after = self.by_address.partition_point(|h| h.base_addr <= addr);
        if after == 0 {
            return None;
        }
        let handle = *self.by_address.get(after - 1).unwrap();
        if self.blocks[handle.slot].contains_addr(addr) {
            Some(handle.slot)
        } else {
            None
        }
    }

    fn freshness_position_of(&self, slot: usize) -> Option<usize> {
        (0..self.by_freshness.len()).find(|&i| self.by_freshness.get(i).unwrap().slot == slot)
    }

    /// Promote a successful probe one step toward the front (single swap,
    /// not a full bubble), so blocks that keep satisfying requests cluster
    /// near the head of the next probe.
    fn promote_freshness(&mut self, position: usize) {
        if position > 0 {
            let items = &mut self.by_freshness;
            let a = *items.get(position).unwrap();
            let b = *items.get(position - 1).unwrap();
            *items.get_mut(position).unwrap() = b;
            *items.get_mut(position - 1).unwrap() = a;
        }
    }

    /// After a free, nudge the block one step toward the tail if it now
    /// holds more free space than its neighbor, a single linear-pass swap,
    /// biasing emptier blocks toward the back of the probe order so fuller
    /// blocks get reused first and empty ones drift toward retirement.
    fn demote_freshness_if_emptier(&mut self, slot: usize) {
        let Some(position) = self.freshness_position_of(slot) else { return };
        if position + 1 >= self.by_freshness.len() {
            return;
        }
        let here = *self.by_freshness.get(position).unwrap();
        let next = *self.by_freshness.get(position + 1).unwrap();
        if self.blocks[here.slot].free_bytes() > self.blocks[next.slot].free_bytes() {
            *self.by_freshness.get_mut(position).unwrap() = next;
            *self.by_freshness.get_mut(position + 1).unwrap() = here;
        }
    }

    fn retire_block(&mut self, slot: usize) {
        let base = self.blocks[slot].backing_addr();
        let len = self.blocks[slot].total_bytes();

        let addr_idx = self
            .by_address
            .search_by(|h| h.base_addr.cmp(&base))
            .expect("retiring block must be present in by_address");
        self.by_address.remove_at(addr_idx);

        let fresh_idx = self.freshness_position_of(slot).expect("retiring block must be present in by_freshness");
        self.by_freshness.remove_at(fresh_idx);

        let last = self.blocks.len() - 1;
        self.blocks.swap_remove(slot);
        if slot != last {
            // swap_remove moved the block that used to live at `last` into
            // `slot`; every handle referencing `last` now points to `slot`.
            // Both arrays are small (handles, not blocks), so a linear
            // rewrite beats threading slot-renumbering through the
            // base_addr-sorted binary search above.
            for i in 0..self.by_address.len() {
                if self.by_address.get(i).unwrap().slot == last {
                    self.by_address.get_mut(i).unwrap().slot = slot;
                    break;
                }
            }
            if let Some(i) = self.freshness_position_of(last) {
                self.by_freshness.get_mut(i).unwrap().slot = slot;
            }
        }

        let base_ptr = unsafe { NonNull::new_unchecked(base as *mut u8) };
        // SAFETY: this is the exact (base, len) provision_block mapped, and
        // nothing references it any more once it's removed from both lists.
        unsafe { sys::unmap_pages(base_ptr, len) };
        debug!("pool {}: retired block {:#x}, {} blocks remain", self.config.pool_id, base, self.blocks.len());
    }

    // ---- Core API (§6.1) ----

    /// Raise `size` to the rules in §6.1: at least 1, at least
    /// `min_alignment` below where alignment applies, and rounded up to a
    /// multiple of `byte_rounding`.
    fn round_size(&self, size: usize) -> usize {
        let size = size.max(1);
        if self.config.byte_rounding <= 1 {
            size
        } else {
            div_ceil(size, self.config.byte_rounding) * self.config.byte_rounding
        }
    }

    fn round_alignment(&self, alignment: usize) -> usize {
        alignment.max(self.config.min_alignment)
    }

    pub fn allocate(&mut self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        let size = self.round_size(size);
        let alignment = self.round_alignment(alignment);

        if alignment < 2 {
            return self.allocate_raw(size);
        }
        let raw_size = align::padded_size(size, alignment);
        let raw_base = self.allocate_raw(raw_size)?;
        let (aligned_addr, offset) = align::align_forward(raw_base.as_ptr() as usize, alignment);
        // SAFETY: offset >= 1, so aligned_addr - 1 lies within the raw span.
        unsafe { *((aligned_addr - 1) as *mut u8) = offset };
        // SAFETY: aligned_addr lies within the raw span just allocated.
        Some(unsafe { NonNull::new_unchecked(aligned_addr as *mut u8) })
    }

    fn allocate_raw(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size >= self.config.page_size {
            let slot = match self.provision_block(size, true) {
                Ok(slot) => slot,
                Err(e) => {
                    warn!("pool {}: {e}", self.config.pool_id);
                    return None;
                }
            };
            trace!("pool {}: oversize allocation of {size} bytes in dedicated block", self.config.pool_id);
            // a fully-consumed block has no free-region entries at all; its
            // whole backing span *is* the allocation.
            let base = self.blocks[slot].backing_addr();
            return Some(unsafe { NonNull::new_unchecked(base as *mut u8) });
        }

        let probe_count = self.by_freshness.len().min(FRESHNESS_PROBE_LIMIT);
        for i in 0..probe_count {
            let handle = *self.by_freshness.get(i).unwrap();
            if let Some(p) = self.blocks[handle.slot].allocate(size) {
                self.promote_freshness(i);
                return Some(p);
            }
        }

        let bytes = div_ceil(size, self.config.page_size) * self.config.page_size;
        let slot = match self.provision_block(bytes, false) {
            Ok(slot) => slot,
            Err(e) => {
                warn!("pool {}: {e}", self.config.pool_id);
                return None;
            }
        };
        self.blocks[slot].allocate(size)
    }

    pub fn free(&mut self, p: NonNull<u8>, size: usize, alignment: usize) {
        let alignment = self.round_alignment(alignment);
        let size = self.round_size(size);

        let (raw_addr, raw_size) = if alignment >= 2 {
            // SAFETY: a pointer this crate returned always has the offset
            // byte written immediately below it.
            let offset = unsafe { *((p.as_ptr() as usize - 1) as *const u8) };
            (align::unalign(p.as_ptr() as usize, offset), align::padded_size(size, alignment))
        } else {
            (p.as_ptr() as usize, size)
        };

        let Some(slot) = self.block_index_at_addr(raw_addr) else {
            warn!("pool {}: free() of {:#x} does not belong to this pool, ignored", self.config.pool_id, raw_addr);
            return;
        };

        // SAFETY: raw_addr came from unaligning a pointer this pool handed
        // out, so it is non-null.
        let raw_ptr = unsafe { NonNull::new_unchecked(raw_addr as *mut u8) };
        self.blocks[slot].free(raw_ptr, raw_size);

        if self.blocks[slot].is_fully_free() && self.blocks.len() > 1 {
            self.retire_block(slot);
        } else {
            self.demote_freshness_if_emptier(slot);
        }
    }

    /// Structural reallocate. `keep` describes the two retained sub-ranges
    /// in aligned/user-visible address space, as required by §4.3.
    #[allow(clippy::too_many_arguments)]
    pub fn reallocate(
        &mut self,
        ptr: Option<NonNull<u8>>,
        hint: Option<NonNull<u8>>,
        from_bytes: usize,
        to_bytes: usize,
        keep: [RetainedRange; 2],
        alignment: usize,
        size_of: usize,
        is_trivial: bool,
        move_fn: Option<realloc_engine::MoveFn>,
        intermediary_move_fn: Option<realloc_engine::MoveFn>,
    ) -> Option<NonNull<u8>> {
        let Some(old_ptr) = ptr else {
            return self.allocate(to_bytes, alignment);
        };

        let alignment = self.round_alignment(alignment);
        let from_bytes = self.round_size(from_bytes);
        let to_bytes = self.round_size(to_bytes);

        if from_bytes == to_bytes {
            // SAFETY: old_ptr's span is exactly reused as its own
            // destination; both are the same allocation.
            unsafe {
                realloc_engine::move_retained_ranges(old_ptr, old_ptr, keep, size_of, is_trivial, move_fn, intermediary_move_fn)
            };
            return Some(old_ptr);
        }

        let (old_raw_ptr, raw_from_bytes) = if alignment >= 2 {
            // SAFETY: old_ptr was returned by this pool with alignment >= 2.
            let offset = unsafe { *((old_ptr.as_ptr() as usize - 1) as *const u8) };
            let raw_addr = align::unalign(old_ptr.as_ptr() as usize, offset);
            (raw_addr, align::padded_size(from_bytes, alignment))
        } else {
            (old_ptr.as_ptr() as usize, from_bytes)
        };
        let raw_to_bytes = if alignment >= 2 { align::padded_size(to_bytes, alignment) } else { to_bytes };

        let Some(slot) = self.block_index_at_addr(old_raw_ptr) else {
            warn!("pool {}: reallocate() of foreign pointer {:#x}", self.config.pool_id, old_raw_ptr);
            return None;
        };

        // SAFETY: old_raw_ptr is the unaligned base of a live allocation.
        let old_raw_nn = unsafe { NonNull::new_unchecked(old_raw_ptr as *mut u8) };

        let keep_hints = [keep_front_hint(old_raw_ptr, &keep[0]), keep_front_hint(old_raw_ptr, &keep[1])];
        // larger retained range tried first, per §4.2.4 step 3.
        let keep_hints = if keep[1].keep_size > keep[0].keep_size {
            [keep_hints[1], keep_hints[0]]
        } else {
            keep_hints
        };
        let raw_hint = hint.map(|h| {
            // the caller-supplied hint is already expressed as a raw
            // placement target, independent of any alignment offset.
            unsafe { NonNull::new_unchecked(h.as_ptr()) }
        });

        let new_raw_ptr = self.blocks[slot].try_reallocate(old_raw_nn, raw_from_bytes, raw_to_bytes, raw_hint, keep_hints);

        let new_raw_ptr = match new_raw_ptr {
            Some(p) => p,
            None => {
                // the in-block attempt already freed the old span. Try a
                // fresh block elsewhere in the pool; the retained ranges are
                // moved below via the usual path, through move_fn, exactly
                // as the in-block success case. If even provisioning a fresh
                // block fails, attempt to restore the original allocation
                // before giving up entirely.
                let bytes = div_ceil(raw_to_bytes, self.config.page_size) * self.config.page_size;
                match self.provision_block(bytes, false) {
                    Ok(new_slot) => self.blocks[new_slot]
                        .allocate(raw_to_bytes)
                        .expect("a block freshly sized for this request must satisfy it"),
                    Err(e) => {
                        warn!("pool {}: {e} during reallocate, attempting restore", self.config.pool_id);
                        // whether or not the restore succeeds, the reallocate
                        // itself has failed and must report None: a restored
                        // span keeps old_ptr valid at its *original* size, not
                        // the caller's requested to_bytes, so handing it back
                        // as if it were the new allocation would let a caller
                        // read or write past the real end of the buffer.
                        self.blocks[slot].allocate_at_hint(raw_from_bytes, old_raw_nn);
                        return None;
                    }
                }
            }
        };

        let new_aligned_addr = if alignment >= 2 {
            let (addr, offset) = align::align_forward(new_raw_ptr.as_ptr() as usize, alignment);
            // SAFETY: offset >= 1 so addr - 1 lies within the raw span.
            unsafe { *((addr - 1) as *mut u8) = offset };
            addr
        } else {
            new_raw_ptr.as_ptr() as usize
        };

        // SAFETY: new_aligned_addr lies within the block just placed into.
        let new_aligned_ptr = unsafe { NonNull::new_unchecked(new_aligned_addr as *mut u8) };
        // SAFETY: both spans are valid for the reallocate's retained ranges
        // per the caller's contract; old_ptr's bytes are still intact since
        // nothing has reused that memory since it was freed above.
        unsafe {
            realloc_engine::move_retained_ranges(
                old_ptr,
                new_aligned_ptr,
                keep,
                size_of,
                is_trivial,
                move_fn,
                intermediary_move_fn,
            )
        };
        Some(new_aligned_ptr)
    }
}

/// Candidate base such that a retained range stays at its original absolute
/// (raw) address, per §4.2.4 step 2/3. Algebraically this is
/// `old_raw_ptr + from_offset - to_offset`: the alignment-offset terms in
/// the source derivation cancel, since the same offset is added to convert
/// to user space and subtracted to convert back.
fn keep_front_hint(old_raw_ptr: usize, range: &RetainedRange) -> Option<NonNull<u8>> {
    if range.keep_size == 0 {
        return None;
    }
    let candidate = (old_raw_ptr as isize + range.from_offset - range.to_offset) as usize;
    NonNull::new(candidate as *mut u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> PoolConfig {
        PoolConfig::new(4096, 0)
    }

    #[test]
    fn allocate_and_free_roundtrip() {
        let mut pool = Pool::new(test_config());
        let p = pool.allocate(128, 1).unwrap();
        pool.free(p, 128, 1);
        // the sole block never retires, even fully drained; retirement
        // requires at least one sibling block to fall back on.
        assert_eq!(pool.blocks.len(), 1);
        assert!(pool.blocks[0].is_fully_free());
    }

    #[test]
    fn second_block_retires_once_fully_drained() {
        let mut pool = Pool::new(test_config());
        let a = pool.allocate(128, 1).unwrap();
        // force a second block by exhausting the first one's page.
        let _b = pool.allocate(4096, 1).unwrap();
        assert_eq!(pool.blocks.len(), 2);
        pool.free(a, 128, 1);
        assert_eq!(pool.blocks.len(), 1, "the now-empty non-oversize block should retire");
    }

    #[test]
    fn oversize_allocation_gets_its_own_block() {
        let mut pool = Pool::new(test_config());
        let p = pool.allocate(8192, 1).unwrap();
        assert_eq!(pool.blocks.len(), 1);
        assert_eq!(pool.blocks[0].total_bytes(), 8192);
        pool.free(p, 8192, 1);
    }

    #[test]
    fn alignment_shim_offset_byte_roundtrips() {
        let mut pool = Pool::new(test_config());
        let p = pool.allocate(50, 16).unwrap();
        assert_eq!(p.as_ptr() as usize % 16, 0);
        pool.free(p, 50, 16);
    }

    #[test]
    fn same_size_reallocate_is_pointer_stable() {
        let mut pool = Pool::new(test_config());
        let p = pool.allocate(64, 1).unwrap();
        let identity = [
            RetainedRange { keep_size: 64, from_offset: 0, to_offset: 0, count: 64 },
            RetainedRange { keep_size: 0, from_offset: 0, to_offset: 0, count: 0 },
        ];
        let p2 = pool.reallocate(Some(p), None, 64, 64, identity, 1, 1, true, None, None).unwrap();
        assert_eq!(p, p2);
        pool.free(p2, 64, 1);
    }

    #[test]
    fn growing_reallocate_preserves_retained_bytes() {
        let mut pool = Pool::new(test_config());
        let p = pool.allocate(40, 1).unwrap();
        // SAFETY: p is freshly allocated for 40 bytes.
        unsafe {
            for i in 0..40u8 {
                *p.as_ptr().add(i as usize) = i;
            }
        }
        let keep = [
            RetainedRange { keep_size: 40, from_offset: 0, to_offset: 0, count: 40 },
            RetainedRange { keep_size: 0, from_offset: 0, to_offset: 0, count: 0 },
        ];
        let grown = pool.reallocate(Some(p), None, 40, 200, keep, 1, 1, true, None, None).unwrap();
        // SAFETY: grown is valid for 200 bytes, the first 40 retained.
        unsafe {
            for i in 0..40u8 {
                assert_eq!(*grown.as_ptr().add(i as usize), i);
            }
        }
        pool.free(grown, 200, 1);
    }
}
