//! Overlap-safe relocation of the two retained sub-ranges a structural
//! reallocate keeps alive.
//!
//! [`Block::try_reallocate`](crate::block::Block::try_reallocate) only
//! chooses *where* the new buffer lands; this module does the actual
//! byte-for-byte (or element-for-element) move once a destination is known.

use std::ptr::NonNull;

/// One of the two spans a reallocate keeps alive across the move.
///
/// `from_offset`/`to_offset` are signed byte offsets from the aligned
/// user-visible buffer start, not absolute addresses; a retained range can
/// move from the tail of the old buffer to the head of the new one just as
/// easily as it can stay put.
#[derive(Debug, Clone, Copy)]
pub struct RetainedRange {
    pub keep_size: usize,
    pub from_offset: isize,
    pub to_offset: isize,
    pub count: usize,
}

/// A single-element move, supplied by the caller for non-trivially-copyable
/// element types. Signature matches `memcpy`'s argument order: destination
/// first, source second.
pub type MoveFn = unsafe fn(*mut u8, *mut u8);

/// Move both retained ranges from `from_ptr` into `to_ptr`.
///
/// # Safety
/// `from_ptr`/`to_ptr` plus each range's offsets and `keep_size` must
/// describe byte spans that are valid to read (from) and write (to) for
/// the duration of the call. If `is_trivial` is false, `move_fn` and
/// `intermediary_move_fn` must both be set and must each safely move one
/// `size_of`-byte element from its second argument to its first.
pub unsafe fn move_retained_ranges(
    from_ptr: NonNull<u8>,
    to_ptr: NonNull<u8>,
    mut ranges: [RetainedRange; 2],
    size_of: usize,
    is_trivial: bool,
    move_fn: Option<MoveFn>,
    intermediary_move_fn: Option<MoveFn>,
) {
    debug_assert!(
        is_trivial || (move_fn.is_some() && intermediary_move_fn.is_some()),
        "non-trivial element moves require both callbacks"
    );

    // Orientation selection: process the sub-range whose destination comes
    // first, so moving it can never overwrite bytes the other one still
    // needs to read.
    let dest_addr = |r: &RetainedRange| (to_ptr.as_ptr() as isize + r.to_offset) as usize;
    if dest_addr(&ranges[1]) < dest_addr(&ranges[0]) {
        ranges.swap(0, 1);
    }

    for range in ranges {
        move_one_range(from_ptr, to_ptr, range, size_of, is_trivial, move_fn, intermediary_move_fn);
    }
}

fn move_one_range(
    from_ptr: NonNull<u8>,
    to_ptr: NonNull<u8>,
    range: RetainedRange,
    size_of: usize,
    is_trivial: bool,
    move_fn: Option<MoveFn>,
    intermediary_move_fn: Option<MoveFn>,
) {
    if range.keep_size == 0 {
        return;
    }
    // SAFETY: offsets describe valid positions within caller-provided spans.
    let src = unsafe { from_ptr.as_ptr().offset(range.from_offset) };
    let dest = unsafe { to_ptr.as_ptr().offset(range.to_offset) };
    if src == dest {
        return;
    }

    if is_trivial {
        // SAFETY: caller's contract guarantees both spans are valid for
        // keep_size bytes; ptr::copy handles overlap correctly on its own.
        unsafe { std::ptr::copy(src, dest, range.keep_size) };
        return;
    }

    let move_fn = move_fn.expect("move_fn required for non-trivial element types");
    let intermediary_move_fn = intermediary_move_fn.expect("intermediary_move_fn required for non-trivial element types");

    let src_addr = src as usize;
    let dest_addr = dest as usize;
    let src_end = src_addr + range.keep_size;

    // Forward is safe unless dest lands strictly inside the source span,
    // in which case a forward pass would overwrite elements not yet read.
    let forward = dest_addr <= src_addr || dest_addr >= src_end;
    let overlap_within_one_element = dest_addr.abs_diff(src_addr) < size_of;
    let callback = if overlap_within_one_element { intermediary_move_fn } else { move_fn };

    let indices: Box<dyn Iterator<Item = usize>> =
        if forward { Box::new(0..range.count) } else { Box::new((0..range.count).rev()) };

    for i in indices {
        let off = (i * size_of) as isize;
        // SAFETY: i < count keeps both pointers within the caller-asserted
        // spans; direction was chosen above to avoid reading already-
        // overwritten elements.
        unsafe { callback(dest.offset(off), src.offset(off)) };
    }
}
