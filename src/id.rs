//! Unique-id encoding and the ABA-safe handle returned to callers.
//!
//! Ported from `original_source/equeue_util.h`'s `equeue_npw2` (next
//! power-of-two exponent, there computed with `__builtin_clz`, here with
//! `u32::leading_zeros` — the direct `core`-only equivalent) and from
//! spec.md §4.3's packing scheme `(generation << npw2) | buffer_offset`.
//!
//! Static events don't live inside the slab buffer at all (their storage is
//! caller-owned), so a byte offset is meaningless for them. Rather than
//! hashing their address into the same offset space (which would make
//! `cancel`/`time_left` unable to ever recover the real pointer — not just
//! a rare collision but outright breakage), a static event's locator keeps
//! its address directly. Both locators are folded into one opaque
//! `EventId`, matching the original C API's single `equeue_id_t` in
//! behavior if not in bit layout (see DESIGN.md).

use core::ptr::NonNull;

use crate::event::EventHeader;

/// `ceil(log2(capacity))`, the number of low bits of a dynamic id reserved
/// for the buffer offset.
#[inline]
pub(crate) fn npw2(capacity: u32) -> u8 {
    debug_assert!(capacity > 0, "queue capacity must be nonzero");
    (u32::BITS - (capacity - 1).leading_zeros()) as u8
}

/// Bump the 8-bit reuse counter, wrapping to `1` (never `0`) once it would
/// no longer fit the bits left over by `npw2` in a 32-bit dynamic id. This
/// is the documented stale-handle collision window from spec.md §9.
pub(crate) fn bump_id(current: u8, npw2: u8) -> u8 {
    let max_id = if npw2 >= 32 {
        0
    } else {
        (1u32 << (32 - npw2)).saturating_sub(1).min(u8::MAX as u32)
    } as u8;
    if current == 0 || current >= max_id {
        1
    } else {
        current + 1
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Locator {
    /// Packed `(generation << npw2) | offset` into the slab buffer.
    Offset(u32),
    /// Caller-owned storage; the pointer doubles as the locator since it
    /// never lives inside the slab.
    Static(NonNull<EventHeader>),
}

/// Opaque handle returned by `post`/`call*`, accepted by `cancel` and
/// `time_left`. Valid only for the queue that produced it.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct EventId {
    pub(crate) locator: Locator,
    pub(crate) stamp: u8,
}

// SAFETY: the enclosed pointer is only ever dereferenced inside the
// originating `EventQueue`'s locked methods, under the same discipline as
// every other cross-context pointer this crate passes around (see
// `sched/task.rs`'s `NonNull<Task>` table in the teacher kernel for the
// analogous pattern). The id itself is an inert bit pattern to callers.
unsafe impl Send for EventId {}
unsafe impl Sync for EventId {}

impl EventId {
    pub(crate) fn for_offset(generation_counter: u8, npw2: u8, offset: u32) -> EventId {
        let mask = if npw2 >= 32 { u32::MAX } else { (1u32 << npw2) - 1 };
        let packed = ((generation_counter as u32) << npw2) | (offset & mask);
        EventId {
            locator: Locator::Offset(packed),
            stamp: generation_counter,
        }
    }

    pub(crate) fn for_static(ptr: NonNull<EventHeader>, generation_counter: u8) -> EventId {
        EventId {
            locator: Locator::Static(ptr),
            stamp: generation_counter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn npw2_matches_ceil_log2() {
        assert_eq!(npw2(1), 0);
        assert_eq!(npw2(2), 1);
        assert_eq!(npw2(5), 3);
        assert_eq!(npw2(1024), 10);
        assert_eq!(npw2(1025), 11);
    }

    #[test]
    fn bump_id_skips_zero_and_wraps() {
        let npw2 = 4; // plenty of headroom, max_id caps at u8::MAX
        let mut id = 1u8;
        for _ in 0..300 {
            id = bump_id(id, npw2);
            assert_ne!(id, 0);
        }
    }

    #[test]
    fn bump_id_wraps_at_narrow_headroom() {
        // npw2 = 30 leaves only 2 bits (max value 3) for the counter.
        assert_eq!(bump_id(1, 30), 2);
        assert_eq!(bump_id(2, 30), 3);
        assert_eq!(bump_id(3, 30), 1); // wraps, never 0
    }
}
