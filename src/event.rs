//! The event record: a header prefixed to the user payload, plus the
//! intrusive links that thread it through either the slab free list or the
//! pending-event queue (never both at once — invariant I2 in spec.md §3).

use core::ptr::NonNull;

use crate::tick::Tick;

/// Callback invoked by the dispatch loop. Receives a raw pointer to the
/// payload that follows the header, exactly as `original_source/equeue.h`'s
/// `void (*cb)(void *)`.
pub type Callback = unsafe fn(*mut u8);

/// Destructor invoked exactly once when a payload is torn down: on normal
/// dispatch of a one-shot event, on `dealloc`, on a successful `cancel`, or
/// during queue `destroy`.
pub type Dtor = unsafe fn(*mut u8);

pub(crate) type Link = Option<NonNull<EventHeader>>;

/// Where an event is currently referenced from, enabling O(1) unlink
/// without a search (spec.md §3 invariant I5, §9 design note: "model this
/// with ... a tagged enum" in place of an untyped back-pointer).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum RefSlot {
    /// Not linked into the pending queue at all.
    Detached,
    /// Referenced from the queue's own `head` field.
    Root,
    /// Referenced from another event's `next` field (this event is a slot
    /// head).
    Next(NonNull<EventHeader>),
    /// Referenced from another event's `sibling` field (this event is a
    /// same-deadline chain follower).
    Sibling(NonNull<EventHeader>),
}

/// Header prefixed to every event's payload. `size == 0` marks a *static*
/// event whose storage is owned by the caller rather than the slab
/// (spec.md §4.3).
///
/// Public so a caller can embed one in its own static storage for
/// `EventQueue::post_static`; the intrusive link fields stay crate-private.
#[repr(C)]
pub struct EventHeader {
    pub size: usize,
    /// Generation stamp, bumped on every post; cross-checked against
    /// [`crate::id::EventId::stamp`] to reject stale handles.
    pub(crate) id: u8,
    pub(crate) deadline: Tick,
    /// `< 0` one-shot, `>= 0` re-arm period in ms. Never `0` (rejected at
    /// `set_period`/`call_every`, see SPEC_FULL.md §9).
    pub(crate) period: i32,
    pub(crate) dtor: Option<Dtor>,
    pub(crate) cb: Option<Callback>,
    pub(crate) next: Link,
    pub(crate) sibling: Link,
    pub(crate) link_ref: RefSlot,
}

pub(crate) const ONE_SHOT: i32 = -1;

impl EventHeader {
    pub const fn new(size: usize) -> Self {
        EventHeader {
            size,
            id: 1,
            deadline: Tick(0),
            period: ONE_SHOT,
            dtor: None,
            cb: None,
            next: None,
            sibling: None,
            link_ref: RefSlot::Detached,
        }
    }

    #[inline]
    pub fn is_static(&self) -> bool {
        self.size == 0
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.link_ref != RefSlot::Detached
    }

    /// Pointer to the payload immediately following this header.
    #[inline]
    pub unsafe fn payload(this: NonNull<EventHeader>) -> *mut u8 {
        this.as_ptr().add(1) as *mut u8
    }

    /// Recover the header from a payload pointer previously handed to the
    /// caller by `alloc`/`post`.
    #[inline]
    pub unsafe fn from_payload(payload: NonNull<u8>) -> NonNull<EventHeader> {
        NonNull::new_unchecked((payload.as_ptr() as *mut EventHeader).sub(1))
    }

    /// Run the destructor, if any, exactly once.
    pub unsafe fn run_dtor(this: NonNull<EventHeader>) {
        if let Some(dtor) = (*this.as_ptr()).dtor.take() {
            dtor(EventHeader::payload(this));
        }
    }
}

/// Round `n` up to the alignment of a `usize`, matching
/// `original_source/equeue.c`'s `equeue_mem_alloc` rounding.
#[inline]
pub(crate) const fn round_up_word(n: usize) -> usize {
    let word = core::mem::align_of::<usize>();
    (n + word - 1) & !(word - 1)
}

#[inline]
pub(crate) const fn header_size() -> usize {
    round_up_word(core::mem::size_of::<EventHeader>())
}
