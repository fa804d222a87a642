//! Error taxonomy.
//!
//! Mirrors `original_source/equeue_util.h`'s `enum equeue_error`: a small,
//! fixed set of negative sentinels in the C API becomes a plain `enum` here.
//! No `thiserror` or similar derive is pulled in — the teacher's ambient
//! style favors hand-rolled `Display` over macro-generated error types for
//! small, closed error sets (see DESIGN.md).

use core::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Error {
    /// The slab has no block large enough to satisfy the allocation.
    NoMem,
    /// The id does not refer to an event currently pending on the queue.
    NoEnt,
    /// The operation's arguments are invalid for the event's current state
    /// (e.g. re-posting a static event that is already pending).
    Inval,
    /// `dispatch` returned because its timeout elapsed.
    TimedOut,
    /// `dispatch` returned because `break_()` was called.
    Break,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::NoMem => "out of memory",
            Error::NoEnt => "no such event",
            Error::Inval => "invalid parameter",
            Error::TimedOut => "timed out",
            Error::Break => "dispatch loop broken",
        };
        f.write_str(msg)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
