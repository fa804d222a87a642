//! The background hook: lets a host event loop that isn't running this
//! crate's own `dispatch` wake up exactly when it needs to.
//!
//! Grounded on `sched/mod.rs`'s tick-driven scheduler in the teacher
//! kernel, which exposes the "when do you next need the CPU" question
//! rather than assuming it owns the run loop outright — the same shape
//! this crate needs so an embedder can integrate the queue into an
//! existing reactor instead of calling `dispatch` in a dedicated thread.

use core::ptr::null_mut;

/// Raw function-pointer-plus-context hook, called with the number of
/// milliseconds until the queue's next deadline (`None` if the queue has
/// gone empty), every time that value changes.
pub(crate) struct BackgroundHook {
    update: Option<unsafe fn(*mut u8, Option<u32>)>,
    ctx: *mut u8,
}

// SAFETY: `ctx` is an opaque token the embedder chose to hand back to
// itself; this crate never dereferences it.
unsafe impl Send for BackgroundHook {}

impl BackgroundHook {
    pub const fn none() -> Self {
        BackgroundHook {
            update: None,
            ctx: null_mut(),
        }
    }

    pub fn set(&mut self, update: Option<unsafe fn(*mut u8, Option<u32>)>, ctx: *mut u8) {
        self.update = update;
        self.ctx = ctx;
    }

    /// Invoke the hook, if any, with the current time-to-next-deadline.
    pub fn notify(&self, next_in_ms: Option<u32>) {
        if let Some(f) = self.update {
            unsafe { f(self.ctx, next_in_ms) };
        }
    }
}
