//! Closure-based sugar over `alloc`/`post`: `call`/`call_in`/`call_every`.
//!
//! `original_source/equeue.c` packs a function pointer and a `void *`
//! argument side by side into the event payload (its `ecallback` struct) so
//! a one-off callback doesn't need its own named type. Rust lets us do
//! better: any `FnMut() + Send + 'static` closure can be written directly
//! into the slab-allocated payload, with a monomorphized trampoline pair
//! (`invoke`/`drop_in_place`) standing in for the header's `cb`/`dtor` slots.
//! The closure's captures live inline in the slab, never on a heap.

use core::mem::size_of;

/// Run the closure stored at `payload` by value, matching [`crate::event::Callback`].
pub(crate) unsafe fn invoke<F: FnMut()>(payload: *mut u8) {
    let f = &mut *(payload as *mut F);
    f();
}

/// Drop the closure stored at `payload`, matching [`crate::event::Dtor`].
pub(crate) unsafe fn drop_closure<F>(payload: *mut u8) {
    core::ptr::drop_in_place(payload as *mut F);
}

#[inline]
pub(crate) const fn closure_payload_size<F>() -> usize {
    size_of::<F>()
}
