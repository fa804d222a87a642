//! Cooperative, interrupt-safe event queue with bounded allocation, for
//! dispatch loops that must not touch a heap.
//!
//! The engine (this crate) never allocates beyond the fixed-capacity buffer
//! given to [`EventQueue::new`] and never assumes a particular OS: the
//! [`platform`] module is the only seam where a host supplies a clock, a
//! wakeup signal, and the two locks the engine needs.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

mod background;
mod callback;
pub mod error;
mod event;
mod id;
pub mod platform;
mod queue;
mod slab;
mod tick;

use core::cell::UnsafeCell;
use core::ptr::NonNull;

use background::BackgroundHook;
use id::{bump_id, npw2, Locator};
use platform::{Clock, Platform, RawMutex, Signal};
use queue::QueueState;
use slab::Slab;
use tick::{clamp, diff, Tick};

pub use error::Error;
pub use event::{Callback, Dtor, EventHeader};
pub use id::EventId;
pub use platform::SpinMutex;

#[cfg(any(test, feature = "std"))]
pub use platform::StdPlatform;

struct QueueCell {
    queue: QueueState,
    generation: u8,
    npw2: u8,
    breaking: bool,
}

/// A queue of deferred callbacks, dispatched in deadline order from a loop
/// the host drives by calling [`EventQueue::dispatch`].
///
/// `N` is the total byte capacity of the inline slab backing dynamically
/// allocated events (`alloc`/`post`/`call*`); events posted via
/// `post_static` live in caller-owned storage and don't consume it.
pub struct EventQueue<P: Platform, const N: usize> {
    clock: P::Clock,
    signal: P::Signal,
    queue_mutex: P::QueueMutex,
    mem_mutex: P::MemMutex,
    queue_cell: UnsafeCell<QueueCell>,
    mem_cell: UnsafeCell<Slab<N>>,
    background: UnsafeCell<BackgroundHook>,
}

// SAFETY: every field reachable through a shared `&EventQueue` is either
// immutable after construction or only mutated while holding the matching
// `RawMutex` guard, the same discipline `memory/frame_alloc.rs` uses for
// its `static mut` free list guarded by a spinlock.
unsafe impl<P: Platform, const N: usize> Sync for EventQueue<P, N> {}
unsafe impl<P: Platform, const N: usize> Send for EventQueue<P, N> {}

impl<P: Platform, const N: usize> Default for EventQueue<P, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Platform, const N: usize> EventQueue<P, N> {
    pub fn new() -> Self {
        EventQueue {
            clock: P::Clock::default(),
            signal: P::Signal::default(),
            queue_mutex: P::QueueMutex::new(),
            mem_mutex: P::MemMutex::new(),
            queue_cell: UnsafeCell::new(QueueCell {
                queue: QueueState::new(),
                generation: 1,
                npw2: npw2(N.max(1) as u32),
                breaking: false,
            }),
            mem_cell: UnsafeCell::new(Slab::new()),
            background: UnsafeCell::new(BackgroundHook::none()),
        }
    }

    fn with_queue<R>(&self, f: impl FnOnce(&mut QueueCell) -> R) -> R {
        let _guard = self.queue_mutex.lock();
        // SAFETY: exclusive access granted by `_guard`.
        f(unsafe { &mut *self.queue_cell.get() })
    }

    fn with_mem<R>(&self, f: impl FnOnce(&mut Slab<N>) -> R) -> R {
        let _guard = self.mem_mutex.lock();
        // SAFETY: exclusive access granted by `_guard`.
        f(unsafe { &mut *self.mem_cell.get() })
    }

    fn now(&self) -> Tick {
        Tick::new(self.clock.now_ms())
    }

    // ───── allocation ─────

    /// Allocate a dynamic event's payload from the inline slab. The
    /// returned pointer is not yet posted; use [`EventQueue::set_delay`],
    /// optionally [`EventQueue::set_period`]/[`EventQueue::set_dtor`], then
    /// [`EventQueue::post`].
    pub fn alloc(&self, payload_size: usize) -> Result<NonNull<u8>, Error> {
        self.with_mem(|slab| {
            let header = slab.alloc(payload_size)?;
            Ok(unsafe { NonNull::new_unchecked(EventHeader::payload(header)) })
        })
    }

    /// Free a payload previously returned by [`EventQueue::alloc`] that was
    /// never posted, or was posted and has since been dispatched or
    /// cancelled. Freeing a still-pending event is a logic error
    /// (`Error::Inval`).
    pub fn dealloc(&self, payload: NonNull<u8>) -> Result<(), Error> {
        let header = unsafe { EventHeader::from_payload(payload) };
        if unsafe { header.as_ref().is_pending() } {
            return Err(Error::Inval);
        }
        unsafe { EventHeader::run_dtor(header) };
        self.with_mem(|slab| slab.dealloc(header));
        Ok(())
    }

    /// Set an event's deadline to `ms` milliseconds from now. Converted to
    /// an absolute tick immediately, so a periodic event's later rearms
    /// (`deadline + period`) and an initial post share one comparison rule.
    pub fn set_delay(&self, payload: NonNull<u8>, ms: u32) {
        let deadline = self.now().wrapping_add(ms);
        unsafe {
            let header = EventHeader::from_payload(payload);
            (*header.as_ptr()).deadline = deadline;
        }
    }

    /// Set the rearm period in ms. `0` is rejected: a zero-period event
    /// would busy-fire every dispatch pass, treated here as a caller error
    /// rather than the original library's silent tight loop.
    pub fn set_period(&self, payload: NonNull<u8>, ms: i32) -> Result<(), Error> {
        if ms == 0 {
            return Err(Error::Inval);
        }
        unsafe {
            let header = EventHeader::from_payload(payload);
            (*header.as_ptr()).period = ms;
        }
        Ok(())
    }

    pub fn set_dtor(&self, payload: NonNull<u8>, dtor: Option<Dtor>) {
        unsafe {
            let header = EventHeader::from_payload(payload);
            (*header.as_ptr()).dtor = dtor;
        }
    }

    // ───── posting ─────

    /// Enqueue an allocated payload for dispatch at its configured
    /// deadline.
    pub fn post(&self, payload: NonNull<u8>, cb: Callback) -> EventId {
        let header = unsafe { EventHeader::from_payload(payload) };
        self.post_header(header, cb)
    }

    /// Post a caller-owned, statically allocated event header in place.
    /// `header` must already be initialized via `EventHeader::new` with
    /// `size == 0`, and must outlive this post until cancelled or
    /// dispatched.
    pub fn post_static(&self, header: NonNull<EventHeader>, cb: Callback) -> Result<EventId, Error> {
        if unsafe { header.as_ref().is_pending() } {
            return Err(Error::Inval);
        }
        Ok(self.post_header(header, cb))
    }

    fn post_header(&self, header: NonNull<EventHeader>, cb: Callback) -> EventId {
        let is_static = unsafe { header.as_ref().is_static() };
        let offset = if is_static {
            0
        } else {
            self.with_mem(|slab| slab.offset_of(header))
        };

        self.with_queue(|cell| unsafe {
            let mut h = header;
            h.as_mut().cb = Some(cb);
            cell.generation = bump_id(cell.generation, cell.npw2);
            h.as_mut().id = cell.generation;
            cell.queue.enqueue(header);
            self.notify_background(cell);
            if is_static {
                EventId::for_static(header, cell.generation)
            } else {
                EventId::for_offset(cell.generation, cell.npw2, offset)
            }
        })
    }

    /// Cancel a pending event, running its destructor and, for dynamic
    /// events, returning its storage to the slab. Returns `Error::NoEnt`
    /// if the id is stale or no longer pending.
    pub fn cancel(&self, id: EventId) -> Result<(), Error> {
        let header = self.with_queue(|cell| unsafe {
            let header = self.resolve(cell, id)?;
            if !header.as_ref().is_pending() {
                return Err(Error::NoEnt);
            }
            cell.queue.unqueue(header);
            self.notify_background(cell);
            Ok(header)
        })?;

        unsafe { EventHeader::run_dtor(header) };
        if unsafe { !header.as_ref().is_static() } {
            self.with_mem(|slab| slab.dealloc(header));
        }
        Ok(())
    }

    /// Milliseconds remaining until `id`'s deadline, or `None` if it is not
    /// currently pending (already dispatched, cancelled, or stale).
    pub fn time_left(&self, id: EventId) -> Option<u32> {
        let now = self.now();
        self.with_queue(|cell| unsafe {
            let header = self.resolve(cell, id).ok()?;
            if !header.as_ref().is_pending() {
                return None;
            }
            Some(clamp(header.as_ref().deadline, now))
        })
    }

    /// Recover the header pointer behind an id, validating the generation
    /// stamp so a reused dynamic slot can't be mistaken for a stale handle.
    unsafe fn resolve(&self, cell: &QueueCell, id: EventId) -> Result<NonNull<EventHeader>, Error> {
        let header = match id.locator {
            Locator::Static(ptr) => ptr,
            Locator::Offset(packed) => {
                let mask = if cell.npw2 >= 32 { u32::MAX } else { (1u32 << cell.npw2) - 1 };
                let offset = packed & mask;
                self.with_mem(|slab| slab.header_at(offset))
            }
        };
        if header.as_ref().id != id.stamp {
            return Err(Error::NoEnt);
        }
        Ok(header)
    }

    fn notify_background(&self, cell: &QueueCell) {
        let next = unsafe { cell.queue.next_deadline() };
        let hint = next.map(|deadline| clamp(deadline, self.now()));
        let hook = unsafe { &*self.background.get() };
        hook.notify(hint);
    }

    // ───── background integration ─────

    /// Register a hook invoked whenever the time until the next deadline
    /// changes, letting a host event loop that doesn't call `dispatch`
    /// directly still wake at the right moment.
    pub fn background(&self, update: Option<unsafe fn(*mut u8, Option<u32>)>, ctx: *mut u8) {
        self.with_queue(|cell| {
            unsafe { &mut *self.background.get() }.set(update, ctx);
            self.notify_background(cell);
        });
    }

    /// Chain this queue's dispatch onto another queue's background hook:
    /// every time `target`'s pending set changes, this queue gets a
    /// zero-timeout dispatch pass to drain anything already expired.
    /// `self` must outlive `target`'s use of the hook.
    pub fn chain<Q: Platform, const M: usize>(&self, target: &EventQueue<Q, M>) {
        let ctx = self as *const Self as *mut u8;
        target.background(Some(chain_trampoline::<P, N>), ctx);
    }

    // ───── dispatch ─────

    /// Run pending callbacks until `timeout_ms` elapses (`None` = forever),
    /// or [`EventQueue::break_`] is called.
    pub fn dispatch(&self, timeout_ms: Option<u32>) -> Result<(), Error> {
        let deadline = timeout_ms.map(|ms| self.now().wrapping_add(ms));

        loop {
            let broke = self.with_queue(|cell| {
                if cell.breaking {
                    cell.breaking = false;
                    true
                } else {
                    false
                }
            });
            if broke {
                return Err(Error::Break);
            }

            let now = self.now();
            if let Some(d) = deadline {
                if diff(now, d) >= 0 {
                    return Err(Error::TimedOut);
                }
            }

            let expired = self.with_queue(|cell| unsafe { cell.queue.drain_expired(now) });

            if let Some(head) = expired {
                self.run_expired(Some(head), now);
                continue;
            }

            let next_in = self.with_queue(|cell| unsafe {
                cell.queue.next_deadline().map(|d| clamp(d, now))
            });
            let wait_for = match (next_in, deadline) {
                (Some(a), Some(d)) => Some(a.min(clamp(d, now))),
                (Some(a), None) => Some(a),
                (None, Some(d)) => Some(clamp(d, now)),
                (None, None) => None,
            };
            self.signal
                .wait(wait_for.map(|ms| core::time::Duration::from_millis(ms as u64)));
        }
    }

    /// Unblock a concurrent [`EventQueue::dispatch`] call, which returns
    /// `Error::Break`. Safe to call from an interrupt context.
    pub fn break_(&self) {
        self.with_queue(|cell| cell.breaking = true);
        self.signal.notify();
    }

    fn run_expired(&self, mut head: Option<NonNull<EventHeader>>, now: Tick) {
        while let Some(header) = head {
            head = unsafe { header.as_ref().next };

            let cb = unsafe { (*header.as_ptr()).cb };
            if let Some(cb) = cb {
                unsafe { cb(EventHeader::payload(header)) };
            }

            let period = unsafe { (*header.as_ptr()).period };
            if period >= 0 {
                let mut next = unsafe { header.as_ref().deadline }.wrapping_add(period as u32);
                if diff(next, now) < 0 {
                    next = now.wrapping_add(period as u32);
                }
                unsafe {
                    (*header.as_ptr()).deadline = next;
                }
                self.with_queue(|cell| unsafe {
                    cell.queue.enqueue(header);
                    self.notify_background(cell);
                });
            } else {
                unsafe { EventHeader::run_dtor(header) };
                if unsafe { !header.as_ref().is_static() } {
                    self.with_mem(|slab| slab.dealloc(header));
                }
            }
        }
    }

    // ───── closure sugar ─────

    /// Schedule `f` to run once after `ms` milliseconds.
    pub fn call_in<F>(&self, ms: u32, f: F) -> Result<EventId, Error>
    where
        F: FnMut() + Send + 'static,
    {
        let payload = self.alloc(callback::closure_payload_size::<F>())?;
        unsafe {
            (payload.as_ptr() as *mut F).write(f);
        }
        self.set_delay(payload, ms);
        self.set_dtor(payload, Some(callback::drop_closure::<F>));
        Ok(self.post(payload, callback::invoke::<F>))
    }

    /// Schedule `f` to run on the next dispatch pass.
    pub fn call<F>(&self, f: F) -> Result<EventId, Error>
    where
        F: FnMut() + Send + 'static,
    {
        self.call_in(0, f)
    }

    /// Schedule `f` to run every `ms` milliseconds, starting `ms` from now.
    pub fn call_every<F>(&self, ms: u32, f: F) -> Result<EventId, Error>
    where
        F: FnMut() + Send + 'static,
    {
        if ms == 0 {
            return Err(Error::Inval);
        }
        let payload = self.alloc(callback::closure_payload_size::<F>())?;
        unsafe {
            (payload.as_ptr() as *mut F).write(f);
        }
        self.set_delay(payload, ms);
        self.set_period(payload, ms as i32)?;
        self.set_dtor(payload, Some(callback::drop_closure::<F>));
        Ok(self.post(payload, callback::invoke::<F>))
    }
}

unsafe fn chain_trampoline<P: Platform, const N: usize>(ctx: *mut u8, _next: Option<u32>) {
    let queue = &*(ctx as *const EventQueue<P, N>);
    let _ = queue.dispatch(Some(0));
}

impl<P: Platform, const N: usize> Drop for EventQueue<P, N> {
    fn drop(&mut self) {
        // Run every still-pending event's destructor so a queue going out
        // of scope never silently leaks caller resources. Dynamic storage
        // itself needs no explicit free since the whole slab is dropped
        // with `self`.
        let cell = self.queue_cell.get_mut();
        let mut cursor = unsafe { cell.queue.drain_all() };
        while let Some(header) = cursor {
            cursor = unsafe { header.as_ref().next };
            unsafe { EventHeader::run_dtor(header) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    type TestQueue = EventQueue<StdPlatform, 4096>;

    #[test]
    fn call_in_runs_once_after_delay() {
        let q: TestQueue = EventQueue::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        q.call_in(5, move || {
            ran2.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        q.dispatch(Some(200)).unwrap_err();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn call_every_rearms() {
        let q: TestQueue = EventQueue::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let id = q
            .call_every(5, move || {
                count2.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let _ = q.dispatch(Some(60));
        let seen = count.load(Ordering::SeqCst);
        assert!(seen >= 3, "expected several rearms, saw {seen}");
        q.cancel(id).unwrap();
    }

    #[test]
    fn cancel_prevents_dispatch() {
        let q: TestQueue = EventQueue::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        let id = q
            .call_in(50, move || {
                ran2.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        q.cancel(id).unwrap();
        assert!(q.cancel(id).is_err());
        let _ = q.dispatch(Some(80));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn time_left_reflects_remaining_delay() {
        let q: TestQueue = EventQueue::new();
        let id = q.call_in(1000, || {}).unwrap();
        let left = q.time_left(id).unwrap();
        assert!(left > 0 && left <= 1000);
    }

    #[test]
    fn break_unblocks_dispatch() {
        let q: Arc<TestQueue> = Arc::new(EventQueue::new());
        let q2 = q.clone();
        let handle = std::thread::spawn(move || q2.dispatch(None));
        std::thread::sleep(core::time::Duration::from_millis(20));
        q.break_();
        assert!(matches!(handle.join().unwrap(), Err(Error::Break)));
    }

    #[test]
    fn fifo_within_same_deadline() {
        let q: TestQueue = EventQueue::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            q.call_in(10, move || order.lock().unwrap().push(i)).unwrap();
        }
        let _ = q.dispatch(Some(100));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }
}
