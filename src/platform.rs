//! Abstraction seam between the engine and its host: a millisecond clock, a
//! binary signal for waking a sleeping dispatcher, and a mutex for the two
//! disjoint critical sections (`queue_lock`, `mem_lock`; spec.md §6 is
//! explicit that no ordering between them is defined, so implementors must
//! not take both at once).
//!
//! The bare-metal default pulls in none of this — only `spin::Mutex` is
//! required for the lock itself (see [`RawMutex`]'s blanket impl below).
//! Clock and Signal are supplied by the embedder because they are
//! necessarily hardware-specific (a SysTick counter, an RTOS semaphore, ...).
//! The `std`-gated [`StdPlatform`] exists purely so this crate's own test
//! suite has something to dispatch against, the same role `channel.rs`'s
//! `Mutex<VecDeque<Message>>` plays as the teacher kernel's hosted-test
//! stand-in for a real IPC transport.

use core::time::Duration;

use spin::{Mutex, MutexGuard};

/// Monotonic millisecond source. Must wrap at `u32::MAX` rather than panic
/// or saturate (spec.md §4.1).
pub trait Clock {
    fn now_ms(&self) -> u32;
}

/// A binary signal the dispatcher sleeps on and any context (including an
/// interrupt handler) can raise. Spurious wakeups are allowed; the
/// dispatcher always re-checks the queue after waking.
pub trait Signal {
    /// Block the calling thread for at most `timeout`, or forever if `None`,
    /// until [`Signal::notify`] is called or a spurious wakeup occurs.
    fn wait(&self, timeout: Option<Duration>);

    /// Wake one waiter, interrupt-safe.
    fn notify(&self);
}

/// A lock guarding one of the engine's two critical sections. Implementors
/// must be usable from an interrupt or ISR context that cannot block
/// indefinitely (spec.md §2) — `spin::Mutex` satisfies this on bare metal;
/// the `std` backend below traffics in the same primitive, since this
/// crate's actual dispatch loop rarely holds a lock long enough for a
/// blocking mutex to matter.
pub trait RawMutex {
    type Guard<'a>
    where
        Self: 'a;

    fn new() -> Self
    where
        Self: Sized;
    fn lock(&self) -> Self::Guard<'_>;
}

/// Everything an [`crate::EventQueue`] needs from its host, bundled so a
/// single type parameter picks clock, signal, and both locks together.
pub trait Platform {
    type Clock: Clock + Default;
    type Signal: Signal + Default;
    type QueueMutex: RawMutex;
    type MemMutex: RawMutex;
}

/// A ready-made [`RawMutex`] over `spin::Mutex`, usable by any `Platform`
/// impl that doesn't need a different lock for one of the two sections.
pub struct SpinMutex<T>(Mutex<T>);

impl<T: Default> RawMutex for SpinMutex<T> {
    type Guard<'a>
        = MutexGuard<'a, T>
    where
        Self: 'a;

    fn new() -> Self {
        SpinMutex(Mutex::new(T::default()))
    }

    fn lock(&self) -> Self::Guard<'_> {
        self.0.lock()
    }
}

#[cfg(any(test, feature = "std"))]
pub use hosted::StdPlatform;

#[cfg(any(test, feature = "std"))]
mod hosted {
    use super::{Clock, Platform, Signal, SpinMutex};
    use core::time::Duration;
    use std::sync::{Condvar, Mutex as StdMutex};
    use std::time::Instant;

    /// Wall-clock-backed [`Clock`], truncated to milliseconds since an
    /// arbitrary epoch fixed at construction (so repeated calls within a
    /// process are consistent without needing `std::time::UNIX_EPOCH`,
    /// which some hosted test sandboxes restrict).
    pub struct WallClock {
        start: Instant,
    }

    impl WallClock {
        pub fn new() -> Self {
            WallClock { start: Instant::now() }
        }
    }

    impl Default for WallClock {
        fn default() -> Self {
            WallClock::new()
        }
    }

    impl Clock for WallClock {
        fn now_ms(&self) -> u32 {
            self.start.elapsed().as_millis() as u32
        }
    }

    /// Condvar-backed [`Signal`].
    pub struct CondvarSignal {
        inner: StdMutex<bool>,
        cv: Condvar,
    }

    impl CondvarSignal {
        pub fn new() -> Self {
            CondvarSignal {
                inner: StdMutex::new(false),
                cv: Condvar::new(),
            }
        }
    }

    impl Default for CondvarSignal {
        fn default() -> Self {
            CondvarSignal::new()
        }
    }

    impl Signal for CondvarSignal {
        fn wait(&self, timeout: Option<Duration>) {
            let mut raised = self.inner.lock().unwrap();
            if *raised {
                *raised = false;
                return;
            }
            match timeout {
                Some(t) => {
                    let (guard, _) = self.cv.wait_timeout(raised, t).unwrap();
                    raised = guard;
                }
                None => {
                    raised = self.cv.wait(raised).unwrap();
                }
            }
            *raised = false;
        }

        fn notify(&self) {
            let mut raised = self.inner.lock().unwrap();
            *raised = true;
            self.cv.notify_one();
        }
    }

    /// Hosted [`Platform`] used by this crate's own tests and available to
    /// embedders under `std` for prototyping off real hardware.
    pub struct StdPlatform;

    impl Platform for StdPlatform {
        type Clock = WallClock;
        type Signal = CondvarSignal;
        type QueueMutex = SpinMutex<()>;
        type MemMutex = SpinMutex<()>;
    }
}
