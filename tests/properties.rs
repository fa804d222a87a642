//! Property tests for the invariants named in spec.md §8.

use nonos_equeue::{EventQueue, StdPlatform};
use proptest::prelude::*;
use std::sync::{Arc, Mutex};

type TestQueue = EventQueue<StdPlatform, 8192>;

proptest! {
    /// P2: dispatching past the longest delay invokes every callback
    /// exactly once, in nondecreasing-delay order.
    #[test]
    fn dispatches_in_nondecreasing_delay_order(mut delays in prop::collection::vec(0u32..200, 1..12)) {
        delays.sort_unstable();
        let q: TestQueue = EventQueue::new();
        let order: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

        for &d in &delays {
            let order = order.clone();
            q.call_in(d, move || order.lock().unwrap().push(d)).unwrap();
        }

        let max_delay = *delays.iter().max().unwrap_or(&0);
        let _ = q.dispatch(Some(max_delay + 50));

        let seen = order.lock().unwrap().clone();
        prop_assert_eq!(seen.len(), delays.len());
        let mut sorted_seen = seen.clone();
        sorted_seen.sort_unstable();
        prop_assert_eq!(seen, sorted_seen);
    }

    /// P7: events posted with the same delay from the same context
    /// dispatch in posting order.
    #[test]
    fn same_delay_events_preserve_fifo_order(count in 1usize..10) {
        let q: TestQueue = EventQueue::new();
        let order: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));

        for i in 0..count {
            let order = order.clone();
            q.call_in(15, move || order.lock().unwrap().push(i)).unwrap();
        }

        let _ = q.dispatch(Some(100));
        let seen = order.lock().unwrap().clone();
        prop_assert_eq!(seen, (0..count).collect::<Vec<_>>());
    }

    /// P5: alloc -> set_dtor -> dealloc invokes the destructor exactly
    /// once, whether or not the event was ever posted.
    #[test]
    fn dealloc_runs_dtor_exactly_once(size in 1usize..256) {
        use core::sync::atomic::{AtomicUsize, Ordering};
        static DROPS: AtomicUsize = AtomicUsize::new(0);
        DROPS.store(0, Ordering::SeqCst);

        unsafe fn mark_drop(_payload: *mut u8) {
            DROPS.fetch_add(1, core::sync::atomic::Ordering::SeqCst);
        }

        let q: TestQueue = EventQueue::new();
        let payload = q.alloc(size).unwrap();
        q.set_dtor(payload, Some(mark_drop));
        q.dealloc(payload).unwrap();

        prop_assert_eq!(DROPS.load(Ordering::SeqCst), 1);
    }
}

/// P3: cancelling after dispatch reports `NoEnt`.
#[test]
fn cancel_after_dispatch_is_noent() {
    let q: TestQueue = EventQueue::new();
    let id = q.call_in(5, || {}).unwrap();
    let _ = q.dispatch(Some(50));
    assert!(q.cancel(id).is_err());
}

