//! The pending-event priority queue: a singly linked list of "slots", one
//! per distinct deadline, each slot heading a same-deadline `sibling` chain.
//!
//! Grounded on `arch/x86_64/time/timer.rs`'s index-linked timer list from
//! the teacher kernel (deadline-ordered insertion, soonest-first) and on
//! `original_source/equeue.c`'s `equeue_enqueue`/`equeue_dequeue`, which use
//! the identical slot/sibling split to avoid a full sort on every insert.
//!
//! Locking is the caller's responsibility (`EventQueue` takes its queue
//! mutex before calling into here) — every function here is a pure pointer
//! manipulation with no awareness of `Platform`.

use core::ptr::NonNull;

use crate::event::{EventHeader, Link, RefSlot};
use crate::tick::{diff, Tick};

pub(crate) struct QueueState {
    head: Link,
}

impl QueueState {
    pub const fn new() -> Self {
        QueueState { head: None }
    }

    /// Insert `event` (not currently linked) in deadline order. Events
    /// sharing a deadline with an existing slot are pushed onto that slot's
    /// `sibling` chain; since insertion always happens at the chain head,
    /// the chain ends up in reverse arrival order and must be reversed at
    /// dequeue time to dispatch FIFO-within-deadline (spec.md §4.4).
    pub unsafe fn enqueue(&mut self, mut event: NonNull<EventHeader>) {
        let deadline = event.as_ref().deadline;

        let mut prev: Option<NonNull<EventHeader>> = None;
        let mut cursor = self.head;

        while let Some(slot) = cursor {
            let slot_deadline = slot.as_ref().deadline;
            if diff(deadline, slot_deadline) < 0 {
                break;
            }
            if slot_deadline == deadline {
                // Join this slot's sibling chain at the head.
                event.as_mut().sibling = slot.as_ref().sibling;
                event.as_mut().link_ref = RefSlot::Sibling(slot);
                let mut slot_mut = slot;
                slot_mut.as_mut().sibling = Some(event);
                if let Some(mut old_head) = event.as_ref().sibling {
                    old_head.as_mut().link_ref = RefSlot::Sibling(event);
                }
                return;
            }
            prev = cursor;
            cursor = slot.as_ref().next;
        }

        // Start a new slot for this deadline, linked before `cursor`.
        event.as_mut().next = cursor;
        event.as_mut().sibling = None;
        if let Some(mut next) = cursor {
            next.as_mut().link_ref = RefSlot::Next(event);
        }

        match prev {
            Some(mut p) => {
                p.as_mut().next = Some(event);
                event.as_mut().link_ref = RefSlot::Next(p);
            }
            None => {
                self.head = Some(event);
                event.as_mut().link_ref = RefSlot::Root;
            }
        }
    }

    /// Remove `event` from wherever it's linked, in O(1) using its own
    /// `link_ref` back-reference. Leaves `event`'s own links untouched
    /// (caller is about to dispatch or free it).
    pub unsafe fn unqueue(&mut self, event: NonNull<EventHeader>) {
        match event.as_ref().link_ref {
            RefSlot::Detached => {}
            RefSlot::Root => {
                self.head = event.as_ref().next;
                self.promote_sibling_if_slot_head(event, None);
            }
            RefSlot::Next(mut parent) => {
                parent.as_mut().next = event.as_ref().next;
                self.promote_sibling_if_slot_head(event, Some(parent));
            }
            RefSlot::Sibling(mut parent) => {
                parent.as_mut().sibling = event.as_ref().sibling;
                if let Some(mut next_sib) = event.as_ref().sibling {
                    next_sib.as_mut().link_ref = RefSlot::Sibling(parent);
                }
            }
        }
        let mut event = event;
        event.as_mut().link_ref = RefSlot::Detached;
    }

    /// When a slot head (linked via `Root` or `Next`) is removed and it has
    /// siblings, the eldest sibling takes over as the new slot head, taking
    /// the vacated `next`/back-reference.
    unsafe fn promote_sibling_if_slot_head(
        &mut self,
        removed: NonNull<EventHeader>,
        parent: Option<NonNull<EventHeader>>,
    ) {
        if let Some(mut sibling) = removed.as_ref().sibling {
            sibling.as_mut().next = removed.as_ref().next;
            if let Some(mut next) = removed.as_ref().next {
                next.as_mut().link_ref = RefSlot::Next(sibling);
            }
            match parent {
                Some(mut p) => {
                    p.as_mut().next = Some(sibling);
                    sibling.as_mut().link_ref = RefSlot::Next(p);
                }
                None => {
                    self.head = Some(sibling);
                    sibling.as_mut().link_ref = RefSlot::Root;
                }
            }
        }
    }

    /// Pop every event whose deadline has arrived by `now`, returning them
    /// as a plain singly linked list (via `next`) in FIFO dispatch order:
    /// slots soonest-first, and within a slot, arrival order (the reverse
    /// of the `sibling` chain's LIFO construction order).
    pub unsafe fn drain_expired(&mut self, now: Tick) -> Link {
        let mut result_head: Link = None;
        let mut result_tail: Link = None;

        while let Some(slot) = self.head {
            if diff(slot.as_ref().deadline, now) > 0 {
                break;
            }
            self.head = slot.as_ref().next;
            if let Some(mut new_head) = self.head {
                new_head.as_mut().link_ref = RefSlot::Root;
            }

            let (chain_head, chain_tail) = reverse_sibling_chain(slot);

            match result_tail {
                Some(mut tail) => tail.as_mut().next = Some(chain_head),
                None => result_head = Some(chain_head),
            }
            result_tail = Some(chain_tail);
        }

        if let Some(mut tail) = result_tail {
            tail.as_mut().next = None;
        }
        result_head
    }

    /// Pop every pending event regardless of deadline, in the same order
    /// `drain_expired` would eventually deliver them. Used when tearing
    /// down a queue that still has pending work.
    pub unsafe fn drain_all(&mut self) -> Link {
        let mut result_head: Link = None;
        let mut result_tail: Link = None;

        while let Some(slot) = self.head {
            self.head = slot.as_ref().next;
            if let Some(mut new_head) = self.head {
                new_head.as_mut().link_ref = RefSlot::Root;
            }

            let (chain_head, chain_tail) = reverse_sibling_chain(slot);

            match result_tail {
                Some(mut tail) => tail.as_mut().next = Some(chain_head),
                None => result_head = Some(chain_head),
            }
            result_tail = Some(chain_tail);
        }

        if let Some(mut tail) = result_tail {
            tail.as_mut().next = None;
        }
        result_head
    }

    /// Ms until the soonest deadline, or `None` if the queue is empty.
    pub unsafe fn next_deadline(&self) -> Option<Tick> {
        self.head.map(|h| h.as_ref().deadline)
    }
}

/// Reverse a same-deadline `sibling` chain in place, returning its new
/// `(head, tail)` so callers can splice it into a larger list in O(1)
/// rather than re-walking it.
unsafe fn reverse_sibling_chain(
    slot: NonNull<EventHeader>,
) -> (NonNull<EventHeader>, NonNull<EventHeader>) {
    let original_head = slot;
    let mut prev: Link = None;
    let mut cursor = Some(slot);

    while let Some(mut node) = cursor {
        let next = node.as_ref().sibling;
        node.as_mut().sibling = prev;
        node.as_mut().link_ref = RefSlot::Detached;
        prev = Some(node);
        cursor = next;
    }

    // `prev` now holds the new chain head; link via `next` for dispatch.
    let new_head = prev.unwrap();
    let mut cursor = new_head;
    loop {
        match cursor.as_ref().sibling {
            Some(next) => {
                cursor.as_mut().next = Some(next);
                cursor = next;
            }
            None => {
                cursor.as_mut().next = None;
                break;
            }
        }
    }
    let _ = original_head;
    (new_head, cursor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventHeader;
    use std::boxed::Box;

    unsafe fn leak_event(deadline: u32) -> NonNull<EventHeader> {
        let mut h = EventHeader::new(0);
        h.deadline = Tick(deadline);
        NonNull::new_unchecked(Box::into_raw(Box::new(h)))
    }

    #[test]
    fn deadline_order_is_preserved() {
        unsafe {
            let mut q = QueueState::new();
            let e10 = leak_event(10);
            let e5 = leak_event(5);
            let e20 = leak_event(20);
            q.enqueue(e10);
            q.enqueue(e5);
            q.enqueue(e20);

            let expired = q.drain_expired(Tick(20));
            let mut order = vec![];
            let mut cursor = expired;
            while let Some(n) = cursor {
                order.push(n.as_ref().deadline.0);
                cursor = n.as_ref().next;
            }
            assert_eq!(order, vec![5, 10, 20]);
        }
    }

    #[test]
    fn same_deadline_dispatches_fifo() {
        unsafe {
            let mut q = QueueState::new();
            let first = leak_event(5);
            let second = leak_event(5);
            let third = leak_event(5);
            q.enqueue(first);
            q.enqueue(second);
            q.enqueue(third);

            let expired = q.drain_expired(Tick(5));
            let mut order = vec![];
            let mut cursor = expired;
            while let Some(n) = cursor {
                order.push(n.as_ptr());
                cursor = n.as_ref().next;
            }
            assert_eq!(order, vec![first.as_ptr(), second.as_ptr(), third.as_ptr()]);
        }
    }

    #[test]
    fn unqueue_mid_chain_preserves_siblings() {
        unsafe {
            let mut q = QueueState::new();
            let first = leak_event(5);
            let second = leak_event(5);
            let third = leak_event(5);
            q.enqueue(first);
            q.enqueue(second);
            q.enqueue(third);

            q.unqueue(second);

            let expired = q.drain_expired(Tick(5));
            let mut order = vec![];
            let mut cursor = expired;
            while let Some(n) = cursor {
                order.push(n.as_ptr());
                cursor = n.as_ref().next;
            }
            assert_eq!(order, vec![first.as_ptr(), third.as_ptr()]);
        }
    }

    #[test]
    fn not_yet_expired_stays_queued() {
        unsafe {
            let mut q = QueueState::new();
            let soon = leak_event(100);
            q.enqueue(soon);
            assert!(q.drain_expired(Tick(50)).is_none());
            assert_eq!(q.next_deadline(), Some(Tick(100)));
        }
    }
}
