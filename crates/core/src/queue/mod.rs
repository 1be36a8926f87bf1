//! Bounded per-handle event FIFO.
//!
//! Pushing never blocks the producer. When the queue is full the event is
//! dropped and the queue is marked overflowed; a single
//! [`EventKind::QueueOverflow`](crate::EventKind::QueueOverflow) event is
//! handed out once the retained events have been drained.
//!
//! Asynchronous requests reserve a slot up front so that their reply always
//! fits, which is also how a saturated queue pushes back on new requests.
//!
//! Observed property changes are only materialized into free slots, so they
//! never grow the queue past its capacity. The one exception is
//! [`EventQueue::force_push`], used for shutdown and hook notifications,
//! which may exceed capacity by the number of such events in flight.

use std::collections::VecDeque;

use crate::{BusError, Event, Result};

/// FIFO of events waiting for one handle, with reply reservations.
#[derive(Debug)]
pub struct EventQueue {
    events: VecDeque<Event>,
    capacity: usize,
    reserved: usize,
    overflowed: bool,
}

impl EventQueue {
    /// Creates an empty queue retaining at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity,
            reserved: 0,
            overflowed: false,
        }
    }

    /// Maximum number of retained events, reservations included.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of retained events, not counting a pending overflow marker.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when neither events nor an overflow marker are pending.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && !self.overflowed
    }

    /// Slots claimed by requests that have not replied yet.
    pub fn reserved(&self) -> usize {
        self.reserved
    }

    /// Slots neither holding an event nor reserved for a reply.
    pub fn free_slots(&self) -> usize {
        self.capacity.saturating_sub(self.events.len() + self.reserved)
    }

    fn has_room(&self) -> bool {
        self.free_slots() > 0
    }

    /// Queues an event. Returns `false` if it was dropped.
    pub fn push(&mut self, event: Event) -> bool {
        if !self.has_room() {
            if !self.overflowed {
                tracing::warn!(
                    capacity = self.capacity,
                    kind = event.kind.name(),
                    "too many events queued, dropping"
                );
            }
            self.overflowed = true;
            return false;
        }
        self.events.push_back(event);
        true
    }

    /// Queues an event regardless of capacity. Used for events that must not
    /// be lost, such as shutdown and hook notifications.
    pub fn force_push(&mut self, event: Event) {
        self.events.push_back(event);
    }

    /// Claims a slot for a future reply.
    pub fn reserve(&mut self) -> Result<()> {
        if !self.has_room() {
            return Err(BusError::QueueFull);
        }
        self.reserved += 1;
        Ok(())
    }

    /// Queues a reply into a slot claimed by [`EventQueue::reserve`].
    pub fn push_reserved(&mut self, event: Event) {
        self.release();
        self.events.push_back(event);
    }

    /// Gives back a claimed slot without queuing anything.
    pub fn release(&mut self) {
        debug_assert!(self.reserved > 0, "released a reply slot never reserved");
        self.reserved = self.reserved.saturating_sub(1);
    }

    /// Takes the next event. The overflow marker follows the retained events.
    pub fn pop(&mut self) -> Option<Event> {
        if let Some(event) = self.events.pop_front() {
            return Some(event);
        }
        if self.overflowed {
            self.overflowed = false;
            return Some(Event::queue_overflow());
        }
        None
    }

    /// Discards everything, including reservations.
    pub fn clear(&mut self) {
        self.events.clear();
        self.reserved = 0;
        self.overflowed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventKind;

    fn drain(queue: &mut EventQueue) -> Vec<EventKind> {
        std::iter::from_fn(|| queue.pop()).map(|e| e.kind).collect()
    }

    #[test]
    fn overflow_is_reported_once() {
        let capacity = 4;
        let mut queue = EventQueue::new(capacity);
        for _ in 0..capacity + 3 {
            queue.push(Event::new(EventKind::Idle));
        }
        assert_eq!(queue.len(), capacity);

        let kinds = drain(&mut queue);
        assert_eq!(kinds.len(), capacity + 1);
        assert_eq!(
            kinds.iter().filter(|k| **k == EventKind::QueueOverflow).count(),
            1
        );
        assert_eq!(kinds.last(), Some(&EventKind::QueueOverflow));
        assert!(queue.is_empty());
    }

    #[test]
    fn delivery_resumes_after_overflow() {
        let mut queue = EventQueue::new(1);
        assert!(queue.push(Event::new(EventKind::Idle)));
        assert!(!queue.push(Event::new(EventKind::Seek)));
        assert_eq!(drain(&mut queue), vec![EventKind::Idle, EventKind::QueueOverflow]);

        assert!(queue.push(Event::new(EventKind::Seek)));
        assert_eq!(drain(&mut queue), vec![EventKind::Seek]);
    }

    #[test]
    fn reservations_count_against_capacity() {
        let mut queue = EventQueue::new(2);
        queue.reserve().unwrap();
        queue.push(Event::new(EventKind::Idle));
        assert_eq!(queue.reserve(), Err(BusError::QueueFull));
        assert!(!queue.push(Event::new(EventKind::Seek)));

        queue.push_reserved(Event::new(EventKind::CommandReply));
        assert_eq!(queue.reserved(), 0);
        assert_eq!(
            drain(&mut queue),
            vec![EventKind::Idle, EventKind::CommandReply, EventKind::QueueOverflow]
        );
        assert!(queue.reserve().is_ok());
    }

    #[test]
    fn free_slots_account_for_reservations() {
        let mut queue = EventQueue::new(3);
        assert_eq!(queue.free_slots(), 3);
        queue.reserve().unwrap();
        queue.push(Event::new(EventKind::Idle));
        assert_eq!(queue.free_slots(), 1);
        queue.push(Event::new(EventKind::Seek));
        assert_eq!(queue.free_slots(), 0);
        queue.force_push(Event::new(EventKind::Shutdown));
        assert_eq!(queue.free_slots(), 0);
    }

    #[test]
    fn forced_events_ignore_capacity() {
        let mut queue = EventQueue::new(1);
        queue.push(Event::new(EventKind::Idle));
        queue.force_push(Event::new(EventKind::Shutdown));
        assert_eq!(drain(&mut queue), vec![EventKind::Idle, EventKind::Shutdown]);
    }
}
