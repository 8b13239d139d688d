use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::codec::{Wire, EMPTY};

/// Counter bumped on every [`EventQueue::reset`].
///
/// Producers remember the generation they were created in; pushes carrying an
/// older generation are discarded, so a subscription torn down by a reset can
/// never leak events into the new topology.
pub type Generation = u64;

#[derive(Debug, Default)]
struct Inner {
    events: VecDeque<Wire>,
    generation: Generation,
}

/// FIFO of encoded messages shared between driver callbacks and the consumer.
///
/// Every operation takes the lock for O(1) work (O(batch) for
/// [`EventQueue::push_batch`]) and never calls out while holding it.
#[derive(Debug, Default)]
pub struct EventQueue {
    inner: Mutex<Inner>,
}

/// Outcome of a [`EventQueue::reset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reset {
    /// Generation producers must carry from now on.
    pub generation: Generation,
    /// Number of undrained events that were thrown away.
    pub discarded: usize,
}

impl EventQueue {
    /// Creates an empty queue with room for `capacity` events before growing.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                events: VecDeque::with_capacity(capacity),
                generation: 0,
            }),
        }
    }

    /// Current generation.
    pub fn generation(&self) -> Generation {
        self.inner.lock().generation
    }

    /// Appends a batch if `generation` is still current.
    ///
    /// Returns `false` (and enqueues nothing) when the batch belongs to a
    /// generation that has since been reset.
    pub fn push_batch(&self, generation: Generation, batch: &[Wire]) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return false;
        }
        inner.events.extend(batch.iter().copied());
        true
    }

    /// Removes and returns the oldest event, or [`EMPTY`] when there is none.
    pub fn pop(&self) -> Wire {
        self.inner.lock().events.pop_front().unwrap_or(EMPTY)
    }

    /// Moves every queued event, oldest first, into `out`.
    pub fn drain_into(&self, out: &mut Vec<Wire>) -> usize {
        let mut inner = self.inner.lock();
        let count = inner.events.len();
        out.extend(inner.events.drain(..));
        count
    }

    /// Discards every queued event and starts a new generation.
    pub fn reset(&self) -> Reset {
        let mut inner = self.inner.lock();
        let discarded = inner.events.len();
        inner.events.clear();
        inner.generation = inner.generation.wrapping_add(1);
        Reset {
            generation: inner.generation,
            discarded,
        }
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    /// Whether the queue holds no events.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn pops_in_arrival_order() {
        let queue = EventQueue::default();
        assert!(queue.push_batch(queue.generation(), &[1, 2]));
        assert!(queue.push_batch(queue.generation(), &[3]));
        assert_eq!(queue.pop(), 1);
        assert_eq!(queue.pop(), 2);
        assert_eq!(queue.pop(), 3);
    }

    #[test]
    fn empty_pop_returns_sentinel_and_leaves_state_alone() {
        let queue = EventQueue::default();
        let before = queue.generation();
        assert_eq!(queue.pop(), EMPTY);
        assert_eq!(queue.pop(), EMPTY);
        assert!(queue.is_empty());
        assert_eq!(queue.generation(), before);
    }

    #[test]
    fn reset_discards_and_rejects_stale_batches() {
        let queue = EventQueue::default();
        let old = queue.generation();
        assert!(queue.push_batch(old, &[10, 11]));

        let reset = queue.reset();
        assert_eq!(reset.discarded, 2);
        assert_ne!(reset.generation, old);
        assert!(queue.is_empty());

        assert!(!queue.push_batch(old, &[12]));
        assert!(queue.is_empty());
        assert!(queue.push_batch(reset.generation, &[13]));
        assert_eq!(queue.pop(), 13);
    }

    #[test]
    fn drain_into_preserves_order() {
        let queue = EventQueue::with_capacity(4);
        queue.push_batch(0, &[5, 6, 7]);
        let mut out = vec![4];
        assert_eq!(queue.drain_into(&mut out), 3);
        assert_eq!(out, vec![4, 5, 6, 7]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn concurrent_producers_keep_per_producer_order() {
        const PER_PRODUCER: u64 = 2_000;
        let queue = Arc::new(EventQueue::default());
        let producers: Vec<_> = (1..=4u64)
            .map(|producer| {
                let queue = Arc::clone(&queue);
                let generation = queue.generation();
                thread::spawn(move || {
                    for seq in 0..PER_PRODUCER {
                        assert!(queue.push_batch(generation, &[(producer << 32) | seq]));
                    }
                })
            })
            .collect();

        let mut seen = Vec::new();
        while seen.len() < 4 * PER_PRODUCER as usize {
            match queue.pop() {
                EMPTY => thread::yield_now(),
                wire => seen.push(wire),
            }
        }
        for handle in producers {
            handle.join().unwrap();
        }

        for producer in 1..=4u64 {
            let sequence: Vec<u64> = seen
                .iter()
                .filter(|wire| *wire >> 32 == producer)
                .map(|wire| wire & 0xFFFF_FFFF)
                .collect();
            assert_eq!(sequence, (0..PER_PRODUCER).collect::<Vec<_>>());
        }
        assert_eq!(queue.pop(), EMPTY);
    }
}
