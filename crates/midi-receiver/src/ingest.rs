use std::sync::Arc;

use smallvec::SmallVec;

use crate::codec::{Wire, WireMessage};
use crate::driver::SourceId;
use crate::queue::{EventQueue, Generation};

/// Messages staged per queue lock hold.
pub const BATCH_CHUNK: usize = 16;

/// Delivery handle given to the driver for one subscription.
///
/// The sink owns the stable id of the source it was created for, so driver
/// callbacks tag messages without consulting the registry.
#[derive(Debug, Clone)]
pub struct PacketSink {
    source: SourceId,
    generation: Generation,
    queue: Arc<EventQueue>,
}

impl PacketSink {
    /// Creates a sink feeding `queue` for the given generation.
    pub fn new(source: SourceId, generation: Generation, queue: Arc<EventQueue>) -> Self {
        Self {
            source,
            generation,
            queue,
        }
    }

    /// Source this sink is tagged with.
    pub fn source(&self) -> SourceId {
        self.source
    }

    /// Enqueues one packet batch. Returns how many messages were accepted.
    ///
    /// Only the first three bytes of each packet are kept. Empty packets and
    /// messages that would encode to the empty sentinel are skipped, and
    /// nothing more is enqueued once the queue has been reset since this sink
    /// was made. Messages are pushed in chunks of [`BATCH_CHUNK`] so the
    /// staging buffer never leaves the stack.
    pub fn deliver<'a, I>(&self, packets: I) -> usize
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut batch: SmallVec<[Wire; BATCH_CHUNK]> = SmallVec::new();
        let mut accepted = 0;
        for packet in packets {
            if packet.is_empty() {
                continue;
            }
            let message = WireMessage::from_packet(self.source, packet);
            if message.is_empty_sentinel() {
                tracing::trace!(source = self.source, "dropping all-zero midi message");
                continue;
            }
            batch.push(message.encode());
            if batch.len() == BATCH_CHUNK {
                if !self.flush(&mut batch) {
                    return accepted;
                }
                accepted += BATCH_CHUNK;
            }
        }
        let tail = batch.len();
        if tail > 0 && self.flush(&mut batch) {
            accepted += tail;
        }
        accepted
    }

    fn flush(&self, batch: &mut SmallVec<[Wire; BATCH_CHUNK]>) -> bool {
        let pushed = self.queue.push_batch(self.generation, batch);
        if !pushed {
            tracing::trace!(
                source = self.source,
                dropped = batch.len(),
                "dropping midi batch from a torn-down subscription"
            );
        }
        batch.clear();
        pushed
    }

    /// Enqueues a single packet.
    pub fn deliver_packet(&self, packet: &[u8]) -> usize {
        self.deliver(std::iter::once(packet))
    }
}
