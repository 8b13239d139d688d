//! Packing of one captured MIDI message into a single `u64`.
//!
//! Layout, bit 0 being the least significant:
//!
//! | bits  | field     |
//! |-------|-----------|
//! | 0-31  | source id |
//! | 32-39 | status    |
//! | 40-47 | data 1    |
//! | 48-55 | data 2    |
//! | 56-63 | zero      |
//!
//! The value `0` is reserved as the "queue empty" sentinel returned by the
//! drain path, so the ingestion side never enqueues an all-zero message.

use crate::driver::SourceId;

/// Encoded form of a [`WireMessage`].
pub type Wire = u64;

/// Value returned by a drain when nothing is queued.
pub const EMPTY: Wire = 0;

const STATUS_SHIFT: u32 = 32;
const DATA1_SHIFT: u32 = 40;
const DATA2_SHIFT: u32 = 48;

/// Packs the four message fields into their wire representation.
#[inline]
pub const fn encode(source: SourceId, status: u8, data1: u8, data2: u8) -> Wire {
    (source as u64)
        | ((status as u64) << STATUS_SHIFT)
        | ((data1 as u64) << DATA1_SHIFT)
        | ((data2 as u64) << DATA2_SHIFT)
}

/// Unpacks a wire value into `(source, status, data1, data2)`.
#[inline]
pub const fn decode(wire: Wire) -> (SourceId, u8, u8, u8) {
    (
        wire as u32,
        (wire >> STATUS_SHIFT) as u8,
        (wire >> DATA1_SHIFT) as u8,
        (wire >> DATA2_SHIFT) as u8,
    )
}

/// One MIDI packet fragment tagged with the source it arrived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct WireMessage {
    /// Stable id of the originating source.
    pub source: SourceId,
    /// Status byte.
    pub status: u8,
    /// First data byte.
    pub data1: u8,
    /// Second data byte.
    pub data2: u8,
}

impl WireMessage {
    /// Creates a message from its fields.
    pub const fn new(source: SourceId, status: u8, data1: u8, data2: u8) -> Self {
        Self {
            source,
            status,
            data1,
            data2,
        }
    }

    /// Builds a message from the leading bytes of a raw packet.
    ///
    /// At most three bytes are taken; missing bytes read as zero. Longer
    /// packets (SysEx and friends) are truncated.
    pub fn from_packet(source: SourceId, packet: &[u8]) -> Self {
        let byte = |i: usize| packet.get(i).copied().unwrap_or(0);
        Self::new(source, byte(0), byte(1), byte(2))
    }

    /// Returns the wire encoding of this message.
    #[inline]
    pub const fn encode(self) -> Wire {
        encode(self.source, self.status, self.data1, self.data2)
    }

    /// Recovers a message from its wire encoding.
    #[inline]
    pub const fn decode(wire: Wire) -> Self {
        let (source, status, data1, data2) = decode(wire);
        Self::new(source, status, data1, data2)
    }

    /// Raw MIDI bytes of the message.
    pub const fn bytes(&self) -> [u8; 3] {
        [self.status, self.data1, self.data2]
    }

    /// Whether this message collides with the [`EMPTY`] sentinel.
    pub const fn is_empty_sentinel(&self) -> bool {
        self.encode() == EMPTY
    }
}

impl From<WireMessage> for Wire {
    fn from(message: WireMessage) -> Self {
        message.encode()
    }
}
