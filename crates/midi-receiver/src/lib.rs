//! MIDI input capture for polling hosts.
//!
//! Driver callbacks encode every incoming packet into a `u64` (see [`codec`])
//! and push it onto a lock-guarded FIFO; the host drains that FIFO at its own
//! cadence through a [`MidiReceiver`]. Source hot-plugging only flips a dirty
//! flag; the rebuild happens lazily on the consumer's next call.

pub mod codec;
pub mod config;
pub mod driver;
pub mod error;
pub mod hotplug;
pub mod ingest;
pub mod queue;
pub mod receiver;
pub mod registry;
pub mod topology;
pub mod virtual_driver;

#[cfg(feature = "midir")]
pub mod backend_midir;

pub use codec::{decode, encode, Wire, WireMessage, EMPTY};
pub use config::ReceiverConfig;
pub use driver::{DriverSession, MidiDriver, SourceId, SourceInfo};
pub use error::{Error, Result};
pub use ingest::PacketSink;
pub use queue::EventQueue;
pub use receiver::MidiReceiver;
pub use registry::SourceRegistry;
pub use topology::{ObjectKind, TopologyChange, TopologyMonitor, WeakTopologyMonitor};
pub use virtual_driver::VirtualDriver;

#[cfg(feature = "midir")]
pub use backend_midir::MidirDriver;

/// Receiver on the platform MIDI service with default settings.
#[cfg(feature = "midir")]
pub fn system_receiver() -> Result<MidiReceiver<MidirDriver>> {
    MidiReceiver::new(MidirDriver::new(), ReceiverConfig::default())
}
