use crate::ingest::PacketSink;
use crate::topology::TopologyMonitor;

/// Driver-assigned identifier of a MIDI source, stable while it stays connected.
pub type SourceId = u32;

/// Snapshot of one source as reported by the driver.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SourceInfo {
    /// Stable id.
    pub id: SourceId,
    /// Display name at the time of the query, if the source was still present.
    pub name: Option<String>,
}

/// Boundary to the platform MIDI service.
///
/// Implementations are shared between the consumer thread and the optional
/// hotplug poller, hence `Sync`.
pub trait MidiDriver: Send + Sync + 'static {
    /// Client plus input port; dropping it disposes every subscription made through it.
    type Session: DriverSession;

    /// Creates a client and its input port.
    fn open_session(&self, client_name: &str, port_name: &str) -> anyhow::Result<Self::Session>;

    /// Enumerates the ids of the sources currently visible, in driver order.
    fn source_ids(&self) -> anyhow::Result<Vec<SourceId>>;

    /// Resolves the live display name of a source, `None` if it is gone.
    fn source_name(&self, id: SourceId) -> Option<String>;

    /// Resolves the live model string of a source, if the driver exposes one.
    fn source_model(&self, id: SourceId) -> Option<String> {
        let _ = id;
        None
    }

    /// Registers `monitor` for native topology notifications.
    ///
    /// Returns `false` if the driver cannot notify, in which case the receiver
    /// falls back to polling [`MidiDriver::source_ids`].
    fn install_topology_monitor(&self, monitor: TopologyMonitor) -> bool {
        let _ = monitor;
        false
    }
}

/// An open client/input-port pair.
pub trait DriverSession: Send {
    /// Enumerates the sources this client can connect to, in driver order.
    fn sources(&mut self) -> anyhow::Result<Vec<SourceId>>;

    /// Connects `source` to the input port; packets are handed to `sink` on
    /// the driver's delivery thread until the session is dropped.
    fn subscribe(&mut self, source: SourceId, sink: PacketSink) -> anyhow::Result<()>;
}
