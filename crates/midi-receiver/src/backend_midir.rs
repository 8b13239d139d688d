use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use midir::{Ignore, MidiInput, MidiInputConnection, MidiInputPort};
use parking_lot::Mutex;

use crate::driver::{DriverSession, MidiDriver, SourceId};
use crate::ingest::PacketSink;

const PROBE_CLIENT: &str = "midi-receiver-probe";

/// Maps midir's opaque port id strings onto compact numeric source ids.
///
/// Ids start at 1 and are never reused within the process, so a source keeps
/// its id for as long as the platform keeps its port id.
#[derive(Debug)]
struct PortIds {
    by_port: HashMap<String, SourceId>,
    by_id: HashMap<SourceId, String>,
    next: SourceId,
}

impl Default for PortIds {
    fn default() -> Self {
        Self {
            by_port: HashMap::new(),
            by_id: HashMap::new(),
            next: 1,
        }
    }
}

impl PortIds {
    fn intern(&mut self, port_id: String) -> SourceId {
        if let Some(id) = self.by_port.get(&port_id) {
            return *id;
        }
        let id = self.next;
        self.next = self.next.wrapping_add(1).max(1);
        self.by_id.insert(id, port_id.clone());
        self.by_port.insert(port_id, id);
        id
    }

    fn port_id(&self, id: SourceId) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }
}

/// Driver implemented using the `midir` crate.
///
/// midir has no change notifications, so receivers built on it rely on the
/// hotplug poller.
#[derive(Debug, Default)]
pub struct MidirDriver {
    ids: Arc<Mutex<PortIds>>,
}

impl MidirDriver {
    /// Creates a driver with an empty id table.
    pub fn new() -> Self {
        Self::default()
    }

    fn enumerate(&self, input: &MidiInput) -> Vec<(SourceId, MidiInputPort)> {
        let mut ids = self.ids.lock();
        input
            .ports()
            .into_iter()
            .map(|port| (ids.intern(port.id()), port))
            .collect()
    }
}

impl MidiDriver for MidirDriver {
    type Session = MidirSession;

    fn open_session(&self, client_name: &str, port_name: &str) -> anyhow::Result<MidirSession> {
        let client = MidiInput::new(client_name).context("initialise midir client")?;
        Ok(MidirSession {
            ids: Arc::clone(&self.ids),
            client_name: client_name.to_owned(),
            port_name: port_name.to_owned(),
            client,
            ports: HashMap::new(),
            connections: Vec::new(),
        })
    }

    fn source_ids(&self) -> anyhow::Result<Vec<SourceId>> {
        let input = MidiInput::new(PROBE_CLIENT).context("initialise midir for enumeration")?;
        Ok(self.enumerate(&input).into_iter().map(|(id, _)| id).collect())
    }

    fn source_name(&self, id: SourceId) -> Option<String> {
        let port_id = self.ids.lock().port_id(id)?.to_owned();
        let input = MidiInput::new(PROBE_CLIENT).ok()?;
        let port = input.find_port_by_id(port_id)?;
        input.port_name(&port).ok()
    }
}

/// Open midir client plus the connections made through it.
pub struct MidirSession {
    ids: Arc<Mutex<PortIds>>,
    client_name: String,
    port_name: String,
    client: MidiInput,
    ports: HashMap<SourceId, MidiInputPort>,
    connections: Vec<(SourceId, MidiInputConnection<()>)>,
}

impl DriverSession for MidirSession {
    fn sources(&mut self) -> anyhow::Result<Vec<SourceId>> {
        let mut ids = self.ids.lock();
        self.ports.clear();
        let mut order = Vec::new();
        for port in self.client.ports() {
            let id = ids.intern(port.id());
            order.push(id);
            self.ports.insert(id, port);
        }
        Ok(order)
    }

    fn subscribe(&mut self, source: SourceId, sink: PacketSink) -> anyhow::Result<()> {
        let Some(port) = self.ports.get(&source) else {
            anyhow::bail!("midi source {source} was not enumerated by this session");
        };
        // midir consumes the input object on connect, one per subscription.
        let mut input =
            MidiInput::new(&self.client_name).context("initialise midir for input")?;
        input.ignore(Ignore::None);
        let connection = input
            .connect(
                port,
                &self.port_name,
                move |_timestamp, message, _| {
                    sink.deliver_packet(message);
                },
                (),
            )
            .map_err(|err| anyhow::anyhow!("failed to connect midi input: {err}"))?;
        self.connections.push((source, connection));
        Ok(())
    }
}

impl Drop for MidirSession {
    fn drop(&mut self) {
        for (source, connection) in self.connections.drain(..) {
            tracing::debug!(source, "closing midi input connection");
            connection.close();
        }
    }
}

impl std::fmt::Debug for MidirSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MidirSession")
            .field("client_name", &self.client_name)
            .field("port_name", &self.port_name)
            .field("connections", &self.connections.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interned_ids_are_stable_and_never_zero() {
        let mut ids = PortIds::default();
        let a = ids.intern("alsa:20:0".into());
        let b = ids.intern("alsa:24:0".into());
        assert_ne!(a, 0);
        assert_ne!(a, b);
        assert_eq!(ids.intern("alsa:20:0".into()), a);
        assert_eq!(ids.port_id(b), Some("alsa:24:0"));
        assert_eq!(ids.port_id(99), None);
    }
}
