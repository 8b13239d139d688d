//! In-memory MIDI driver.
//!
//! Sources can be plugged, unplugged and fed packet batches from any thread,
//! which makes it the driver of choice for tests and for hosts that want a
//! loopback input alongside hardware.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::driver::{DriverSession, MidiDriver, SourceId};
use crate::ingest::PacketSink;
use crate::topology::{TopologyChange, TopologyMonitor, WeakTopologyMonitor};

type SessionId = u64;

#[derive(Debug)]
struct VirtualSource {
    id: SourceId,
    name: String,
    model: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    sources: Vec<VirtualSource>,
    subscriptions: HashMap<SourceId, Vec<(SessionId, PacketSink)>>,
    monitors: Vec<WeakTopologyMonitor>,
    refused: HashSet<SourceId>,
    next_session: SessionId,
    failing_opens: usize,
}

impl State {
    /// Live monitors; handles whose receiver has gone away are pruned.
    fn live_monitors(&mut self) -> Vec<TopologyMonitor> {
        self.monitors.retain(|monitor| !monitor.is_dead());
        self.monitors
            .iter()
            .filter_map(WeakTopologyMonitor::upgrade)
            .collect()
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    sessions_opened: AtomicUsize,
    enumerations: AtomicUsize,
    notifications: bool,
}

/// Driver whose topology and traffic are scripted by the caller.
///
/// Clones share the same simulated MIDI service.
#[derive(Debug, Clone)]
pub struct VirtualDriver {
    shared: Arc<Shared>,
}

impl Default for VirtualDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualDriver {
    /// Creates an empty driver that notifies monitors on plug/unplug.
    pub fn new() -> Self {
        Self::build(true)
    }

    /// Creates an empty driver with no native change notifications, so
    /// receivers have to poll it.
    pub fn without_notifications() -> Self {
        Self::build(false)
    }

    fn build(notifications: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                notifications,
                ..Default::default()
            }),
        }
    }

    /// Plugs in a source.
    pub fn add_source(&self, id: SourceId, name: impl Into<String>) {
        let monitors = {
            let mut state = self.shared.state.lock();
            state.sources.retain(|source| source.id != id);
            state.sources.push(VirtualSource {
                id,
                name: name.into(),
                model: None,
            });
            state.live_monitors()
        };
        for monitor in monitors {
            monitor.notify(TopologyChange::source_added(id));
        }
    }

    /// Unplugs a source, severing any subscription to it.
    pub fn remove_source(&self, id: SourceId) -> bool {
        let (removed, monitors) = {
            let mut state = self.shared.state.lock();
            let before = state.sources.len();
            state.sources.retain(|source| source.id != id);
            state.subscriptions.remove(&id);
            (state.sources.len() != before, state.live_monitors())
        };
        if removed {
            for monitor in monitors {
                monitor.notify(TopologyChange::source_removed(id));
            }
        }
        removed
    }

    /// Renames a source without changing the topology.
    pub fn rename_source(&self, id: SourceId, name: impl Into<String>) -> bool {
        let mut state = self.shared.state.lock();
        match state.sources.iter_mut().find(|source| source.id == id) {
            Some(source) => {
                source.name = name.into();
                true
            }
            None => false,
        }
    }

    /// Sets the model string reported for a plugged source.
    pub fn set_source_model(&self, id: SourceId, model: impl Into<String>) -> bool {
        let mut state = self.shared.state.lock();
        match state.sources.iter_mut().find(|source| source.id == id) {
            Some(source) => {
                source.model = Some(model.into());
                true
            }
            None => false,
        }
    }

    /// Makes every future subscription to `source` fail while it stays plugged in.
    pub fn refuse_subscriptions(&self, source: SourceId) {
        self.shared.state.lock().refused.insert(source);
    }

    /// Delivers a packet batch from `source` to every live subscription,
    /// the way a driver delivery thread would. Returns the number of
    /// messages accepted across subscriptions.
    pub fn send(&self, source: SourceId, packets: &[&[u8]]) -> usize {
        let sinks: Vec<PacketSink> = {
            let state = self.shared.state.lock();
            state
                .subscriptions
                .get(&source)
                .map(|subs| subs.iter().map(|(_, sink)| sink.clone()).collect())
                .unwrap_or_default()
        };
        sinks
            .iter()
            .map(|sink| sink.deliver(packets.iter().copied()))
            .sum()
    }

    /// Makes the next `count` session opens fail.
    pub fn fail_next_opens(&self, count: usize) {
        self.shared.state.lock().failing_opens = count;
    }

    /// Total sessions successfully opened so far.
    pub fn sessions_opened(&self) -> usize {
        self.shared.sessions_opened.load(Ordering::Acquire)
    }

    /// Total calls to [`MidiDriver::source_ids`] so far.
    pub fn enumerations(&self) -> usize {
        self.shared.enumerations.load(Ordering::Acquire)
    }

    /// Number of registered monitors whose receiver is still alive.
    pub fn registered_monitors(&self) -> usize {
        self.shared.state.lock().live_monitors().len()
    }

    /// Number of live subscriptions to `source`.
    pub fn subscriptions(&self, source: SourceId) -> usize {
        self.shared
            .state
            .lock()
            .subscriptions
            .get(&source)
            .map_or(0, Vec::len)
    }
}

impl MidiDriver for VirtualDriver {
    type Session = VirtualSession;

    fn open_session(&self, client_name: &str, port_name: &str) -> anyhow::Result<VirtualSession> {
        let mut state = self.shared.state.lock();
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            anyhow::bail!("virtual driver refused to create client {client_name:?}");
        }
        let id = state.next_session;
        state.next_session += 1;
        self.shared.sessions_opened.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(client_name, port_name, session = id, "virtual midi session opened");
        Ok(VirtualSession {
            shared: Arc::clone(&self.shared),
            id,
        })
    }

    fn source_ids(&self) -> anyhow::Result<Vec<SourceId>> {
        let ids = self
            .shared
            .state
            .lock()
            .sources
            .iter()
            .map(|source| source.id)
            .collect();
        self.shared.enumerations.fetch_add(1, Ordering::AcqRel);
        Ok(ids)
    }

    fn source_name(&self, id: SourceId) -> Option<String> {
        self.shared
            .state
            .lock()
            .sources
            .iter()
            .find(|source| source.id == id)
            .map(|source| source.name.clone())
    }

    fn source_model(&self, id: SourceId) -> Option<String> {
        self.shared
            .state
            .lock()
            .sources
            .iter()
            .find(|source| source.id == id)
            .and_then(|source| source.model.clone())
    }

    fn install_topology_monitor(&self, monitor: TopologyMonitor) -> bool {
        if !self.shared.notifications {
            return false;
        }
        let mut state = self.shared.state.lock();
        state.monitors.retain(|registered| !registered.is_dead());
        state.monitors.push(monitor.downgrade());
        true
    }
}

/// Session handed out by [`VirtualDriver`]; unsubscribes everything on drop.
#[derive(Debug)]
pub struct VirtualSession {
    shared: Arc<Shared>,
    id: SessionId,
}

impl DriverSession for VirtualSession {
    fn sources(&mut self) -> anyhow::Result<Vec<SourceId>> {
        Ok(self
            .shared
            .state
            .lock()
            .sources
            .iter()
            .map(|source| source.id)
            .collect())
    }

    fn subscribe(&mut self, source: SourceId, sink: PacketSink) -> anyhow::Result<()> {
        let mut state = self.shared.state.lock();
        if !state.sources.iter().any(|candidate| candidate.id == source) {
            anyhow::bail!("virtual source {source} is not plugged in");
        }
        if state.refused.contains(&source) {
            anyhow::bail!("virtual source {source} refused the connection");
        }
        state
            .subscriptions
            .entry(source)
            .or_default()
            .push((self.id, sink));
        Ok(())
    }
}

impl Drop for VirtualSession {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        for subs in state.subscriptions.values_mut() {
            subs.retain(|(session, _)| *session != self.id);
        }
        state.subscriptions.retain(|_, subs| !subs.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::EventQueue;

    #[test]
    fn dropping_the_session_unsubscribes() {
        let driver = VirtualDriver::new();
        driver.add_source(5, "Pads");
        let queue = Arc::new(EventQueue::default());

        let mut session = driver.open_session("client", "port").unwrap();
        session
            .subscribe(5, PacketSink::new(5, queue.generation(), Arc::clone(&queue)))
            .unwrap();
        assert_eq!(driver.send(5, &[&[0x99, 0x24, 0x7F]]), 1);

        drop(session);
        assert_eq!(driver.subscriptions(5), 0);
        assert_eq!(driver.send(5, &[&[0x89, 0x24, 0x00]]), 0);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn subscribing_to_an_absent_source_fails() {
        let driver = VirtualDriver::new();
        let queue = Arc::new(EventQueue::default());
        let mut session = driver.open_session("client", "port").unwrap();
        assert!(session
            .subscribe(1, PacketSink::new(1, 0, queue))
            .is_err());
    }

    #[test]
    fn refused_source_fails_to_subscribe() {
        let driver = VirtualDriver::new();
        driver.add_source(1, "A");
        driver.add_source(2, "B");
        driver.refuse_subscriptions(2);
        let queue = Arc::new(EventQueue::default());
        let mut session = driver.open_session("client", "port").unwrap();
        assert!(session
            .subscribe(1, PacketSink::new(1, 0, Arc::clone(&queue)))
            .is_ok());
        assert!(session.subscribe(2, PacketSink::new(2, 0, queue)).is_err());
        assert_eq!(driver.subscriptions(2), 0);
    }

    #[test]
    fn model_is_reported_only_once_set() {
        let driver = VirtualDriver::new();
        driver.add_source(6, "Port 1");
        assert_eq!(driver.source_model(6), None);
        assert!(driver.set_source_model(6, "Keystation 49"));
        assert_eq!(driver.source_model(6).as_deref(), Some("Keystation 49"));
        assert!(!driver.set_source_model(7, "Missing"));
    }

    #[test]
    fn dropped_monitors_are_pruned() {
        let driver = VirtualDriver::new();
        let kept = TopologyMonitor::new();
        assert!(driver.install_topology_monitor(kept.clone()));
        assert!(driver.install_topology_monitor(TopologyMonitor::new()));
        assert_eq!(driver.registered_monitors(), 1);

        drop(kept);
        driver.add_source(3, "Late");
        assert_eq!(driver.registered_monitors(), 0);
    }

    #[test]
    fn scripted_open_failures_are_consumed() {
        let driver = VirtualDriver::new();
        driver.fail_next_opens(1);
        assert!(driver.open_session("c", "p").is_err());
        assert!(driver.open_session("c", "p").is_ok());
        assert_eq!(driver.sessions_opened(), 1);
    }
}
