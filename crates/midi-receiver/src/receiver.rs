use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::codec::Wire;
use crate::config::ReceiverConfig;
use crate::driver::{DriverSession, MidiDriver, SourceId, SourceInfo};
use crate::error::{Error, Result};
use crate::hotplug::HotplugWatcher;
use crate::ingest::PacketSink;
use crate::queue::{EventQueue, Generation};
use crate::registry::SourceRegistry;
use crate::topology::TopologyMonitor;

struct Topology<S> {
    session: Option<S>,
    registry: SourceRegistry,
}

/// Owning context for one MIDI capture pipeline.
///
/// Driver callbacks push into the shared queue from their own threads; the
/// consumer polls through `&self` methods. Any topology notification marks the
/// receiver dirty, and the next [`count_sources`](Self::count_sources),
/// [`source_name`](Self::source_name) or [`dequeue`](Self::dequeue) call
/// rebuilds the client, the registry and every subscription before answering.
/// Events queued before a rebuild are discarded.
pub struct MidiReceiver<D: MidiDriver> {
    driver: Arc<D>,
    config: ReceiverConfig,
    queue: Arc<EventQueue>,
    monitor: TopologyMonitor,
    topology: Mutex<Topology<D::Session>>,
    rebuilds: AtomicU64,
    _hotplug: Option<HotplugWatcher>,
}

impl<D: MidiDriver> MidiReceiver<D> {
    /// Creates a receiver. Nothing is connected until the first consumer call.
    pub fn new(driver: D, config: ReceiverConfig) -> Result<Self> {
        let driver = Arc::new(driver);
        let monitor = TopologyMonitor::new();
        let hotplug = if driver.install_topology_monitor(monitor.clone()) {
            None
        } else if let Some(interval) = config.hotplug_interval() {
            debug!(?interval, "driver has no change notifications, polling sources");
            Some(HotplugWatcher::spawn(
                Arc::clone(&driver),
                monitor.clone(),
                interval,
            )?)
        } else {
            None
        };
        let registry = match config.max_sources {
            Some(max) => SourceRegistry::with_capacity_limit(max),
            None => SourceRegistry::new(),
        };
        Ok(Self {
            queue: Arc::new(EventQueue::with_capacity(config.queue_capacity)),
            topology: Mutex::new(Topology {
                session: None,
                registry,
            }),
            driver,
            config,
            monitor,
            rebuilds: AtomicU64::new(0),
            _hotplug: hotplug,
        })
    }

    /// Number of currently known sources.
    pub fn count_sources(&self) -> usize {
        self.fresh_topology().registry.count()
    }

    /// Stable id of the source at `index` as of the last rebuild.
    ///
    /// Does not check for pending topology changes; call
    /// [`count_sources`](Self::count_sources) first.
    pub fn source_id_at(&self, index: usize) -> Result<SourceId> {
        self.topology.lock().registry.id_at(index)
    }

    /// Live display name of a source, `None` if it is no longer present.
    pub fn source_name(&self, id: SourceId) -> Option<String> {
        drop(self.fresh_topology());
        self.driver.source_name(id)
    }

    /// Removes and returns the oldest queued message, or
    /// [`EMPTY`](crate::codec::EMPTY) when nothing is queued.
    pub fn dequeue(&self) -> Wire {
        drop(self.fresh_topology());
        self.queue.pop()
    }

    /// Moves every queued message, oldest first, into `out`.
    pub fn drain_into(&self, out: &mut Vec<Wire>) -> usize {
        drop(self.fresh_topology());
        self.queue.drain_into(out)
    }

    /// Ids and names of all registered sources.
    pub fn sources(&self) -> Vec<SourceInfo> {
        let ids = self.fresh_topology().registry.ids().to_vec();
        ids.into_iter()
            .map(|id| SourceInfo {
                id,
                name: self.driver.source_name(id),
            })
            .collect()
    }

    /// Number of queued messages. Does not trigger a rebuild.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Forces a rebuild on the next consumer call.
    pub fn invalidate(&self) {
        self.monitor.invalidate();
    }

    /// Rebuilds immediately if a change is pending, reporting failures.
    ///
    /// Sources that could not be subscribed to do not fail the rebuild: they
    /// are left out of the registry, the rebuild is committed, and the first
    /// such failure is returned as [`Error::Subscribe`].
    pub fn refresh(&self) -> Result<()> {
        let mut topology = self.topology.lock();
        if !self.monitor.take() {
            return Ok(());
        }
        match self.reconnect(&mut topology) {
            Ok(skipped) => skipped.into_iter().next().map_or(Ok(()), Err),
            Err(err) => {
                self.monitor.invalidate();
                Err(err)
            }
        }
    }

    /// Handle for feeding native driver notifications into this receiver.
    pub fn monitor(&self) -> &TopologyMonitor {
        &self.monitor
    }

    /// Whether a rebuild is pending.
    pub fn is_dirty(&self) -> bool {
        self.monitor.is_dirty()
    }

    /// Number of successful rebuilds since creation.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds.load(Ordering::Acquire)
    }

    /// The driver this receiver is connected through.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Active configuration.
    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    /// Locks the topology, running a pending rebuild first.
    ///
    /// The dirty flag is cleared when the rebuild starts, not when it ends, so
    /// a notification arriving mid-rebuild sets it again and is not lost. As a
    /// consequence [`is_dirty`](Self::is_dirty) reads `false` while a rebuild
    /// is in progress; a failed rebuild sets the flag back.
    fn fresh_topology(&self) -> MutexGuard<'_, Topology<D::Session>> {
        let mut topology = self.topology.lock();
        if self.monitor.take() {
            if let Err(err) = self.reconnect(&mut topology) {
                warn!(%err, "midi reconnection failed, retrying on next poll");
                self.monitor.invalidate();
            }
        }
        topology
    }

    /// Returns the per-source subscribe failures of a committed rebuild.
    fn reconnect(&self, topology: &mut Topology<D::Session>) -> Result<Vec<Error>> {
        if topology.session.take().is_some() {
            debug!("disposed previous midi session");
        }
        topology.registry.clear();
        let reset = self.queue.reset();
        if reset.discarded > 0 {
            debug!(
                discarded = reset.discarded,
                "dropped midi events queued before the topology change"
            );
        }

        match self.connect(reset.generation, &mut topology.registry) {
            Ok((session, skipped)) => {
                topology.session = Some(session);
                self.rebuilds.fetch_add(1, Ordering::AcqRel);
                debug!(
                    sources = topology.registry.count(),
                    skipped = skipped.len(),
                    generation = reset.generation,
                    "midi topology rebuilt"
                );
                Ok(skipped)
            }
            Err(err) => {
                topology.registry.clear();
                Err(err)
            }
        }
    }

    fn connect(
        &self,
        generation: Generation,
        registry: &mut SourceRegistry,
    ) -> Result<(D::Session, Vec<Error>)> {
        let mut session = self
            .driver
            .open_session(&self.config.client_name, &self.config.port_name)?;
        registry.rebuild(session.sources()?)?;

        let mut subscribed = Vec::with_capacity(registry.count());
        let mut skipped = Vec::new();
        for &id in registry.ids() {
            let sink = PacketSink::new(id, generation, Arc::clone(&self.queue));
            match session.subscribe(id, sink) {
                Ok(()) => {
                    let name = self.driver.source_name(id);
                    let model = self.driver.source_model(id);
                    info!(
                        id,
                        model = model.as_deref().unwrap_or("?"),
                        name = name.as_deref().unwrap_or("?"),
                        "MIDI source found"
                    );
                    subscribed.push(id);
                }
                Err(err) => {
                    warn!(id, ?err, "skipping midi source that could not be opened");
                    skipped.push(Error::Subscribe(id, err));
                }
            }
        }
        // Unsubscribed sources stay invisible until the next topology change.
        registry.rebuild(subscribed)?;
        Ok((session, skipped))
    }
}

impl<D: MidiDriver> std::fmt::Debug for MidiReceiver<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MidiReceiver")
            .field("config", &self.config)
            .field("dirty", &self.monitor.is_dirty())
            .field("pending", &self.queue.len())
            .field("rebuilds", &self.rebuild_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, EMPTY};
    use crate::virtual_driver::VirtualDriver;

    fn receiver(driver: &VirtualDriver) -> MidiReceiver<VirtualDriver> {
        MidiReceiver::new(driver.clone(), ReceiverConfig::default()).unwrap()
    }

    #[test]
    fn first_call_builds_without_explicit_init() {
        let driver = VirtualDriver::new();
        driver.add_source(11, "Keys");
        let rx = receiver(&driver);
        assert!(rx.is_dirty());
        assert_eq!(driver.sessions_opened(), 0);

        assert_eq!(rx.count_sources(), 1);
        assert_eq!(rx.source_id_at(0).unwrap(), 11);
        assert_eq!(driver.subscriptions(11), 1);
        assert!(!rx.is_dirty());
    }

    #[test]
    fn lazy_rebuild_runs_at_most_once_without_a_new_notification() {
        let driver = VirtualDriver::new();
        driver.add_source(1, "A");
        let rx = receiver(&driver);

        rx.count_sources();
        rx.dequeue();
        rx.source_name(1);
        assert_eq!(rx.rebuild_count(), 1);
        assert_eq!(driver.sessions_opened(), 1);
    }

    #[test]
    fn source_id_at_does_not_rebuild() {
        let driver = VirtualDriver::new();
        let rx = receiver(&driver);
        assert!(rx.source_id_at(0).is_err());
        assert_eq!(rx.rebuild_count(), 0);
        assert!(rx.is_dirty());
    }

    #[test]
    fn failed_open_keeps_the_receiver_dirty_and_retries() {
        let driver = VirtualDriver::new();
        driver.add_source(4, "Drums");
        driver.fail_next_opens(1);
        let rx = receiver(&driver);

        assert_eq!(rx.count_sources(), 0);
        assert!(rx.is_dirty());
        assert_eq!(rx.count_sources(), 1);
        assert!(!rx.is_dirty());
    }

    #[test]
    fn refresh_reports_the_failure() {
        let driver = VirtualDriver::new();
        driver.fail_next_opens(1);
        let rx = receiver(&driver);
        assert!(matches!(rx.refresh(), Err(Error::Driver(_))));
        assert!(rx.is_dirty());
        rx.refresh().unwrap();
        assert!(!rx.is_dirty());
    }

    #[test]
    fn unopenable_source_is_skipped_without_failing_the_rebuild() {
        let driver = VirtualDriver::new();
        driver.add_source(1, "Keys");
        driver.add_source(2, "Held by another app");
        driver.refuse_subscriptions(2);
        let rx = receiver(&driver);

        for _ in 0..3 {
            assert_eq!(rx.count_sources(), 1);
        }
        assert_eq!(rx.rebuild_count(), 1);
        assert_eq!(driver.sessions_opened(), 1);
        assert!(!rx.is_dirty());
        assert_eq!(rx.source_id_at(0).unwrap(), 1);

        driver.send(1, &[&[0x90, 0x3C, 0x40]]);
        assert_eq!(decode(rx.dequeue()), (1, 0x90, 0x3C, 0x40));
        assert_eq!(rx.dequeue(), EMPTY);
    }

    #[test]
    fn refresh_reports_skipped_sources_but_commits_the_rebuild() {
        let driver = VirtualDriver::new();
        driver.add_source(1, "Keys");
        driver.add_source(2, "Busy");
        driver.refuse_subscriptions(2);
        let rx = receiver(&driver);

        assert!(matches!(rx.refresh(), Err(Error::Subscribe(2, _))));
        assert!(!rx.is_dirty());
        assert_eq!(rx.count_sources(), 1);
        assert_eq!(driver.subscriptions(1), 1);
    }

    #[test]
    fn dropped_receiver_no_longer_holds_a_driver_monitor() {
        let driver = VirtualDriver::new();
        let rx = receiver(&driver);
        assert_eq!(driver.registered_monitors(), 1);

        drop(rx);
        driver.add_source(8, "Plugged after teardown");
        assert_eq!(driver.registered_monitors(), 0);
    }

    #[test]
    fn capacity_overflow_fails_loudly_and_keeps_nothing() {
        let driver = VirtualDriver::new();
        for id in 1..=3 {
            driver.add_source(id, format!("Port {id}"));
        }
        let rx = MidiReceiver::new(driver.clone(), ReceiverConfig::default().with_max_sources(2))
            .unwrap();

        assert!(matches!(
            rx.refresh(),
            Err(Error::CapacityExceeded {
                found: 3,
                capacity: 2
            })
        ));
        assert_eq!(rx.count_sources(), 0);
        assert_eq!(driver.subscriptions(1), 0);
        assert!(rx.is_dirty());
    }

    #[test]
    fn invalidate_discards_queued_events() {
        let driver = VirtualDriver::new();
        driver.add_source(2, "Pads");
        let rx = receiver(&driver);
        rx.count_sources();

        driver.send(2, &[&[0x90, 0x30, 0x50], &[0x80, 0x30, 0x00]]);
        assert_eq!(rx.pending(), 2);

        rx.invalidate();
        assert_eq!(rx.dequeue(), EMPTY);
        assert_eq!(rx.rebuild_count(), 2);
        assert_eq!(driver.subscriptions(2), 1);

        driver.send(2, &[&[0xB0, 0x01, 0x10]]);
        assert_eq!(decode(rx.dequeue()), (2, 0xB0, 0x01, 0x10));
    }

    #[test]
    fn drain_into_and_sources_snapshot() {
        let driver = VirtualDriver::new();
        driver.add_source(8, "Wind");
        let rx = receiver(&driver);
        let sources = rx.sources();
        assert_eq!(
            sources,
            vec![SourceInfo {
                id: 8,
                name: Some("Wind".into())
            }]
        );

        driver.send(8, &[&[0xE0, 0x00, 0x40], &[0xE0, 0x7F, 0x7F]]);
        let mut out = Vec::new();
        assert_eq!(rx.drain_into(&mut out), 2);
        assert_eq!(decode(out[0]).3, 0x40);
        assert_eq!(rx.dequeue(), EMPTY);
    }
}
