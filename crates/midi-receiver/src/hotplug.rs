use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};

use crate::driver::{MidiDriver, SourceId};
use crate::topology::{TopologyChange, TopologyMonitor};

/// Source additions and removals between two enumerations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    /// Ids present now but not before.
    pub added: Vec<SourceId>,
    /// Ids present before but not now.
    pub removed: Vec<SourceId>,
}

impl SnapshotDiff {
    /// Compares two enumerations.
    pub fn between(previous: &BTreeSet<SourceId>, current: &BTreeSet<SourceId>) -> Self {
        Self {
            added: current.difference(previous).copied().collect(),
            removed: previous.difference(current).copied().collect(),
        }
    }

    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Forwards the diff to `monitor` as individual notifications.
    pub fn notify(&self, monitor: &TopologyMonitor) {
        for id in &self.added {
            monitor.notify(TopologyChange::source_added(*id));
        }
        for id in &self.removed {
            monitor.notify(TopologyChange::source_removed(*id));
        }
    }
}

/// Watcher that periodically enumerates driver sources and reports changes
/// to a [`TopologyMonitor`].
///
/// Stands in for the driver's notification thread on backends without
/// native change callbacks.
pub struct HotplugWatcher {
    stop_tx: Option<Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl HotplugWatcher {
    /// Spawn a new watcher.
    pub fn spawn<D: MidiDriver>(
        driver: Arc<D>,
        monitor: TopologyMonitor,
        interval: Duration,
    ) -> anyhow::Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("midi-receiver-hotplug".into())
            .spawn(move || {
                let mut previous: Option<BTreeSet<SourceId>> = None;
                loop {
                    match driver.source_ids() {
                        Ok(ids) => {
                            let current: BTreeSet<SourceId> = ids.into_iter().collect();
                            if let Some(previous) = &previous {
                                let diff = SnapshotDiff::between(previous, &current);
                                if !diff.is_empty() {
                                    tracing::debug!(?diff, "midi hotplug detected a change");
                                    diff.notify(&monitor);
                                }
                            }
                            previous = Some(current);
                        }
                        Err(err) => {
                            tracing::debug!(?err, "midi hotplug enumerate failed");
                        }
                    }
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;
        Ok(Self {
            stop_tx: Some(stop_tx),
            thread: Some(handle),
        })
    }
}

impl Drop for HotplugWatcher {
    fn drop(&mut self) {
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.try_send(());
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for HotplugWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotplugWatcher")
            .field("running", &self.thread.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_driver::VirtualDriver;
    use std::time::Instant;

    #[test]
    fn diff_reports_both_directions() {
        let before: BTreeSet<_> = [1, 2, 3].into_iter().collect();
        let after: BTreeSet<_> = [2, 3, 4].into_iter().collect();
        let diff = SnapshotDiff::between(&before, &after);
        assert_eq!(diff.added, vec![4]);
        assert_eq!(diff.removed, vec![1]);
        assert!(SnapshotDiff::between(&after, &after).is_empty());
    }

    #[test]
    fn polling_marks_monitor_dirty_on_change() {
        let driver = Arc::new(VirtualDriver::without_notifications());
        driver.add_source(1, "Keys");
        let monitor = TopologyMonitor::new();
        monitor.take();

        let watcher =
            HotplugWatcher::spawn(Arc::clone(&driver), monitor.clone(), Duration::from_millis(5))
                .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while driver.enumerations() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!monitor.is_dirty());

        driver.remove_source(1);
        while !monitor.is_dirty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        drop(watcher);
        assert!(monitor.is_dirty());
    }
}
