use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::driver::SourceId;

/// Kind of driver object a topology notification refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// MIDI input endpoint.
    Source,
    /// MIDI output endpoint.
    Destination,
    /// Physical or virtual device owning endpoints.
    Device,
    /// Entity grouping endpoints within a device.
    Entity,
}

/// Notification delivered by a driver when its object graph changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyChange {
    /// An object appeared.
    Added { kind: ObjectKind, id: u32 },
    /// An object went away.
    Removed { kind: ObjectKind, id: u32 },
    /// A property (name, model, ...) changed on an object.
    PropertyChanged { kind: ObjectKind, id: u32 },
    /// Catch-all "something changed" notification.
    SetupChanged,
}

impl TopologyChange {
    /// A source appeared.
    pub fn source_added(id: SourceId) -> Self {
        Self::Added {
            kind: ObjectKind::Source,
            id,
        }
    }

    /// A source went away.
    pub fn source_removed(id: SourceId) -> Self {
        Self::Removed {
            kind: ObjectKind::Source,
            id,
        }
    }

    /// Whether this notification invalidates the source registry.
    pub fn affects_sources(&self) -> bool {
        matches!(
            self,
            Self::Added {
                kind: ObjectKind::Source,
                ..
            } | Self::Removed {
                kind: ObjectKind::Source,
                ..
            }
        )
    }
}

/// Dirty flag shared between driver notification threads and the receiver.
///
/// Clones share the same flag. A fresh monitor starts dirty so the first
/// consumer call builds the topology without an explicit initialise step.
#[derive(Debug, Clone)]
pub struct TopologyMonitor {
    dirty: Arc<AtomicBool>,
}

impl Default for TopologyMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl TopologyMonitor {
    /// Creates a monitor in the dirty state.
    pub fn new() -> Self {
        Self {
            dirty: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Handles a driver notification. Returns `true` if it marked the topology dirty.
    pub fn notify(&self, change: TopologyChange) -> bool {
        if !change.affects_sources() {
            return false;
        }
        tracing::debug!(?change, "midi topology changed");
        self.invalidate();
        true
    }

    /// Forces a rebuild on the next consumer call.
    pub fn invalidate(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Whether a rebuild is pending.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Non-owning handle for drivers that outlive the receiver.
    pub fn downgrade(&self) -> WeakTopologyMonitor {
        WeakTopologyMonitor {
            dirty: Arc::downgrade(&self.dirty),
        }
    }

    /// Clears the flag, returning whether it was set.
    pub(crate) fn take(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }
}

/// Weak counterpart of [`TopologyMonitor`]; dead once every strong clone is dropped.
#[derive(Debug, Clone)]
pub struct WeakTopologyMonitor {
    dirty: Weak<AtomicBool>,
}

impl WeakTopologyMonitor {
    /// Recovers the monitor if its receiver is still alive.
    pub fn upgrade(&self) -> Option<TopologyMonitor> {
        self.dirty.upgrade().map(|dirty| TopologyMonitor { dirty })
    }

    /// Whether the owning monitor has been dropped.
    pub fn is_dead(&self) -> bool {
        self.dirty.strong_count() == 0
    }
}
