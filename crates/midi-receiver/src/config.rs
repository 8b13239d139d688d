use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for a [`crate::MidiReceiver`].
///
/// Hosts build this in code or deserialize it from their own settings; the
/// receiver never reads configuration from disk or the environment.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Name the MIDI client registers under.
    pub client_name: String,
    /// Name of the input port sources are connected to.
    pub port_name: String,
    /// Hard upper bound on tracked sources. `None` tracks any number.
    pub max_sources: Option<usize>,
    /// Interval for polling the driver's source list when it has no native
    /// change notifications. `None` disables polling.
    pub hotplug_poll_interval_ms: Option<u64>,
    /// Events the queue can hold before its first reallocation.
    pub queue_capacity: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            client_name: "MIDI Receiver Client".into(),
            port_name: "MIDI Receiver Input Port".into(),
            max_sources: None,
            hotplug_poll_interval_ms: Some(1_000),
            queue_capacity: 1_024,
        }
    }
}

impl ReceiverConfig {
    /// Caps the number of tracked sources.
    pub fn with_max_sources(mut self, max: usize) -> Self {
        self.max_sources = Some(max);
        self
    }

    /// Sets or disables the hotplug polling interval.
    pub fn with_hotplug_interval(mut self, interval: Option<Duration>) -> Self {
        self.hotplug_poll_interval_ms = interval.map(|d| d.as_millis() as u64);
        self
    }

    /// Hotplug polling interval, if enabled.
    pub fn hotplug_interval(&self) -> Option<Duration> {
        self.hotplug_poll_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}
