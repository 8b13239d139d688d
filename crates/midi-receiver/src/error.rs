use thiserror::Error;

use crate::driver::SourceId;

/// Errors that can be produced while tracking MIDI sources.
#[derive(Debug, Error)]
pub enum Error {
    /// The driver reported more sources than the configured registry capacity.
    #[error("driver reported {found} MIDI sources but the registry holds at most {capacity}")]
    CapacityExceeded {
        /// Number of sources the driver enumerated.
        found: usize,
        /// Configured upper bound.
        capacity: usize,
    },
    /// A registry index outside `0..len` was requested.
    #[error("source index {index} out of range (registry holds {len})")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Registry size at the time of the request.
        len: usize,
    },
    /// The driver could not subscribe to a source.
    #[error("failed to subscribe to MIDI source {0}")]
    Subscribe(SourceId, #[source] anyhow::Error),
    /// Driver specific failure with additional context.
    #[error("driver error: {0:#}")]
    Driver(#[from] anyhow::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
