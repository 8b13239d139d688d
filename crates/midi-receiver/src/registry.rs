use crate::driver::SourceId;
use crate::error::{Error, Result};

/// Ordered table of the sources seen by the last topology rebuild.
///
/// Indices are assigned in driver enumeration order and carry no meaning
/// beyond that; stable ids are what callers hold on to.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    ids: Vec<SourceId>,
    capacity: Option<usize>,
}

impl SourceRegistry {
    /// Creates an unbounded registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry that refuses to hold more than `capacity` sources.
    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            ids: Vec::with_capacity(capacity.min(256)),
            capacity: Some(capacity),
        }
    }

    /// Replaces the table with a fresh enumeration.
    ///
    /// On overflow the registry is left empty rather than truncated.
    pub fn rebuild(&mut self, ids: impl IntoIterator<Item = SourceId>) -> Result<()> {
        self.ids.clear();
        self.ids.extend(ids);
        if let Some(capacity) = self.capacity {
            if self.ids.len() > capacity {
                let found = self.ids.len();
                self.ids.clear();
                return Err(Error::CapacityExceeded { found, capacity });
            }
        }
        Ok(())
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.ids.clear();
    }

    /// Number of registered sources.
    pub fn count(&self) -> usize {
        self.ids.len()
    }

    /// Whether no sources are registered.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Stable id of the source at `index`.
    pub fn id_at(&self, index: usize) -> Result<SourceId> {
        self.ids.get(index).copied().ok_or(Error::IndexOutOfRange {
            index,
            len: self.ids.len(),
        })
    }

    /// Whether `id` was present at the last rebuild.
    pub fn contains(&self, id: SourceId) -> bool {
        self.ids.contains(&id)
    }

    /// Registered ids in index order.
    pub fn ids(&self) -> &[SourceId] {
        &self.ids
    }
}
