//! Queue capacity properties.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Capacity bounds of a queue.
///
/// The outer numbers bound the whole queue; the cache numbers bound the hot
/// (in-memory) tier of a cache queue and are ignored by the other tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueProperty {
    /// Maximum number of entries in the queue.
    pub max_entries: u64,
    /// Maximum number of bytes in the queue.
    pub max_bytes: u64,
    /// Maximum number of entries in the hot tier.
    pub max_entries_cache: u64,
    /// Maximum number of bytes in the hot tier.
    pub max_bytes_cache: u64,
}

impl QueueProperty {
    /// Default entry limit.
    pub const DEFAULT_MAX_ENTRIES: u64 = 1000;
    /// Default byte limit (10 MiB).
    pub const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;
    /// Default hot tier entry limit.
    pub const DEFAULT_MAX_ENTRIES_CACHE: u64 = 1000;
    /// Default hot tier byte limit (2 MiB).
    pub const DEFAULT_MAX_BYTES_CACHE: u64 = 2 * 1024 * 1024;

    /// Creates a property with the given outer bounds; cache bounds are
    /// clamped to them.
    #[must_use]
    pub fn new(max_entries: u64, max_bytes: u64) -> Self {
        Self {
            max_entries,
            max_bytes,
            max_entries_cache: Self::DEFAULT_MAX_ENTRIES_CACHE.min(max_entries),
            max_bytes_cache: Self::DEFAULT_MAX_BYTES_CACHE.min(max_bytes),
        }
    }

    /// Sets the hot tier bounds.
    #[must_use]
    pub const fn with_cache(mut self, max_entries_cache: u64, max_bytes_cache: u64) -> Self {
        self.max_entries_cache = max_entries_cache;
        self.max_bytes_cache = max_bytes_cache;
        self
    }

    /// Bounds for the hot tier of a cache queue.
    #[must_use]
    pub const fn cache_bounds(&self) -> Self {
        Self {
            max_entries: self.max_entries_cache,
            max_bytes: self.max_bytes_cache,
            max_entries_cache: self.max_entries_cache,
            max_bytes_cache: self.max_bytes_cache,
        }
    }

    /// Checks that the cache bounds fit inside the queue bounds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if a cache bound is larger than
    /// its outer bound.
    pub fn validate(&self) -> Result<()> {
        if self.max_entries_cache > self.max_entries {
            return Err(Error::ConfigurationError(format!(
                "max_entries_cache ({}) exceeds max_entries ({})",
                self.max_entries_cache, self.max_entries
            )));
        }
        if self.max_bytes_cache > self.max_bytes {
            return Err(Error::ConfigurationError(format!(
                "max_bytes_cache ({}) exceeds max_bytes ({})",
                self.max_bytes_cache, self.max_bytes
            )));
        }
        Ok(())
    }
}

impl Default for QueueProperty {
    fn default() -> Self {
        Self {
            max_entries: Self::DEFAULT_MAX_ENTRIES,
            max_bytes: Self::DEFAULT_MAX_BYTES,
            max_entries_cache: Self::DEFAULT_MAX_ENTRIES_CACHE,
            max_bytes_cache: Self::DEFAULT_MAX_BYTES_CACHE,
        }
    }
}
