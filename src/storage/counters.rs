//! Aggregate entry and byte counters.

use crate::models::{QueueEntry, QueueProperty, StorageId};
use crate::{Error, Result};
use serde::Serialize;

/// Entry and byte totals of a queue.
///
/// Persistent totals count by the entry's `persistent` flag, not by the tier
/// that happens to hold the entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounters {
    /// Number of entries.
    pub num_of_entries: u64,
    /// Sum of `size_in_bytes`.
    pub num_of_bytes: u64,
    /// Number of persistent entries.
    pub num_of_persistent_entries: u64,
    /// Sum of `size_in_bytes` over persistent entries.
    pub num_of_persistent_bytes: u64,
}

impl QueueCounters {
    /// Accounts for an added entry.
    pub fn add(&mut self, entry: &QueueEntry) {
        self.add_slot(entry.size_in_bytes, entry.persistent);
    }

    /// Accounts for a removed entry.
    pub fn subtract(&mut self, entry: &QueueEntry) {
        self.subtract_slot(entry.size_in_bytes, entry.persistent);
    }

    pub(crate) const fn add_slot(&mut self, size: u64, persistent: bool) {
        self.num_of_entries += 1;
        self.num_of_bytes += size;
        if persistent {
            self.num_of_persistent_entries += 1;
            self.num_of_persistent_bytes += size;
        }
    }

    pub(crate) const fn subtract_slot(&mut self, size: u64, persistent: bool) {
        self.num_of_entries = self.num_of_entries.saturating_sub(1);
        self.num_of_bytes = self.num_of_bytes.saturating_sub(size);
        if persistent {
            self.num_of_persistent_entries = self.num_of_persistent_entries.saturating_sub(1);
            self.num_of_persistent_bytes = self.num_of_persistent_bytes.saturating_sub(size);
        }
    }

    /// Field-wise sum.
    #[must_use]
    pub const fn combined(&self, other: &Self) -> Self {
        Self {
            num_of_entries: self.num_of_entries + other.num_of_entries,
            num_of_bytes: self.num_of_bytes + other.num_of_bytes,
            num_of_persistent_entries: self.num_of_persistent_entries
                + other.num_of_persistent_entries,
            num_of_persistent_bytes: self.num_of_persistent_bytes + other.num_of_persistent_bytes,
        }
    }
}

/// Rejects a put once the queue holds more than its bounds.
///
/// The check runs against the state before the put, so the put that crosses a
/// bound is still accepted and the next one is refused.
pub(crate) fn check_capacity(
    storage_id: &StorageId,
    property: &QueueProperty,
    counters: &QueueCounters,
    tier: &'static str,
) -> Result<()> {
    let reason = if counters.num_of_entries > property.max_entries {
        format!(
            "max entries ({}) exceeded, {} entries held",
            property.max_entries, counters.num_of_entries
        )
    } else if counters.num_of_bytes > property.max_bytes {
        format!(
            "max bytes ({}) exceeded, {} bytes held",
            property.max_bytes, counters.num_of_bytes
        )
    } else {
        return Ok(());
    };
    metrics::counter!("queue_capacity_rejections_total", "tier" => tier).increment(1);
    tracing::debug!(storage_id = %storage_id, tier, reason = %reason, "Put rejected");
    Err(Error::CapacityExceeded {
        storage_id: storage_id.to_string(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Priority;

    #[test]
    fn test_add_subtract_by_flag() {
        let durable = QueueEntry::new(Priority::NORM, true, "t", vec![0; 10]);
        let transient = QueueEntry::new(Priority::NORM, false, "t", vec![0; 4]);

        let mut counters = QueueCounters::default();
        counters.add(&durable);
        counters.add(&transient);
        assert_eq!(counters.num_of_entries, 2);
        assert_eq!(counters.num_of_bytes, 14);
        assert_eq!(counters.num_of_persistent_entries, 1);
        assert_eq!(counters.num_of_persistent_bytes, 10);

        counters.subtract(&durable);
        assert_eq!(counters.num_of_persistent_entries, 0);
        assert_eq!(counters.num_of_bytes, 4);
    }

    #[test]
    fn test_capacity_allows_one_overflow() {
        let id = StorageId::parse("callback:cap").unwrap();
        let property = QueueProperty::new(2, 1000);
        let mut counters = QueueCounters::default();
        for _ in 0..3 {
            assert!(check_capacity(&id, &property, &counters, "test").is_ok());
            counters.add_slot(1, false);
        }
        assert!(matches!(
            check_capacity(&id, &property, &counters, "test"),
            Err(Error::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn test_combined() {
        let mut a = QueueCounters::default();
        a.add_slot(5, true);
        let mut b = QueueCounters::default();
        b.add_slot(7, false);
        let sum = a.combined(&b);
        assert_eq!(sum.num_of_entries, 2);
        assert_eq!(sum.num_of_bytes, 12);
        assert_eq!(sum.num_of_persistent_bytes, 5);
    }
}
