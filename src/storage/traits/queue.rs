//! Queue contract shared by every tier.

use crate::Result;
use crate::models::{Priority, QueueEntry, QueueProperty, StorageId};
use crate::storage::QueueCounters;
use crate::storage::listener::{PutListener, StorageSizeListener};
use std::sync::Arc;

/// Priority ordered queue storage.
///
/// Entries are kept in one total order: higher priority first, then smaller
/// (older) unique id. Every method is atomic as observed by other callers.
///
/// Entry and byte limits use `-1` for "unbounded". Data operations fail with
/// [`Error::Shutdown`](crate::Error::Shutdown) unless the queue is active;
/// counters and lifecycle queries always answer.
pub trait QueueStorage: Send + Sync {
    /// Logical name of the queue.
    fn storage_id(&self) -> &StorageId;

    /// Capacity bounds.
    fn property(&self) -> QueueProperty;

    /// Makes the queue operational; durable tiers reload what a previous
    /// process left behind. Also resumes a shut down queue.
    fn initialize(&self) -> Result<()>;

    /// Releases runtime resources, keeping durable content.
    fn shutdown(&self) -> Result<()>;

    /// True once shut down or destroyed.
    fn is_shutdown(&self) -> bool;

    /// Removes all content and shuts down for good.
    fn destroy(&self) -> Result<()>;

    /// Inserts entries in total order.
    ///
    /// Duplicate unique ids are skipped. The capacity check runs once before
    /// the batch: the put is accepted while the queue holds no more than
    /// `max_entries` entries and `max_bytes` bytes, which allows exactly one
    /// put beyond the configured bound.
    ///
    /// # Errors
    ///
    /// [`Error::CapacityExceeded`](crate::Error::CapacityExceeded) when full;
    /// nothing is stored in that case.
    fn put(&self, entries: &[QueueEntry], ignore_put_interceptor: bool) -> Result<()>;

    /// Inserts a single entry.
    fn put_entry(&self, entry: &QueueEntry, ignore_put_interceptor: bool) -> Result<()> {
        self.put(std::slice::from_ref(entry), ignore_put_interceptor)
    }

    /// Returns up to `num_entries` entries from the head, stopping before the
    /// byte total would reach `num_bytes` (the first entry always fits).
    fn peek(&self, num_entries: i64, num_bytes: i64) -> Result<Vec<QueueEntry>>;

    /// Returns the head entry.
    fn peek_first(&self) -> Result<Option<QueueEntry>> {
        Ok(self.peek(1, -1)?.into_iter().next())
    }

    /// Like [`peek`](Self::peek), restricted to the highest priority present.
    fn peek_same_priority(&self, num_entries: i64, num_bytes: i64) -> Result<Vec<QueueEntry>>;

    /// Like [`peek`](Self::peek), restricted to `min_prio..=max_prio`.
    fn peek_with_priority(
        &self,
        num_entries: i64,
        num_bytes: i64,
        min_prio: Priority,
        max_prio: Priority,
    ) -> Result<Vec<QueueEntry>>;

    /// Returns every entry ordered strictly before `limit`.
    ///
    /// Empty when `limit` is `None` or not present in the queue.
    fn peek_with_limit_entry(&self, limit: Option<&QueueEntry>) -> Result<Vec<QueueEntry>>;

    /// Returns the lowest ordered entries, lowest first, without removing
    /// them. See [`take_lowest`](Self::take_lowest).
    fn peek_lowest(
        &self,
        num_entries: i64,
        num_bytes: i64,
        limit: Option<&QueueEntry>,
        leave_one: bool,
    ) -> Result<Vec<QueueEntry>>;

    /// Removes and returns the lowest ordered entries, lowest first.
    ///
    /// Scans from the tail while inside range, the range being the less
    /// restrictive of the entry and byte bounds. With `limit`, only entries
    /// ordered strictly after it qualify. With `leave_one`, one entry stays
    /// when the whole queue would be taken.
    fn take_lowest(
        &self,
        num_entries: i64,
        num_bytes: i64,
        limit: Option<&QueueEntry>,
        leave_one: bool,
    ) -> Result<Vec<QueueEntry>>;

    /// Removes and returns what [`peek_with_priority`](Self::peek_with_priority)
    /// would return.
    fn take_with_priority(
        &self,
        num_entries: i64,
        num_bytes: i64,
        min_prio: Priority,
        max_prio: Priority,
    ) -> Result<Vec<QueueEntry>>;

    /// Removes the head entry; returns 1, or 0 when empty.
    fn remove(&self) -> Result<u64> {
        self.remove_num(1)
    }

    /// Removes up to `num_entries` entries from the head.
    fn remove_num(&self, num_entries: u64) -> Result<u64>;

    /// Removes the given entries (by unique id) that are present; returns the
    /// count removed. Missing entries are ignored.
    fn remove_random(&self, entries: &[QueueEntry]) -> Result<u64>;

    /// Removes what [`peek_with_priority`](Self::peek_with_priority) would
    /// return; returns the count.
    fn remove_with_priority(
        &self,
        num_entries: i64,
        num_bytes: i64,
        min_prio: Priority,
        max_prio: Priority,
    ) -> Result<u64>;

    /// Removes every entry ordered before `limit`, and `limit` itself when
    /// `inclusive`.
    fn remove_with_limit_entry(&self, limit: &QueueEntry, inclusive: bool) -> Result<u64>;

    /// Removes every non-persistent entry.
    fn remove_transient(&self) -> Result<u64>;

    /// Removes everything; returns the count removed.
    fn clear(&self) -> Result<u64>;

    /// Unique ids in total order.
    fn entry_references(&self) -> Result<Vec<u64>>;

    /// Entries accepted by `filter`, in total order.
    fn get_entries(&self, filter: &dyn Fn(&QueueEntry) -> bool) -> Result<Vec<QueueEntry>>;

    /// Current totals.
    fn counters(&self) -> QueueCounters;

    /// Number of entries.
    fn num_of_entries(&self) -> u64 {
        self.counters().num_of_entries
    }

    /// Number of bytes.
    fn num_of_bytes(&self) -> u64 {
        self.counters().num_of_bytes
    }

    /// Number of persistent entries.
    fn num_of_persistent_entries(&self) -> u64 {
        self.counters().num_of_persistent_entries
    }

    /// Number of persistent bytes.
    fn num_of_persistent_bytes(&self) -> u64 {
        self.counters().num_of_persistent_bytes
    }

    /// Entry bound.
    fn max_num_of_entries(&self) -> u64 {
        self.property().max_entries
    }

    /// Byte bound.
    fn max_num_of_bytes(&self) -> u64 {
        self.property().max_bytes
    }

    /// Installs (or with `None` removes) the put interceptor; returns the
    /// previous one.
    fn set_put_listener(
        &self,
        listener: Option<Arc<dyn PutListener>>,
    ) -> Option<Arc<dyn PutListener>>;

    /// Registers a size listener.
    fn add_storage_size_listener(&self, listener: Arc<dyn StorageSizeListener>);

    /// Unregisters a size listener; false if it was not registered.
    fn remove_storage_size_listener(&self, listener: &Arc<dyn StorageSizeListener>) -> bool;
}
