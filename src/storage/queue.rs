//! Closed set of queue tiers behind one type.

use crate::Result;
use crate::models::{Priority, QueueEntry, QueueProperty, StorageId};
use crate::storage::listener::{PutListener, StorageSizeListener};
use crate::storage::traits::QueueStorage;
use crate::storage::{CacheQueue, InMemoryQueue, QueueCounters, RelationalQueue};
use std::sync::Arc;

/// A queue of any tier, as resolved by [`QueueFactory`](crate::QueueFactory).
#[derive(Debug)]
pub enum Queue {
    /// In-memory tier.
    InMemory(InMemoryQueue),
    /// `SQLite` tier.
    Relational(RelationalQueue),
    /// Hot in-memory prefix over a `SQLite` remainder.
    Cache(Arc<CacheQueue>),
}

macro_rules! dispatch {
    ($self:ident, $queue:ident => $call:expr) => {
        match $self {
            Self::InMemory($queue) => $call,
            Self::Relational($queue) => $call,
            Self::Cache($queue) => $call,
        }
    };
}

impl Queue {
    /// Tier name, as used in logs and metrics.
    #[must_use]
    pub const fn tier(&self) -> &'static str {
        match self {
            Self::InMemory(_) => "memory",
            Self::Relational(_) => "relational",
            Self::Cache(_) => "cache",
        }
    }
}

impl From<InMemoryQueue> for Queue {
    fn from(queue: InMemoryQueue) -> Self {
        Self::InMemory(queue)
    }
}

impl From<RelationalQueue> for Queue {
    fn from(queue: RelationalQueue) -> Self {
        Self::Relational(queue)
    }
}

impl From<Arc<CacheQueue>> for Queue {
    fn from(queue: Arc<CacheQueue>) -> Self {
        Self::Cache(queue)
    }
}

impl QueueStorage for Queue {
    fn storage_id(&self) -> &StorageId {
        dispatch!(self, q => q.storage_id())
    }

    fn property(&self) -> QueueProperty {
        dispatch!(self, q => q.property())
    }

    fn initialize(&self) -> Result<()> {
        dispatch!(self, q => q.initialize())
    }

    fn shutdown(&self) -> Result<()> {
        dispatch!(self, q => q.shutdown())
    }

    fn is_shutdown(&self) -> bool {
        dispatch!(self, q => q.is_shutdown())
    }

    fn destroy(&self) -> Result<()> {
        dispatch!(self, q => q.destroy())
    }

    fn put(&self, entries: &[QueueEntry], ignore_put_interceptor: bool) -> Result<()> {
        dispatch!(self, q => q.put(entries, ignore_put_interceptor))
    }

    fn peek(&self, num_entries: i64, num_bytes: i64) -> Result<Vec<QueueEntry>> {
        dispatch!(self, q => q.peek(num_entries, num_bytes))
    }

    fn peek_same_priority(&self, num_entries: i64, num_bytes: i64) -> Result<Vec<QueueEntry>> {
        dispatch!(self, q => q.peek_same_priority(num_entries, num_bytes))
    }

    fn peek_with_priority(
        &self,
        num_entries: i64,
        num_bytes: i64,
        min_prio: Priority,
        max_prio: Priority,
    ) -> Result<Vec<QueueEntry>> {
        dispatch!(self, q => q.peek_with_priority(num_entries, num_bytes, min_prio, max_prio))
    }

    fn peek_with_limit_entry(&self, limit: Option<&QueueEntry>) -> Result<Vec<QueueEntry>> {
        dispatch!(self, q => q.peek_with_limit_entry(limit))
    }

    fn peek_lowest(
        &self,
        num_entries: i64,
        num_bytes: i64,
        limit: Option<&QueueEntry>,
        leave_one: bool,
    ) -> Result<Vec<QueueEntry>> {
        dispatch!(self, q => q.peek_lowest(num_entries, num_bytes, limit, leave_one))
    }

    fn take_lowest(
        &self,
        num_entries: i64,
        num_bytes: i64,
        limit: Option<&QueueEntry>,
        leave_one: bool,
    ) -> Result<Vec<QueueEntry>> {
        dispatch!(self, q => q.take_lowest(num_entries, num_bytes, limit, leave_one))
    }

    fn take_with_priority(
        &self,
        num_entries: i64,
        num_bytes: i64,
        min_prio: Priority,
        max_prio: Priority,
    ) -> Result<Vec<QueueEntry>> {
        dispatch!(self, q => q.take_with_priority(num_entries, num_bytes, min_prio, max_prio))
    }

    fn remove_num(&self, num_entries: u64) -> Result<u64> {
        dispatch!(self, q => q.remove_num(num_entries))
    }

    fn remove_random(&self, entries: &[QueueEntry]) -> Result<u64> {
        dispatch!(self, q => q.remove_random(entries))
    }

    fn remove_with_priority(
        &self,
        num_entries: i64,
        num_bytes: i64,
        min_prio: Priority,
        max_prio: Priority,
    ) -> Result<u64> {
        dispatch!(self, q => q.remove_with_priority(num_entries, num_bytes, min_prio, max_prio))
    }

    fn remove_with_limit_entry(&self, limit: &QueueEntry, inclusive: bool) -> Result<u64> {
        dispatch!(self, q => q.remove_with_limit_entry(limit, inclusive))
    }

    fn remove_transient(&self) -> Result<u64> {
        dispatch!(self, q => q.remove_transient())
    }

    fn clear(&self) -> Result<u64> {
        dispatch!(self, q => q.clear())
    }

    fn entry_references(&self) -> Result<Vec<u64>> {
        dispatch!(self, q => q.entry_references())
    }

    fn get_entries(&self, filter: &dyn Fn(&QueueEntry) -> bool) -> Result<Vec<QueueEntry>> {
        dispatch!(self, q => q.get_entries(filter))
    }

    fn counters(&self) -> QueueCounters {
        dispatch!(self, q => q.counters())
    }

    fn set_put_listener(
        &self,
        listener: Option<Arc<dyn PutListener>>,
    ) -> Option<Arc<dyn PutListener>> {
        dispatch!(self, q => q.set_put_listener(listener))
    }

    fn add_storage_size_listener(&self, listener: Arc<dyn StorageSizeListener>) {
        dispatch!(self, q => q.add_storage_size_listener(listener));
    }

    fn remove_storage_size_listener(&self, listener: &Arc<dyn StorageSizeListener>) -> bool {
        dispatch!(self, q => q.remove_storage_size_listener(listener))
    }
}
