//! Relational (`SQLite`) queue tier.
//!
//! Each queue owns the rows of the shared [`QueueTable`] whose `queue_name`
//! is the display form of its [`StorageId`]. Counters are loaded from the
//! table on `initialize` and afterwards maintained from the slots each
//! statement reports as inserted or deleted, so they stay O(1) to read.
//!
//! The table is only touched while this queue holds its own lock: writers
//! exclusively, readers shared. During a database outage every data operation
//! fails fast with [`Error::ResourceUnavailable`](crate::Error::ResourceUnavailable)
//! and leaves counters untouched.

use crate::Result;
use crate::models::{Priority, QueueEntry, QueueProperty, StorageId};
use crate::storage::QueueCounters;
use crate::storage::counters::check_capacity;
use crate::storage::lifecycle::QueueState;
use crate::storage::listener::{Listeners, PutListener, StorageSizeListener};
use crate::storage::lock::{acquire_read, acquire_write};
use crate::storage::sqlite::QueueTable;
use crate::storage::traits::QueueStorage;
use crate::storage::window::{EntrySlot, PriorityBand};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

const TIER: &str = "relational";

#[derive(Debug, Default)]
struct RelationalState {
    state: QueueState,
    counters: QueueCounters,
}

impl RelationalState {
    fn subtract_slots(&mut self, slots: &[EntrySlot]) {
        for slot in slots {
            self.counters.subtract_slot(slot.size, slot.persistent);
        }
    }

    fn subtract_entries(&mut self, entries: &[QueueEntry]) {
        for entry in entries {
            self.counters.subtract(entry);
        }
    }
}

/// Durable queue stored in `SQLite`.
#[derive(Debug)]
pub struct RelationalQueue {
    storage_id: StorageId,
    queue_name: String,
    property: QueueProperty,
    table: Arc<QueueTable>,
    inner: RwLock<RelationalState>,
    listeners: Listeners,
}

impl RelationalQueue {
    /// Creates an uninitialized queue over `table`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`](crate::Error::ConfigurationError)
    /// if the property is inconsistent.
    pub fn new(storage_id: StorageId, property: QueueProperty, table: Arc<QueueTable>) -> Result<Self> {
        property.validate()?;
        Ok(Self {
            queue_name: storage_id.to_string(),
            storage_id,
            property,
            table,
            inner: RwLock::new(RelationalState::default()),
            listeners: Listeners::default(),
        })
    }

    /// Partition key of this queue in the table.
    #[must_use]
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> QueueState {
        acquire_read(&self.inner).state
    }

    /// Updates the payload, size and persistent flag of a stored entry.
    ///
    /// Returns `false` if the entry is not stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails or the queue is not active.
    pub fn modify_entry(&self, entry: &QueueEntry) -> Result<bool> {
        self.mutate(|state| {
            let Some(previous) = self.table.modify_entry(&self.queue_name, entry)? else {
                return Ok(false);
            };
            state
                .counters
                .subtract_slot(previous.size, previous.persistent);
            state.counters.add(entry);
            Ok(true)
        })
    }

    fn read<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let guard = acquire_read(&self.inner);
        guard.state.ensure_active(&self.storage_id)?;
        let result = f();
        drop(guard);
        result
    }

    /// Runs `f` under the write lock, then notifies size listeners.
    fn mutate<T>(&self, f: impl FnOnce(&mut RelationalState) -> Result<T>) -> Result<T> {
        let (result, counters) = {
            let mut guard = acquire_write(&self.inner);
            guard.state.ensure_active(&self.storage_id)?;
            let result = f(&mut guard)?;
            (result, guard.counters)
        };
        self.listeners.notify_size(&self.storage_id, &counters, false);
        Ok(result)
    }

    /// Slots of every stored entry, in total order.
    pub(crate) fn slots(&self) -> Result<Vec<EntrySlot>> {
        self.read(|| self.table.get_entry_slots(&self.queue_name))
    }

    /// Entries with the given ids, in total order.
    pub(crate) fn peek_by_ids(&self, ids: &[u64]) -> Result<Vec<QueueEntry>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.read(|| self.table.get_entries_by_ids(&self.queue_name, ids))
    }

    /// Removes and returns the entries with the given ids, in total order.
    pub(crate) fn take_by_ids(&self, ids: &[u64]) -> Result<Vec<QueueEntry>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.mutate(|state| {
            let taken = self.table.take_entries(&self.queue_name, ids)?;
            state.subtract_entries(&taken);
            Ok(taken)
        })
    }

    /// Stores entries without the capacity check or put listeners; returns
    /// the count newly stored.
    pub(crate) fn insert_unchecked(&self, entries: &[QueueEntry]) -> Result<u64> {
        if entries.is_empty() {
            return Ok(0);
        }
        self.mutate(|state| {
            let added = self.table.add_entries(&self.queue_name, entries)?;
            let mut stored = 0;
            for (entry, _) in entries.iter().zip(added).filter(|(_, added)| *added) {
                state.counters.add(entry);
                stored += 1;
            }
            Ok(stored)
        })
    }

    /// Removes the entries with the given ids; returns the slots removed.
    pub(crate) fn remove_slots(&self, ids: &[u64]) -> Result<Vec<EntrySlot>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.mutate(|state| {
            let removed = self.table.delete_entries(&self.queue_name, ids)?;
            state.subtract_slots(&removed);
            Ok(removed)
        })
    }

    /// Removes the entries with the given ids; returns the count removed.
    pub(crate) fn remove_by_ids(&self, ids: &[u64]) -> Result<u64> {
        self.remove_slots(ids).map(|removed| removed.len() as u64)
    }
}

impl QueueStorage for RelationalQueue {
    fn storage_id(&self) -> &StorageId {
        &self.storage_id
    }

    fn property(&self) -> QueueProperty {
        self.property
    }

    fn initialize(&self) -> Result<()> {
        let mut guard = acquire_write(&self.inner);
        guard.state.ensure_not_destroyed(&self.storage_id)?;
        self.table.ensure_schema()?;
        let counters = self.table.counters(&self.queue_name)?;
        info!(
            storage_id = %self.storage_id,
            queue_name = %self.queue_name,
            from = %guard.state,
            entries = counters.num_of_entries,
            "Initialized relational queue"
        );
        guard.counters = counters;
        guard.state = QueueState::Active;
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        let counters = {
            let mut guard = acquire_write(&self.inner);
            if guard.state == QueueState::Destroyed {
                return Ok(());
            }
            guard.state = QueueState::Shutdown;
            guard.counters
        };
        info!(storage_id = %self.storage_id, entries = counters.num_of_entries, "Shut down relational queue");
        self.listeners.notify_size(&self.storage_id, &counters, true);
        Ok(())
    }

    fn is_shutdown(&self) -> bool {
        acquire_read(&self.inner).state.is_shutdown()
    }

    fn destroy(&self) -> Result<()> {
        {
            let mut guard = acquire_write(&self.inner);
            if guard.state == QueueState::Destroyed {
                return Ok(());
            }
            let removed = self.table.delete_all(&self.queue_name)?;
            guard.state = QueueState::Destroyed;
            guard.counters = QueueCounters::default();
            info!(storage_id = %self.storage_id, removed, "Destroyed relational queue");
        }
        self.listeners
            .notify_size(&self.storage_id, &QueueCounters::default(), true);
        Ok(())
    }

    fn put(&self, entries: &[QueueEntry], ignore_put_interceptor: bool) -> Result<()> {
        acquire_read(&self.inner)
            .state
            .ensure_active(&self.storage_id)?;
        if !self.listeners.put_pre(entries, ignore_put_interceptor) {
            debug!(storage_id = %self.storage_id, "Put taken over by interceptor");
            return Ok(());
        }
        if entries.is_empty() {
            return Ok(());
        }
        let stored = self.mutate(|state| {
            check_capacity(&self.storage_id, &self.property, &state.counters, TIER)?;
            let added = self.table.add_entries(&self.queue_name, entries)?;
            let mut stored = 0_usize;
            for (entry, _) in entries.iter().zip(added).filter(|(_, added)| *added) {
                state.counters.add(entry);
                stored += 1;
            }
            Ok(stored)
        })?;
        debug!(
            storage_id = %self.storage_id,
            requested = entries.len(),
            stored,
            "Put entries"
        );
        self.listeners.put_post(entries, ignore_put_interceptor);
        Ok(())
    }

    fn peek(&self, num_entries: i64, num_bytes: i64) -> Result<Vec<QueueEntry>> {
        self.read(|| self.table.get_entries(&self.queue_name, num_entries, num_bytes))
    }

    fn peek_same_priority(&self, num_entries: i64, num_bytes: i64) -> Result<Vec<QueueEntry>> {
        self.read(|| {
            self.table.get_entries_in_band(
                &self.queue_name,
                num_entries,
                num_bytes,
                PriorityBand::SameAsFirst,
            )
        })
    }

    fn peek_with_priority(
        &self,
        num_entries: i64,
        num_bytes: i64,
        min_prio: Priority,
        max_prio: Priority,
    ) -> Result<Vec<QueueEntry>> {
        self.read(|| {
            self.table.get_entries_by_priority(
                &self.queue_name,
                num_entries,
                num_bytes,
                min_prio,
                max_prio,
            )
        })
    }

    fn peek_with_limit_entry(&self, limit: Option<&QueueEntry>) -> Result<Vec<QueueEntry>> {
        self.read(|| match limit {
            Some(limit) => self
                .table
                .get_entries_with_limit(&self.queue_name, limit.unique_id),
            None => Ok(Vec::new()),
        })
    }

    fn peek_lowest(
        &self,
        num_entries: i64,
        num_bytes: i64,
        limit: Option<&QueueEntry>,
        leave_one: bool,
    ) -> Result<Vec<QueueEntry>> {
        self.read(|| {
            self.table.get_lowest(
                &self.queue_name,
                num_entries,
                num_bytes,
                limit.map(QueueEntry::key),
                leave_one,
            )
        })
    }

    fn take_lowest(
        &self,
        num_entries: i64,
        num_bytes: i64,
        limit: Option<&QueueEntry>,
        leave_one: bool,
    ) -> Result<Vec<QueueEntry>> {
        self.mutate(|state| {
            let taken = self.table.get_and_delete_lowest(
                &self.queue_name,
                num_entries,
                num_bytes,
                limit.map(QueueEntry::key),
                leave_one,
            )?;
            state.subtract_entries(&taken);
            Ok(taken)
        })
    }

    fn take_with_priority(
        &self,
        num_entries: i64,
        num_bytes: i64,
        min_prio: Priority,
        max_prio: Priority,
    ) -> Result<Vec<QueueEntry>> {
        self.mutate(|state| {
            let taken = self.table.take_entries_in_band(
                &self.queue_name,
                num_entries,
                num_bytes,
                PriorityBand::range(min_prio, max_prio),
            )?;
            state.subtract_entries(&taken);
            Ok(taken)
        })
    }

    fn remove_num(&self, num_entries: u64) -> Result<u64> {
        self.mutate(|state| {
            let removed = self
                .table
                .delete_first_entries(&self.queue_name, num_entries)?;
            state.subtract_slots(&removed);
            Ok(removed.len() as u64)
        })
    }

    fn remove_random(&self, entries: &[QueueEntry]) -> Result<u64> {
        let ids: Vec<u64> = entries.iter().map(|entry| entry.unique_id).collect();
        if ids.is_empty() {
            return self.read(|| Ok(0));
        }
        self.remove_by_ids(&ids)
    }

    fn remove_with_priority(
        &self,
        num_entries: i64,
        num_bytes: i64,
        min_prio: Priority,
        max_prio: Priority,
    ) -> Result<u64> {
        self.take_with_priority(num_entries, num_bytes, min_prio, max_prio)
            .map(|taken| taken.len() as u64)
    }

    fn remove_with_limit_entry(&self, limit: &QueueEntry, inclusive: bool) -> Result<u64> {
        self.mutate(|state| {
            let removed = self
                .table
                .delete_up_to(&self.queue_name, limit.key(), inclusive)?;
            state.subtract_slots(&removed);
            Ok(removed.len() as u64)
        })
    }

    fn remove_transient(&self) -> Result<u64> {
        self.mutate(|state| {
            let removed = self.table.delete_all_transient(&self.queue_name)?;
            state.subtract_slots(&removed);
            if !removed.is_empty() {
                debug!(storage_id = %self.storage_id, removed = removed.len(), "Removed transient entries");
            }
            Ok(removed.len() as u64)
        })
    }

    fn clear(&self) -> Result<u64> {
        self.mutate(|state| {
            let removed = self.table.delete_all(&self.queue_name)?;
            if removed != state.counters.num_of_entries {
                warn!(
                    storage_id = %self.storage_id,
                    removed,
                    counted = state.counters.num_of_entries,
                    "Relational counters drifted from table"
                );
            }
            state.counters = QueueCounters::default();
            Ok(removed)
        })
    }

    fn entry_references(&self) -> Result<Vec<u64>> {
        self.read(|| self.table.entry_references(&self.queue_name))
    }

    fn get_entries(&self, filter: &dyn Fn(&QueueEntry) -> bool) -> Result<Vec<QueueEntry>> {
        self.read(|| {
            let mut entries = self.table.get_all_entries(&self.queue_name)?;
            entries.retain(|entry| filter(entry));
            Ok(entries)
        })
    }

    fn counters(&self) -> QueueCounters {
        acquire_read(&self.inner).counters
    }

    fn set_put_listener(
        &self,
        listener: Option<Arc<dyn PutListener>>,
    ) -> Option<Arc<dyn PutListener>> {
        self.listeners.set_put_listener(listener)
    }

    fn add_storage_size_listener(&self, listener: Arc<dyn StorageSizeListener>) {
        self.listeners.add_size_listener(listener);
    }

    fn remove_storage_size_listener(&self, listener: &Arc<dyn StorageSizeListener>) -> bool {
        self.listeners.remove_size_listener(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::storage::sqlite::{ConnectionPool, PoolConfig, SqliteConnector};

    fn shared_table() -> Arc<QueueTable> {
        let pool = ConnectionPool::new(
            Arc::new(SqliteConnector::in_memory().unwrap()),
            PoolConfig::default(),
        );
        Arc::new(QueueTable::new(pool, QueueTable::DEFAULT_TABLE_NAME).unwrap())
    }

    fn queue_on(table: &Arc<QueueTable>, id: &str, max_entries: u64) -> RelationalQueue {
        let queue = RelationalQueue::new(
            StorageId::parse(id).unwrap(),
            QueueProperty::new(max_entries, 100_000),
            Arc::clone(table),
        )
        .unwrap();
        queue.initialize().unwrap();
        queue
    }

    fn entry(prio: u8, id: u64, persistent: bool) -> QueueEntry {
        QueueEntry::new(Priority::new(prio).unwrap(), persistent, "test", vec![0u8; 10])
            .with_unique_id(id)
    }

    fn ids(entries: &[QueueEntry]) -> Vec<u64> {
        entries.iter().map(|e| e.unique_id).collect()
    }

    #[test]
    fn test_put_peek_order() {
        let table = shared_table();
        let queue = queue_on(&table, "callback:rel-order", 100);
        queue
            .put(&[entry(5, 3, true), entry(9, 4, true), entry(5, 1, false)], false)
            .unwrap();
        assert_eq!(ids(&queue.peek(-1, -1).unwrap()), vec![4, 1, 3]);
        assert_eq!(queue.num_of_entries(), 3);
        assert_eq!(queue.num_of_persistent_entries(), 2);
        assert_eq!(queue.queue_name(), "callback:rel-order");
    }

    #[test]
    fn test_overflow_allowance() {
        let table = shared_table();
        let queue = queue_on(&table, "callback:rel-cap", 2);
        for id in 1..=3 {
            queue.put(&[entry(5, id, true)], false).unwrap();
        }
        assert!(matches!(
            queue.put(&[entry(5, 4, true)], false),
            Err(Error::CapacityExceeded { .. })
        ));
        assert_eq!(table.counters(queue.queue_name()).unwrap().num_of_entries, 3);
    }

    #[test]
    fn test_duplicate_put_not_counted() {
        let table = shared_table();
        let queue = queue_on(&table, "callback:rel-dup", 100);
        queue.put(&[entry(5, 1, true)], false).unwrap();
        queue.put(&[entry(5, 1, true)], false).unwrap();
        assert_eq!(queue.num_of_entries(), 1);
        assert_eq!(queue.num_of_bytes(), 10);
    }

    #[test]
    fn test_queues_are_partitioned() {
        let table = shared_table();
        let a = queue_on(&table, "callback:a", 100);
        let b = queue_on(&table, "callback:b", 100);
        a.put(&[entry(5, 1, true)], false).unwrap();
        b.put(&[entry(5, 1, true), entry(5, 2, true)], false).unwrap();
        assert_eq!(a.clear().unwrap(), 1);
        assert_eq!(b.num_of_entries(), 2);
    }

    #[test]
    fn test_similar_ids_do_not_share_rows() {
        let table = shared_table();
        let slashed = queue_on(&table, "callback:client/joe", 100);
        let plain = queue_on(&table, "callback:clientjoe", 100);
        slashed.put(&[entry(5, 1, true)], false).unwrap();
        plain.put(&[entry(5, 2, true)], false).unwrap();
        assert_ne!(slashed.queue_name(), plain.queue_name());
        assert_eq!(slashed.entry_references().unwrap(), vec![1]);
        assert_eq!(plain.entry_references().unwrap(), vec![2]);

        assert_eq!(plain.clear().unwrap(), 1);
        assert_eq!(slashed.num_of_entries(), 1);
        let reopened = queue_on(&table, "callback:client/joe", 100);
        assert_eq!(reopened.num_of_entries(), 1);
    }

    #[test]
    fn test_removals_update_counters() {
        let table = shared_table();
        let queue = queue_on(&table, "callback:rel-remove", 100);
        queue
            .put(
                &[
                    entry(9, 1, true),
                    entry(7, 2, false),
                    entry(5, 3, true),
                    entry(5, 4, false),
                    entry(3, 5, true),
                ],
                false,
            )
            .unwrap();
        assert_eq!(queue.remove().unwrap(), 1);
        assert_eq!(queue.remove_random(&[entry(3, 5, true), entry(3, 9, true)]).unwrap(), 1);
        assert_eq!(queue.remove_transient().unwrap(), 2);
        assert_eq!(queue.num_of_entries(), 1);
        assert_eq!(queue.num_of_persistent_entries(), 1);
        assert_eq!(queue.counters(), table.counters(queue.queue_name()).unwrap());
    }

    #[test]
    fn test_take_lowest_and_priority() {
        let table = shared_table();
        let queue = queue_on(&table, "callback:rel-take", 100);
        queue
            .put(&[entry(9, 1, true), entry(7, 2, true), entry(5, 3, true), entry(5, 4, true)], false)
            .unwrap();
        assert_eq!(ids(&queue.peek_lowest(1, -1, None, false).unwrap()), vec![4]);
        assert_eq!(ids(&queue.take_lowest(2, -1, None, false).unwrap()), vec![4, 3]);
        let taken = queue
            .take_with_priority(-1, -1, Priority::HIGH, Priority::MAX)
            .unwrap();
        assert_eq!(ids(&taken), vec![1, 2]);
        assert_eq!(queue.num_of_entries(), 0);
    }

    #[test]
    fn test_restart_reloads_counters() {
        let table = shared_table();
        {
            let queue = queue_on(&table, "history:restart", 100);
            queue.put(&[entry(5, 1, true), entry(7, 2, true)], false).unwrap();
            queue.shutdown().unwrap();
        }
        let queue = queue_on(&table, "history:restart", 100);
        assert_eq!(queue.num_of_entries(), 2);
        assert_eq!(queue.num_of_bytes(), 20);
        assert_eq!(ids(&queue.peek(-1, -1).unwrap()), vec![2, 1]);
    }

    #[test]
    fn test_modify_entry() {
        let table = shared_table();
        let queue = queue_on(&table, "callback:rel-modify", 100);
        queue.put(&[entry(5, 1, false)], false).unwrap();
        assert!(queue.modify_entry(&entry(5, 1, true)).unwrap());
        assert_eq!(queue.num_of_persistent_entries(), 1);
        assert!(!queue.modify_entry(&entry(5, 2, true)).unwrap());
    }

    #[test]
    fn test_shutdown_and_destroy() {
        let table = shared_table();
        let queue = queue_on(&table, "callback:rel-life", 100);
        queue.put(&[entry(5, 1, true)], false).unwrap();
        queue.shutdown().unwrap();
        assert!(matches!(queue.peek(-1, -1), Err(Error::Shutdown { .. })));
        queue.initialize().unwrap();
        queue.destroy().unwrap();
        assert!(queue.is_shutdown());
        assert_eq!(table.counters(queue.queue_name()).unwrap().num_of_entries, 0);
    }

    #[test]
    fn test_limit_entry_operations() {
        let table = shared_table();
        let queue = queue_on(&table, "callback:rel-limit", 100);
        queue
            .put(&[entry(9, 1, true), entry(7, 2, true), entry(5, 3, true)], false)
            .unwrap();
        assert_eq!(ids(&queue.peek_with_limit_entry(Some(&entry(5, 3, true))).unwrap()), vec![1, 2]);
        assert!(queue.peek_with_limit_entry(None).unwrap().is_empty());
        assert_eq!(queue.remove_with_limit_entry(&entry(7, 2, true), true).unwrap(), 2);
        assert_eq!(queue.entry_references().unwrap(), vec![3]);
    }
}
