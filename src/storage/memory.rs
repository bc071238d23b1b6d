//! In-memory queue tier.
//!
//! Entries live in a `BTreeMap` keyed by [`EntryKey`], whose ordering is the
//! queue's total order, plus a `unique_id` lookup map for per-entry removal.
//! Index, lookup map, counters and lifecycle state sit behind one `RwLock`, so
//! every operation is atomic and counters are always exact.
//!
//! Nothing survives the process. The cache tier uses an instance of this queue
//! as its hot half.

use crate::Result;
use crate::models::{EntryKey, Priority, QueueEntry, QueueProperty, StorageId};
use crate::storage::QueueCounters;
use crate::storage::counters::check_capacity;
use crate::storage::lifecycle::QueueState;
use crate::storage::listener::{Listeners, PutListener, StorageSizeListener};
use crate::storage::lock::{acquire_read, acquire_write};
use crate::storage::traits::QueueStorage;
use crate::storage::window::{PriorityBand, select_head, select_lowest};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

const TIER: &str = "memory";

#[derive(Debug, Default)]
struct MemoryState {
    state: QueueState,
    entries: BTreeMap<EntryKey, QueueEntry>,
    ids: HashMap<u64, EntryKey>,
    counters: QueueCounters,
}

impl MemoryState {
    /// Inserts unless the unique id is already present.
    fn insert(&mut self, entry: &QueueEntry) -> bool {
        if self.ids.contains_key(&entry.unique_id) {
            return false;
        }
        let key = entry.key();
        self.ids.insert(entry.unique_id, key);
        self.counters.add(entry);
        self.entries.insert(key, entry.clone());
        true
    }

    fn remove_key(&mut self, key: &EntryKey) -> Option<QueueEntry> {
        let entry = self.entries.remove(key)?;
        self.ids.remove(&entry.unique_id);
        self.counters.subtract(&entry);
        Some(entry)
    }

    fn remove_id(&mut self, unique_id: u64) -> Option<QueueEntry> {
        let key = self.ids.get(&unique_id).copied()?;
        self.remove_key(&key)
    }

    fn remove_keys(&mut self, keys: &[EntryKey]) -> Vec<QueueEntry> {
        keys.iter().filter_map(|key| self.remove_key(key)).collect()
    }

    fn head_keys(&self, num_entries: i64, num_bytes: i64, band: PriorityBand) -> Vec<EntryKey> {
        select_head(self.entries.values(), num_entries, num_bytes, band)
            .into_iter()
            .map(QueueEntry::key)
            .collect()
    }

    fn lowest_keys(
        &self,
        num_entries: i64,
        num_bytes: i64,
        limit: Option<&QueueEntry>,
        leave_one: bool,
    ) -> Vec<EntryKey> {
        select_lowest(
            self.entries.values().rev(),
            num_entries,
            num_bytes,
            limit.map(QueueEntry::key),
            leave_one,
            self.entries.len(),
        )
        .into_iter()
        .map(QueueEntry::key)
        .collect()
    }

    fn clear(&mut self) -> u64 {
        let removed = self.entries.len() as u64;
        self.entries.clear();
        self.ids.clear();
        self.counters = QueueCounters::default();
        removed
    }
}

/// Transient queue held entirely in memory.
///
/// # Example
///
/// ```rust,ignore
/// use tierqueue::{InMemoryQueue, QueueProperty, QueueStorage, StorageId};
///
/// let queue = InMemoryQueue::new(StorageId::parse("callback:joe")?, QueueProperty::default())?;
/// queue.initialize()?;
/// assert_eq!(queue.num_of_entries(), 0);
/// ```
#[derive(Debug)]
pub struct InMemoryQueue {
    storage_id: StorageId,
    property: QueueProperty,
    inner: RwLock<MemoryState>,
    listeners: Listeners,
}

impl InMemoryQueue {
    /// Creates an uninitialized queue.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`](crate::Error::ConfigurationError)
    /// if the property is inconsistent.
    pub fn new(storage_id: StorageId, property: QueueProperty) -> Result<Self> {
        property.validate()?;
        Ok(Self {
            storage_id,
            property,
            inner: RwLock::new(MemoryState::default()),
            listeners: Listeners::default(),
        })
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> QueueState {
        acquire_read(&self.inner).state
    }

    fn read<T>(&self, f: impl FnOnce(&MemoryState) -> T) -> Result<T> {
        let guard = acquire_read(&self.inner);
        guard.state.ensure_active(&self.storage_id)?;
        Ok(f(&guard))
    }

    /// Runs `f` under the write lock, then notifies size listeners.
    fn mutate<T>(&self, f: impl FnOnce(&mut MemoryState) -> Result<T>) -> Result<T> {
        let (result, counters) = {
            let mut guard = acquire_write(&self.inner);
            guard.state.ensure_active(&self.storage_id)?;
            let result = f(&mut guard)?;
            (result, guard.counters)
        };
        self.listeners.notify_size(&self.storage_id, &counters, false);
        Ok(result)
    }

    /// Inserts without capacity check, interceptor or lifecycle check.
    ///
    /// The cache tier sizes its hot half itself and moves entries in and out
    /// during its own lifecycle transitions.
    pub(crate) fn insert_unchecked(&self, entries: &[QueueEntry]) -> u64 {
        let mut guard = acquire_write(&self.inner);
        entries.iter().filter(|entry| guard.insert(entry)).count() as u64
    }

    /// Removes and returns the entries with the given ids, in total order.
    pub(crate) fn take_by_ids(&self, ids: &[u64]) -> Vec<QueueEntry> {
        let mut guard = acquire_write(&self.inner);
        let mut taken: Vec<QueueEntry> = ids.iter().filter_map(|id| guard.remove_id(*id)).collect();
        taken.sort_by_key(QueueEntry::key);
        taken
    }

    /// Returns the entries with the given ids, in total order.
    pub(crate) fn peek_by_ids(&self, ids: &[u64]) -> Vec<QueueEntry> {
        let guard = acquire_read(&self.inner);
        let mut found: Vec<QueueEntry> = ids
            .iter()
            .filter_map(|id| guard.ids.get(id))
            .filter_map(|key| guard.entries.get(key))
            .cloned()
            .collect();
        found.sort_by_key(QueueEntry::key);
        found
    }
}

impl QueueStorage for InMemoryQueue {
    fn storage_id(&self) -> &StorageId {
        &self.storage_id
    }

    fn property(&self) -> QueueProperty {
        self.property
    }

    fn initialize(&self) -> Result<()> {
        let mut guard = acquire_write(&self.inner);
        guard.state.ensure_not_destroyed(&self.storage_id)?;
        if guard.state != QueueState::Active {
            info!(storage_id = %self.storage_id, from = %guard.state, "Initialized in-memory queue");
            guard.state = QueueState::Active;
        }
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
        info!(storage_id = %self.storage_id, entries = counters.num_of_entries, "Shut down in-memory queue");
        self.listeners.notify_size(&self.storage_id, &counters, true);
        Ok(())
    }

    fn is_shutdown(&self) -> bool {
        acquire_read(&self.inner).state.is_shutdown()
    }

    fn destroy(&self) -> Result<()> {
        let removed = {
            let mut guard = acquire_write(&self.inner);
            guard.state = QueueState::Destroyed;
            guard.clear()
        };
        info!(storage_id = %self.storage_id, removed, "Destroyed in-memory queue");
        self.listeners.notify_size(&self.storage_id, &QueueCounters::default(), true);
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
        let stored = self.mutate(|state| {
            check_capacity(&self.storage_id, &self.property, &state.counters, TIER)?;
            Ok(entries.iter().filter(|entry| state.insert(entry)).count())
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
        self.read(|state| {
            select_head(state.entries.values(), num_entries, num_bytes, PriorityBand::All)
                .into_iter()
                .cloned()
                .collect()
        })
    }

    fn peek_same_priority(&self, num_entries: i64, num_bytes: i64) -> Result<Vec<QueueEntry>> {
        self.read(|state| {
            select_head(
                state.entries.values(),
                num_entries,
                num_bytes,
                PriorityBand::SameAsFirst,
            )
            .into_iter()
            .cloned()
            .collect()
        })
    }

    fn peek_with_priority(
        &self,
        num_entries: i64,
        num_bytes: i64,
        min_prio: Priority,
        max_prio: Priority,
    ) -> Result<Vec<QueueEntry>> {
        let band = PriorityBand::range(min_prio, max_prio);
        self.read(|state| {
            select_head(state.entries.values(), num_entries, num_bytes, band)
                .into_iter()
                .cloned()
                .collect()
        })
    }

    fn peek_with_limit_entry(&self, limit: Option<&QueueEntry>) -> Result<Vec<QueueEntry>> {
        self.read(|state| {
            let Some(key) = limit.and_then(|limit| state.ids.get(&limit.unique_id)) else {
                return Vec::new();
            };
            state
                .entries
                .range(..*key)
                .map(|(_, entry)| entry.clone())
                .collect()
        })
    }

    fn peek_lowest(
        &self,
        num_entries: i64,
        num_bytes: i64,
        limit: Option<&QueueEntry>,
        leave_one: bool,
    ) -> Result<Vec<QueueEntry>> {
        self.read(|state| {
            state
                .lowest_keys(num_entries, num_bytes, limit, leave_one)
                .iter()
                .filter_map(|key| state.entries.get(key))
                .cloned()
                .collect()
        })
    }

    fn take_lowest(
        &self,
        num_entries: i64,
        num_bytes: i64,
        limit: Option<&QueueEntry>,
        leave_one: bool,
    ) -> Result<Vec<QueueEntry>> {
        let taken = self.mutate(|state| {
            let keys = state.lowest_keys(num_entries, num_bytes, limit, leave_one);
            Ok(state.remove_keys(&keys))
        })?;
        debug!(storage_id = %self.storage_id, taken = taken.len(), "Took lowest entries");
        Ok(taken)
    }

    fn take_with_priority(
        &self,
        num_entries: i64,
        num_bytes: i64,
        min_prio: Priority,
        max_prio: Priority,
    ) -> Result<Vec<QueueEntry>> {
        let band = PriorityBand::range(min_prio, max_prio);
        self.mutate(|state| {
            let keys = state.head_keys(num_entries, num_bytes, band);
            Ok(state.remove_keys(&keys))
        })
    }

    fn remove_num(&self, num_entries: u64) -> Result<u64> {
        let take = usize::try_from(num_entries).unwrap_or(usize::MAX);
        self.mutate(|state| {
            let keys: Vec<EntryKey> = state.entries.keys().take(take).copied().collect();
            Ok(state.remove_keys(&keys).len() as u64)
        })
    }

    fn remove_random(&self, entries: &[QueueEntry]) -> Result<u64> {
        if entries.is_empty() {
            return self.read(|_| 0);
        }
        self.mutate(|state| {
            Ok(entries
                .iter()
                .filter_map(|entry| state.remove_id(entry.unique_id))
                .count() as u64)
        })
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
            let key = state
                .ids
                .get(&limit.unique_id)
                .copied()
                .unwrap_or_else(|| limit.key());
            let keys: Vec<EntryKey> = if inclusive {
                state.entries.range(..=key).map(|(k, _)| *k).collect()
            } else {
                state.entries.range(..key).map(|(k, _)| *k).collect()
            };
            Ok(state.remove_keys(&keys).len() as u64)
        })
    }

    fn remove_transient(&self) -> Result<u64> {
        self.mutate(|state| {
            let keys: Vec<EntryKey> = state
                .entries
                .values()
                .filter(|entry| !entry.persistent)
                .map(QueueEntry::key)
                .collect();
            Ok(state.remove_keys(&keys).len() as u64)
        })
    }

    fn clear(&self) -> Result<u64> {
        let removed = self.mutate(|state| Ok(state.clear()))?;
        debug!(storage_id = %self.storage_id, removed, "Cleared in-memory queue");
        Ok(removed)
    }

    fn entry_references(&self) -> Result<Vec<u64>> {
        self.read(|state| state.entries.keys().map(|key| key.unique_id).collect())
    }

    fn get_entries(&self, filter: &dyn Fn(&QueueEntry) -> bool) -> Result<Vec<QueueEntry>> {
        self.read(|state| {
            state
                .entries
                .values()
                .filter(|entry| filter(entry))
                .cloned()
                .collect()
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
    use std::sync::atomic::{AtomicU64, Ordering};

    fn entry(prio: u8, id: u64) -> QueueEntry {
        QueueEntry::new(Priority::new(prio).unwrap(), false, "test", vec![0u8; 10])
            .with_unique_id(id)
    }

    fn queue(max_entries: u64) -> InMemoryQueue {
        let queue = InMemoryQueue::new(
            StorageId::parse("callback:memory-test").unwrap(),
            QueueProperty::new(max_entries, 100_000),
        )
        .unwrap();
        queue.initialize().unwrap();
        queue
    }

    fn ids(entries: &[QueueEntry]) -> Vec<u64> {
        entries.iter().map(|e| e.unique_id).collect()
    }

    #[test]
    fn test_total_order() {
        let queue = queue(100);
        queue
            .put(&[entry(5, 3), entry(9, 4), entry(5, 1), entry(7, 2)], false)
            .unwrap();
        assert_eq!(ids(&queue.peek(-1, -1).unwrap()), vec![4, 2, 1, 3]);
        assert_eq!(queue.entry_references().unwrap(), vec![4, 2, 1, 3]);
        assert_eq!(queue.peek_first().unwrap().map(|e| e.unique_id), Some(4));
    }

    #[test]
    fn test_overflow_allowance() {
        let queue = queue(3);
        for id in 1..=4 {
            queue.put(&[entry(5, id)], false).unwrap();
        }
        let err = queue.put(&[entry(5, 5)], false).unwrap_err();
        assert!(matches!(err, Error::CapacityExceeded { .. }));
        assert_eq!(queue.num_of_entries(), 4);
    }

    #[test]
    fn test_idempotent_put() {
        let queue = queue(100);
        let e = entry(5, 1);
        queue.put(&[e.clone(), e.clone()], false).unwrap();
        queue.put(&[e], false).unwrap();
        assert_eq!(queue.num_of_entries(), 1);
        assert_eq!(queue.num_of_bytes(), 10);
    }

    #[test]
    fn test_remove_random_partial() {
        let queue = queue(100);
        queue
            .put(&[entry(5, 1), entry(5, 2), entry(5, 3)], false)
            .unwrap();
        let request = [entry(5, 2), entry(5, 3), entry(5, 7), entry(5, 8), entry(5, 9)];
        assert_eq!(queue.remove_random(&request).unwrap(), 2);
        assert_eq!(queue.remove_random(&[]).unwrap(), 0);
        assert_eq!(ids(&queue.peek(-1, -1).unwrap()), vec![1]);
    }

    #[test]
    fn test_priority_grouping() {
        let queue = queue(100);
        let mut id = 0;
        for prio in [5, 7, 9] {
            for _ in 0..4 {
                id += 1;
                queue.put(&[entry(prio, id)], false).unwrap();
            }
        }
        let first = queue.peek_same_priority(-1, -1).unwrap();
        assert_eq!(ids(&first), vec![9, 10, 11, 12]);

        let middle = queue
            .peek_with_priority(-1, -1, Priority::HIGH, Priority::HIGH)
            .unwrap();
        assert_eq!(ids(&middle), vec![5, 6, 7, 8]);

        assert_eq!(
            queue
                .remove_with_priority(2, -1, Priority::MIN, Priority::NORM)
                .unwrap(),
            2
        );
        assert_eq!(queue.num_of_entries(), 10);
    }

    #[test]
    fn test_peek_with_limit_entry() {
        let queue = queue(100);
        queue
            .put(&[entry(9, 1), entry(5, 2), entry(5, 3)], false)
            .unwrap();
        let prefix = queue.peek_with_limit_entry(Some(&entry(5, 3))).unwrap();
        assert_eq!(ids(&prefix), vec![1, 2]);
        assert!(queue.peek_with_limit_entry(Some(&entry(5, 99))).unwrap().is_empty());
        assert!(queue.peek_with_limit_entry(None).unwrap().is_empty());
    }

    #[test]
    fn test_take_lowest() {
        let queue = queue(100);
        queue
            .put(&[entry(9, 1), entry(7, 2), entry(5, 3), entry(5, 4)], false)
            .unwrap();
        let taken = queue.take_lowest(2, -1, None, false).unwrap();
        assert_eq!(ids(&taken), vec![4, 3]);
        assert_eq!(queue.num_of_entries(), 2);

        let all = queue.take_lowest(-1, -1, None, true).unwrap();
        assert_eq!(ids(&all), vec![2]);
        assert_eq!(ids(&queue.peek(-1, -1).unwrap()), vec![1]);
    }

    #[test]
    fn test_remove_with_limit_entry() {
        let queue = queue(100);
        queue
            .put(&[entry(9, 1), entry(7, 2), entry(5, 3)], false)
            .unwrap();
        assert_eq!(queue.remove_with_limit_entry(&entry(7, 2), false).unwrap(), 1);
        assert_eq!(queue.remove_with_limit_entry(&entry(7, 2), true).unwrap(), 1);
        assert_eq!(ids(&queue.peek(-1, -1).unwrap()), vec![3]);
    }

    #[test]
    fn test_remove_transient_and_counters() {
        let queue = queue(100);
        let durable = QueueEntry::new(Priority::NORM, true, "t", vec![0u8; 7]).with_unique_id(1);
        queue.put(&[durable, entry(5, 2)], false).unwrap();
        assert_eq!(queue.num_of_persistent_entries(), 1);
        assert_eq!(queue.num_of_persistent_bytes(), 7);
        assert_eq!(queue.remove_transient().unwrap(), 1);
        assert_eq!(queue.num_of_entries(), 1);
        assert_eq!(queue.num_of_bytes(), 7);
    }

    #[test]
    fn test_lifecycle() {
        let queue = queue(100);
        queue.put(&[entry(5, 1)], false).unwrap();
        queue.shutdown().unwrap();
        assert!(queue.is_shutdown());
        assert!(matches!(queue.peek(-1, -1), Err(Error::Shutdown { .. })));
        assert!(matches!(queue.put(&[entry(5, 2)], false), Err(Error::Shutdown { .. })));

        queue.initialize().unwrap();
        assert_eq!(queue.num_of_entries(), 1);

        queue.destroy().unwrap();
        assert!(queue.is_shutdown());
        assert_eq!(queue.num_of_entries(), 0);
        assert!(queue.initialize().is_err());
    }

    #[test]
    fn test_uninitialized_rejects_operations() {
        let queue = InMemoryQueue::new(
            StorageId::parse("callback:fresh").unwrap(),
            QueueProperty::default(),
        )
        .unwrap();
        assert!(!queue.is_shutdown());
        assert!(matches!(queue.remove(), Err(Error::Shutdown { .. })));
    }

    #[test]
    fn test_invalid_property_rejected() {
        let property = QueueProperty::new(10, 1000).with_cache(20, 100);
        let result = InMemoryQueue::new(StorageId::parse("callback:bad").unwrap(), property);
        assert!(matches!(result, Err(Error::ConfigurationError(_))));
    }

    struct Veto;

    impl PutListener for Veto {
        fn put_pre(&self, _entries: &[QueueEntry]) -> bool {
            false
        }

        fn put_post(&self, _entries: &[QueueEntry]) {}
    }

    #[test]
    fn test_put_interceptor_veto() {
        let queue = queue(100);
        queue.set_put_listener(Some(Arc::new(Veto)));
        queue.put(&[entry(5, 1)], false).unwrap();
        assert_eq!(queue.num_of_entries(), 0);
        queue.put(&[entry(5, 1)], true).unwrap();
        assert_eq!(queue.num_of_entries(), 1);
    }

    #[derive(Default)]
    struct Sizes(AtomicU64);

    impl StorageSizeListener for Sizes {
        fn changed(&self, _id: &StorageId, counters: &QueueCounters, _is_shutdown: bool) {
            self.0.store(counters.num_of_entries, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_size_listener_notified() {
        let queue = queue(100);
        let sizes = Arc::new(Sizes::default());
        queue.add_storage_size_listener(sizes.clone());
        queue.put(&[entry(5, 1), entry(5, 2)], false).unwrap();
        assert_eq!(sizes.0.load(Ordering::SeqCst), 2);
        queue.remove().unwrap();
        assert_eq!(sizes.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_byte_window() {
        let queue = queue(100);
        queue
            .put(&[entry(5, 1), entry(5, 2), entry(5, 3)], false)
            .unwrap();
        // 10 bytes each: a 25 byte window holds two
        assert_eq!(queue.peek(-1, 25).unwrap().len(), 2);
        assert_eq!(queue.peek(-1, 5).unwrap().len(), 1);
    }
}
