//! Cache queue: an in-memory hot tier in front of a relational cold tier.
//!
//! The hot tier always holds a contiguous ordered prefix of the whole queue,
//! bounded by the cache numbers of the [`QueueProperty`]; the cold tier holds
//! the ordered remainder. Readers therefore concatenate hot and cold results
//! without merging.
//!
//! A residency index (ordered by [`EntryKey`], with a `unique_id` lookup)
//! records which tier serves each entry, its size and durability, and whether
//! the cold table holds a row for it. Every selection is computed on the
//! index with the same window rules as the other tiers; the chosen entries
//! are then fetched from the tier that serves them.
//!
//! # Swap protocol
//!
//! - `put` writes every persistent entry through to the cold table, including
//!   the ones it keeps hot, so a crash loses no persistent entry. Entries
//!   ordered before the first cold entry go to the hot tier and everything
//!   else to the cold tier. When the hot tier would overflow, its lowest
//!   entries are spilled; only those without a row are written. The cold
//!   write happens first; if it fails nothing changes.
//! - Removals delete the rows first, then drop hot copies, then promote the
//!   best cold entries while the hot tier has room. Promotion copies rows into
//!   the hot tier and leaves them in place. A failed promotion is logged and
//!   retried after the next removal or when the database comes back.
//!
//! # Outages
//!
//! With the database unreachable the hot tier keeps serving reads. A put
//! whose entries all fit into the hot tier still succeeds: its persistent
//! entries are held in memory only and written once the pool reports the
//! database available again, or at the latest on `shutdown`. A put that needs
//! the cold tier, and a removal of any entry that has a row, fails with
//! [`Error::ResourceUnavailable`](crate::Error::ResourceUnavailable).
//!
//! # Locking
//!
//! One `RwLock` guards the index and is held across the `SQLite` calls of an
//! operation, so a slow database stalls every caller of this queue for up to
//! the pool's acquire timeout. Other queues are not affected.

use crate::models::{EntryKey, Priority, QueueEntry, QueueProperty, StorageId};
use crate::storage::QueueCounters;
use crate::storage::counters::check_capacity;
use crate::storage::lifecycle::QueueState;
use crate::storage::listener::{Listeners, PutListener, StorageSizeListener};
use crate::storage::lock::{acquire_read, acquire_write};
use crate::storage::memory::InMemoryQueue;
use crate::storage::relational::RelationalQueue;
use crate::storage::sqlite::{AvailabilityListener, QueueTable};
use crate::storage::traits::QueueStorage;
use crate::storage::window::{EntrySlot, PriorityBand, select_head, select_lowest};
use crate::Result;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock, Weak};
use tracing::{debug, info, warn};

const TIER: &str = "cache";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Hot,
    Cold,
}

#[derive(Debug, Clone, Copy)]
struct Resident {
    tier: Tier,
    size: u64,
    persistent: bool,
    /// The cold table holds a row. Always true in the cold tier.
    stored: bool,
}

/// Unique ids of selected entries, grouped by where they live.
#[derive(Debug, Default)]
struct Selection {
    hot: Vec<u64>,
    cold: Vec<u64>,
    stored: Vec<u64>,
}

/// Residency index and totals over both tiers.
#[derive(Debug, Default)]
struct CacheState {
    state: QueueState,
    index: BTreeMap<EntryKey, Resident>,
    ids: HashMap<u64, EntryKey>,
    counters: QueueCounters,
}

impl CacheState {
    fn insert(&mut self, key: EntryKey, resident: Resident) {
        if self.ids.insert(key.unique_id, key).is_none() {
            self.counters.add_slot(resident.size, resident.persistent);
        }
        self.index.insert(key, resident);
    }

    fn insert_entry(&mut self, entry: &QueueEntry, tier: Tier, stored: bool) {
        self.insert(
            entry.key(),
            Resident {
                tier,
                size: entry.size_in_bytes,
                persistent: entry.persistent,
                stored,
            },
        );
    }

    fn remove(&mut self, key: &EntryKey) {
        if let Some(resident) = self.index.remove(key) {
            self.ids.remove(&key.unique_id);
            self.counters
                .subtract_slot(resident.size, resident.persistent);
        }
    }

    fn resident_mut(&mut self, unique_id: u64) -> Option<&mut Resident> {
        let key = self.ids.get(&unique_id)?;
        self.index.get_mut(key)
    }

    fn resident(&self, unique_id: u64) -> Option<&Resident> {
        self.ids.get(&unique_id).and_then(|key| self.index.get(key))
    }

    fn make_hot(&mut self, unique_id: u64) {
        if let Some(resident) = self.resident_mut(unique_id) {
            resident.tier = Tier::Hot;
        }
    }

    /// Moves an entry to the cold tier, whose rows always exist.
    fn make_cold(&mut self, unique_id: u64) {
        if let Some(resident) = self.resident_mut(unique_id) {
            resident.tier = Tier::Cold;
            resident.stored = true;
        }
    }

    fn mark_stored(&mut self, unique_id: u64) {
        if let Some(resident) = self.resident_mut(unique_id) {
            resident.stored = true;
        }
    }

    fn is_stored(&self, unique_id: u64) -> bool {
        self.resident(unique_id).is_some_and(|resident| resident.stored)
    }

    fn reset(&mut self) {
        self.index.clear();
        self.ids.clear();
        self.counters = QueueCounters::default();
    }

    fn first_cold(&self) -> Option<EntryKey> {
        self.index
            .iter()
            .find(|(_, resident)| resident.tier == Tier::Cold)
            .map(|(key, _)| *key)
    }

    fn slots(&self) -> impl DoubleEndedIterator<Item = EntrySlot> + '_ {
        self.index.iter().map(|(key, resident)| EntrySlot {
            key: *key,
            size: resident.size,
            persistent: resident.persistent,
        })
    }

    /// Persistent entries still waiting for their row.
    fn pending(&self) -> Vec<u64> {
        self.index
            .iter()
            .filter(|(_, resident)| resident.persistent && !resident.stored)
            .map(|(key, _)| key.unique_id)
            .collect()
    }

    /// Groups the known keys by tier and row; unknown keys are dropped.
    fn select(&self, keys: &[EntryKey]) -> Selection {
        let mut selection = Selection::default();
        for key in keys {
            let Some(resident) = self.index.get(key) else {
                continue;
            };
            match resident.tier {
                Tier::Hot => selection.hot.push(key.unique_id),
                Tier::Cold => selection.cold.push(key.unique_id),
            }
            if resident.stored {
                selection.stored.push(key.unique_id);
            }
        }
        selection
    }
}

/// Running fill level of the hot tier against the cache bounds.
struct HotFill {
    entries: u64,
    bytes: u64,
    max_entries: u64,
    max_bytes: u64,
}

impl HotFill {
    const fn new(property: &QueueProperty, entries: u64, bytes: u64) -> Self {
        Self {
            entries,
            bytes,
            max_entries: property.max_entries_cache,
            max_bytes: property.max_bytes_cache,
        }
    }

    /// Admits an entry if it fits strictly inside the bounds.
    const fn admit(&mut self, size: u64) -> bool {
        let bytes = self.bytes.saturating_add(size);
        if self.entries >= self.max_entries || bytes > self.max_bytes {
            return false;
        }
        self.entries += 1;
        self.bytes = bytes;
        true
    }
}

/// Composite queue with a bounded in-memory prefix and a durable remainder.
///
/// Persistent counters count by the entries' flag, not by tier: a transient
/// entry spilled to the cold tier is still transient.
#[derive(Debug)]
pub struct CacheQueue {
    storage_id: StorageId,
    property: QueueProperty,
    hot: InMemoryQueue,
    cold: RelationalQueue,
    inner: RwLock<CacheState>,
    listeners: Listeners,
}

impl CacheQueue {
    /// Creates an uninitialized cache queue whose cold tier lives in `table`.
    ///
    /// The queue registers with the table's pool to refill its hot tier and
    /// write held-back persistent entries when the database comes back.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if a cache bound exceeds its
    /// outer bound.
    pub fn new(storage_id: StorageId, property: QueueProperty, table: Arc<QueueTable>) -> Result<Arc<Self>> {
        property.validate()?;
        let pool = table.pool().clone();
        let queue = Arc::new(Self {
            hot: InMemoryQueue::new(storage_id.clone(), property.cache_bounds())?,
            cold: RelationalQueue::new(storage_id.clone(), property, table)?,
            storage_id,
            property,
            inner: RwLock::new(CacheState::default()),
            listeners: Listeners::default(),
        });
        let weak: Weak<Self> = Arc::downgrade(&queue);
        let listener: Weak<dyn AvailabilityListener> = weak;
        pool.add_availability_listener(listener);
        Ok(queue)
    }

    /// Totals of the hot tier.
    #[must_use]
    pub fn hot_counters(&self) -> QueueCounters {
        self.hot.counters()
    }

    /// Totals of the rows in the cold table, including the rows of
    /// persistent entries that are also held hot.
    #[must_use]
    pub fn cold_counters(&self) -> QueueCounters {
        self.cold.counters()
    }

    /// Number of persistent entries held in memory only, waiting for the
    /// database.
    #[must_use]
    pub fn num_of_pending_writes(&self) -> u64 {
        acquire_read(&self.inner).pending().len() as u64
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> QueueState {
        acquire_read(&self.inner).state
    }

    fn read<T>(&self, f: impl FnOnce(&CacheState) -> Result<T>) -> Result<T> {
        let guard = acquire_read(&self.inner);
        guard.state.ensure_active(&self.storage_id)?;
        f(&guard)
    }

    /// Runs `f` under the exclusive lock, then notifies size listeners.
    ///
    /// State changes made by `f` before it fails are kept.
    fn mutate<T>(&self, f: impl FnOnce(&mut CacheState) -> Result<T>) -> Result<T> {
        let (result, counters) = {
            let mut guard = acquire_write(&self.inner);
            guard.state.ensure_active(&self.storage_id)?;
            let result = f(&mut guard);
            (result, guard.counters)
        };
        self.listeners.notify_size(&self.storage_id, &counters, false);
        result
    }

    /// Fetches entries by key from both tiers, hot part first.
    ///
    /// With the cold tier unreachable the hot part is returned alone, unless
    /// it is empty.
    fn fetch(&self, state: &CacheState, keys: &[EntryKey]) -> Result<Vec<QueueEntry>> {
        let selection = state.select(keys);
        let mut entries = self.hot.peek_by_ids(&selection.hot);
        match self.cold.peek_by_ids(&selection.cold) {
            Ok(cold) => entries.extend(cold),
            Err(e) if e.is_retryable() && !entries.is_empty() => {
                warn!(
                    storage_id = %self.storage_id,
                    error = %e,
                    returned = entries.len(),
                    "Cold tier unavailable, serving hot entries only"
                );
            },
            Err(e) => return Err(e),
        }
        Ok(entries)
    }

    fn head_keys(state: &CacheState, num_entries: i64, num_bytes: i64, band: PriorityBand) -> Vec<EntryKey> {
        select_head(state.slots(), num_entries, num_bytes, band)
            .into_iter()
            .map(|slot| slot.key)
            .collect()
    }

    fn lowest_keys(
        state: &CacheState,
        num_entries: i64,
        num_bytes: i64,
        limit: Option<&QueueEntry>,
        leave_one: bool,
    ) -> Vec<EntryKey> {
        select_lowest(
            state.slots().rev(),
            num_entries,
            num_bytes,
            limit.map(QueueEntry::key),
            leave_one,
            state.index.len(),
        )
        .into_iter()
        .map(|slot| slot.key)
        .collect()
    }

    fn put_locked(&self, state: &mut CacheState, entries: &[QueueEntry]) -> Result<()> {
        check_capacity(&self.storage_id, &self.property, &state.counters, TIER)?;

        let mut seen = HashSet::new();
        let mut fresh: Vec<&QueueEntry> = entries
            .iter()
            .filter(|entry| !state.ids.contains_key(&entry.unique_id) && seen.insert(entry.unique_id))
            .collect();
        if fresh.is_empty() {
            return Ok(());
        }
        fresh.sort_by_key(|entry| entry.key());

        let first_cold = state.first_cold();
        let (hot_candidates, mut to_cold): (Vec<&QueueEntry>, Vec<&QueueEntry>) = fresh
            .into_iter()
            .partition(|entry| first_cold.is_none_or(|cold| entry.key() < cold));

        // Existing hot entries and hot candidates in order; the prefix that
        // fits stays hot, the rest goes cold.
        let mut merged: Vec<(EntryKey, u64, Option<&QueueEntry>)> = state
            .index
            .iter()
            .filter(|(_, resident)| resident.tier == Tier::Hot)
            .map(|(key, resident)| (*key, resident.size, None))
            .chain(
                hot_candidates
                    .iter()
                    .map(|entry| (entry.key(), entry.size_in_bytes, Some(*entry))),
            )
            .collect();
        merged.sort_by_key(|(key, _, _)| *key);

        let mut fill = HotFill::new(&self.property, 0, 0);
        let mut full = false;
        let mut keep_hot = Vec::new();
        let mut spill_ids = Vec::new();
        for (key, size, candidate) in merged {
            full = full || !fill.admit(size);
            match (full, candidate) {
                (false, Some(entry)) => keep_hot.push(entry.clone()),
                (false, None) => {},
                (true, Some(entry)) => to_cold.push(entry),
                (true, None) => spill_ids.push(key.unique_id),
            }
        }

        let rowless: Vec<u64> = spill_ids
            .iter()
            .copied()
            .filter(|id| !state.is_stored(*id))
            .collect();
        let placed: Vec<QueueEntry> = to_cold
            .iter()
            .map(|entry| (*entry).clone())
            .chain(self.hot.peek_by_ids(&rowless))
            .collect();
        let write_through: Vec<QueueEntry> = keep_hot
            .iter()
            .filter(|entry| entry.persistent)
            .cloned()
            .collect();
        let durable = self.write_rows(placed, write_through)?;

        self.hot.take_by_ids(&spill_ids);
        self.hot.insert_unchecked(&keep_hot);
        for entry in &keep_hot {
            state.insert_entry(entry, Tier::Hot, entry.persistent && durable);
        }
        for entry in &to_cold {
            state.insert_entry(entry, Tier::Cold, true);
        }
        for id in &spill_ids {
            state.make_cold(*id);
        }

        if !spill_ids.is_empty() {
            metrics::counter!("queue_spilled_entries_total").increment(spill_ids.len() as u64);
        }
        debug!(
            storage_id = %self.storage_id,
            hot = keep_hot.len(),
            cold = to_cold.len(),
            spilled = spill_ids.len(),
            durable,
            "Put entries"
        );
        Ok(())
    }

    /// Writes the rows of a put in one batch.
    ///
    /// `placed` must be stored for the put to succeed. `write_through` may be
    /// held back by an outage when nothing else needs the cold table; returns
    /// false in that case.
    fn write_rows(&self, placed: Vec<QueueEntry>, write_through: Vec<QueueEntry>) -> Result<bool> {
        if !placed.is_empty() {
            let mut batch = placed;
            batch.extend(write_through);
            self.cold.insert_unchecked(&batch)?;
            return Ok(true);
        }
        match self.cold.insert_unchecked(&write_through) {
            Ok(_) => Ok(true),
            Err(e) if e.is_retryable() => {
                warn!(
                    storage_id = %self.storage_id,
                    error = %e,
                    entries = write_through.len(),
                    "Cold tier unavailable, holding persistent entries in memory"
                );
                metrics::counter!("queue_deferred_writes_total").increment(write_through.len() as u64);
                Ok(false)
            },
            Err(e) => Err(e),
        }
    }

    /// Removes and returns entries by key, rows first.
    fn take_keys(&self, state: &mut CacheState, keys: &[EntryKey]) -> Result<Vec<QueueEntry>> {
        let selection = state.select(keys);
        let rows = self.cold.take_by_ids(&selection.stored)?;
        let cold_only: HashSet<u64> = selection.cold.iter().copied().collect();
        let mut taken = self.hot.take_by_ids(&selection.hot);
        taken.extend(
            rows.into_iter()
                .filter(|entry| cold_only.contains(&entry.unique_id)),
        );
        for key in keys {
            state.remove(key);
        }
        self.promote(state);
        Ok(taken)
    }

    /// Removes entries by key, rows first; returns the count removed.
    fn drop_keys(&self, state: &mut CacheState, keys: &[EntryKey]) -> Result<u64> {
        let selection = state.select(keys);
        let rows = self.cold.remove_slots(&selection.stored)?;
        let cold_only: HashSet<u64> = selection.cold.iter().copied().collect();
        let cold = rows
            .iter()
            .filter(|slot| cold_only.contains(&slot.key.unique_id))
            .count() as u64;
        let hot = self.hot.take_by_ids(&selection.hot).len() as u64;
        for key in keys {
            state.remove(key);
        }
        self.promote(state);
        Ok(hot + cold)
    }

    /// Copies the best cold entries into the hot tier while they fit.
    fn promote(&self, state: &mut CacheState) {
        let hot = self.hot.counters();
        let mut fill = HotFill::new(&self.property, hot.num_of_entries, hot.num_of_bytes);
        let ids: Vec<u64> = state
            .index
            .iter()
            .filter(|(_, resident)| resident.tier == Tier::Cold)
            .take_while(|(_, resident)| fill.admit(resident.size))
            .map(|(key, _)| key.unique_id)
            .collect();
        if ids.is_empty() {
            return;
        }

        match self.cold.peek_by_ids(&ids) {
            Ok(promoted) => {
                self.hot.insert_unchecked(&promoted);
                let found: HashSet<u64> = promoted.iter().map(|entry| entry.unique_id).collect();
                for id in ids {
                    if found.contains(&id) {
                        state.make_hot(id);
                    } else if let Some(key) = state.ids.get(&id).copied() {
                        state.remove(&key);
                    }
                }
                metrics::counter!("queue_promoted_entries_total").increment(found.len() as u64);
            },
            Err(e) => {
                warn!(
                    storage_id = %self.storage_id,
                    error = %e,
                    "Promotion from cold tier failed, hot tier stays short"
                );
            },
        }
    }

    /// Re-establishes the hot prefix after the index was rebuilt.
    fn restore_prefix(&self, state: &mut CacheState) -> Result<()> {
        if let Some(first_cold) = state.first_cold() {
            let demote: Vec<u64> = state
                .index
                .range(first_cold..)
                .filter(|(_, resident)| resident.tier == Tier::Hot)
                .map(|(key, _)| key.unique_id)
                .collect();
            if !demote.is_empty() {
                let rowless: Vec<u64> = demote
                    .iter()
                    .copied()
                    .filter(|id| !state.is_stored(*id))
                    .collect();
                self.cold.insert_unchecked(&self.hot.peek_by_ids(&rowless))?;
                self.hot.take_by_ids(&demote);
                for id in demote {
                    state.make_cold(id);
                }
            }
        }
        self.promote(state);
        Ok(())
    }

    /// Writes the rows of persistent entries held back by an outage; returns
    /// how many were written.
    fn flush_pending(&self, state: &mut CacheState) -> Result<usize> {
        let ids = state.pending();
        if ids.is_empty() {
            return Ok(0);
        }
        self.cold.insert_unchecked(&self.hot.peek_by_ids(&ids))?;
        for id in &ids {
            state.mark_stored(*id);
        }
        Ok(ids.len())
    }
}

impl AvailabilityListener for CacheQueue {
    fn database_available(&self) {
        let mut guard = acquire_write(&self.inner);
        if guard.state != QueueState::Active {
            return;
        }
        match self.flush_pending(&mut guard) {
            Ok(0) => {},
            Ok(written) => {
                info!(storage_id = %self.storage_id, written, "Wrote persistent entries held during the outage");
            },
            Err(e) => {
                warn!(storage_id = %self.storage_id, error = %e, "Could not write held persistent entries");
                return;
            },
        }
        self.promote(&mut guard);
        debug!(
            storage_id = %self.storage_id,
            hot = self.hot.counters().num_of_entries,
            "Refilled hot tier after reconnect"
        );
    }
}

impl QueueStorage for CacheQueue {
    fn storage_id(&self) -> &StorageId {
        &self.storage_id
    }

    fn property(&self) -> QueueProperty {
        self.property
    }

    fn initialize(&self) -> Result<()> {
        let counters = {
            let mut guard = acquire_write(&self.inner);
            guard.state.ensure_not_destroyed(&self.storage_id)?;
            if guard.state == QueueState::Active {
                return Ok(());
            }
            let first = guard.state == QueueState::Uninitialized;

            self.cold.initialize()?;
            if first {
                // transient rows never outlive the process that wrote them
                let purged = self.cold.remove_transient()?;
                if purged > 0 {
                    info!(storage_id = %self.storage_id, purged, "Removed stale transient entries");
                }
            }
            self.hot.initialize()?;

            let cold_slots = self.cold.slots()?;
            let hot_entries = self.hot.get_entries(&|_| true)?;
            let state = &mut *guard;
            state.reset();
            for slot in cold_slots {
                let resident = Resident {
                    tier: Tier::Cold,
                    size: slot.size,
                    persistent: slot.persistent,
                    stored: true,
                };
                state.insert(slot.key, resident);
            }
            for entry in &hot_entries {
                if state.ids.contains_key(&entry.unique_id) {
                    state.make_hot(entry.unique_id);
                } else {
                    state.insert_entry(entry, Tier::Hot, false);
                }
            }
            self.restore_prefix(state)?;

            state.state = QueueState::Active;
            info!(
                storage_id = %self.storage_id,
                entries = state.counters.num_of_entries,
                hot = self.hot.counters().num_of_entries,
                "Initialized cache queue"
            );
            state.counters
        };
        self.listeners.notify_size(&self.storage_id, &counters, false);
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        let (counters, cold_result) = {
            let mut guard = acquire_write(&self.inner);
            match guard.state {
                QueueState::Destroyed | QueueState::Shutdown => return Ok(()),
                QueueState::Active => match self.flush_pending(&mut guard) {
                    Ok(0) => {},
                    Ok(written) => {
                        info!(storage_id = %self.storage_id, written, "Wrote held persistent entries on shutdown");
                    },
                    Err(e) => {
                        warn!(
                            storage_id = %self.storage_id,
                            error = %e,
                            "Could not write held persistent entries on shutdown"
                        );
                    },
                },
                QueueState::Uninitialized => {},
            }
            self.hot.shutdown()?;
            let cold_result = self.cold.shutdown();
            guard.state = QueueState::Shutdown;
            info!(storage_id = %self.storage_id, "Shut down cache queue");
            (guard.counters, cold_result)
        };
        self.listeners.notify_size(&self.storage_id, &counters, true);
        cold_result
    }

    fn is_shutdown(&self) -> bool {
        acquire_read(&self.inner).state.is_shutdown()
    }

    fn destroy(&self) -> Result<()> {
        let cold_result = {
            let mut guard = acquire_write(&self.inner);
            if guard.state == QueueState::Destroyed {
                return Ok(());
            }
            self.hot.destroy()?;
            let cold_result = self.cold.destroy();
            guard.reset();
            guard.state = QueueState::Destroyed;
            info!(storage_id = %self.storage_id, "Destroyed cache queue");
            cold_result
        };
        self.listeners
            .notify_size(&self.storage_id, &QueueCounters::default(), true);
        cold_result
    }

    fn put(&self, entries: &[QueueEntry], ignore_put_interceptor: bool) -> Result<()> {
        acquire_read(&self.inner)
            .state
            .ensure_active(&self.storage_id)?;
        if !self.listeners.put_pre(entries, ignore_put_interceptor) {
            debug!(storage_id = %self.storage_id, "Put taken over by interceptor");
            return Ok(());
        }
        self.mutate(|state| self.put_locked(state, entries))?;
        self.listeners.put_post(entries, ignore_put_interceptor);
        Ok(())
    }

    fn peek(&self, num_entries: i64, num_bytes: i64) -> Result<Vec<QueueEntry>> {
        self.read(|state| {
            let keys = Self::head_keys(state, num_entries, num_bytes, PriorityBand::All);
            self.fetch(state, &keys)
        })
    }

    fn peek_same_priority(&self, num_entries: i64, num_bytes: i64) -> Result<Vec<QueueEntry>> {
        self.read(|state| {
            let keys = Self::head_keys(state, num_entries, num_bytes, PriorityBand::SameAsFirst);
            self.fetch(state, &keys)
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
            let keys = Self::head_keys(state, num_entries, num_bytes, band);
            self.fetch(state, &keys)
        })
    }

    fn peek_with_limit_entry(&self, limit: Option<&QueueEntry>) -> Result<Vec<QueueEntry>> {
        self.read(|state| {
            let Some(limit) = limit.and_then(|limit| state.ids.get(&limit.unique_id)) else {
                return Ok(Vec::new());
            };
            let keys: Vec<EntryKey> = state.index.range(..*limit).map(|(key, _)| *key).collect();
            self.fetch(state, &keys)
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
            let keys = Self::lowest_keys(state, num_entries, num_bytes, limit, leave_one);
            let mut entries = self.fetch(state, &keys)?;
            entries.reverse();
            Ok(entries)
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
            let keys = Self::lowest_keys(state, num_entries, num_bytes, limit, leave_one);
            let mut taken = self.take_keys(state, &keys)?;
            taken.reverse();
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
        let band = PriorityBand::range(min_prio, max_prio);
        self.mutate(|state| {
            let keys = Self::head_keys(state, num_entries, num_bytes, band);
            self.take_keys(state, &keys)
        })
    }

    fn remove_num(&self, num_entries: u64) -> Result<u64> {
        let take = usize::try_from(num_entries).unwrap_or(usize::MAX);
        self.mutate(|state| {
            let keys: Vec<EntryKey> = state.index.keys().take(take).copied().collect();
            self.drop_keys(state, &keys)
        })
    }

    fn remove_random(&self, entries: &[QueueEntry]) -> Result<u64> {
        if entries.is_empty() {
            return self.read(|_| Ok(0));
        }
        self.mutate(|state| {
            let keys: Vec<EntryKey> = entries
                .iter()
                .filter_map(|entry| state.ids.get(&entry.unique_id).copied())
                .collect();
            self.drop_keys(state, &keys)
        })
    }

    fn remove_with_priority(
        &self,
        num_entries: i64,
        num_bytes: i64,
        min_prio: Priority,
        max_prio: Priority,
    ) -> Result<u64> {
        let band = PriorityBand::range(min_prio, max_prio);
        self.mutate(|state| {
            let keys = Self::head_keys(state, num_entries, num_bytes, band);
            self.drop_keys(state, &keys)
        })
    }

    fn remove_with_limit_entry(&self, limit: &QueueEntry, inclusive: bool) -> Result<u64> {
        self.mutate(|state| {
            let key = state
                .ids
                .get(&limit.unique_id)
                .copied()
                .unwrap_or_else(|| limit.key());
            let keys: Vec<EntryKey> = if inclusive {
                state.index.range(..=key).map(|(k, _)| *k).collect()
            } else {
                state.index.range(..key).map(|(k, _)| *k).collect()
            };
            self.drop_keys(state, &keys)
        })
    }

    fn remove_transient(&self) -> Result<u64> {
        self.mutate(|state| {
            let keys: Vec<EntryKey> = state
                .index
                .iter()
                .filter(|(_, resident)| !resident.persistent)
                .map(|(key, _)| *key)
                .collect();
            self.drop_keys(state, &keys)
        })
    }

    fn clear(&self) -> Result<u64> {
        self.mutate(|state| {
            let removed = state.counters.num_of_entries;
            let rows = self.cold.clear()?;
            let hot = self.hot.clear()?;
            state.reset();
            debug!(storage_id = %self.storage_id, removed, hot, rows, "Cleared cache queue");
            Ok(removed)
        })
    }

    fn entry_references(&self) -> Result<Vec<u64>> {
        self.read(|state| Ok(state.index.keys().map(|key| key.unique_id).collect()))
    }

    fn get_entries(&self, filter: &dyn Fn(&QueueEntry) -> bool) -> Result<Vec<QueueEntry>> {
        self.read(|state| {
            let mut entries = self.hot.get_entries(filter)?;
            let rows = self.cold.get_entries(filter)?;
            entries.extend(rows.into_iter().filter(|entry| {
                state
                    .resident(entry.unique_id)
                    .is_some_and(|resident| resident.tier == Tier::Cold)
            }));
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
