//! Selection rules shared by every tier.
//!
//! The public API uses `-1` for "unbounded" on entry and byte limits, the way
//! broker clients configure queues. Inside the crate those bounds become
//! `Option<u64>` and the two scan shapes live here:
//!
//! - **head window** (`peek*`, `remove*`, `take_with_priority`): walk the total
//!   order from the front; stop at the entry limit or when the next entry would
//!   reach the byte limit. The first entry is always admitted so a single
//!   oversized entry can never block the queue.
//! - **lowest window** (`take_lowest`, `peek_lowest`): walk from the tail while
//!   inside range, where the range is the less restrictive of the two bounds.

use crate::models::{EntryKey, Priority, QueueEntry};

/// Converts a `-1`-style bound into an optional limit.
pub(crate) fn bound(value: i64) -> Option<u64> {
    u64::try_from(value).ok()
}

/// Anything with a position in the total order and a byte size.
pub(crate) trait Windowed {
    fn key(&self) -> EntryKey;
    fn size(&self) -> u64;
}

impl Windowed for QueueEntry {
    fn key(&self) -> EntryKey {
        Self::key(self)
    }

    fn size(&self) -> u64 {
        self.size_in_bytes
    }
}

/// Position, size and durability of an entry without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntrySlot {
    pub(crate) key: EntryKey,
    pub(crate) size: u64,
    pub(crate) persistent: bool,
}

impl EntrySlot {
    pub(crate) const fn of(entry: &QueueEntry) -> Self {
        Self {
            key: entry.key(),
            size: entry.size_in_bytes,
            persistent: entry.persistent,
        }
    }
}

impl Windowed for EntrySlot {
    fn key(&self) -> EntryKey {
        self.key
    }

    fn size(&self) -> u64 {
        self.size
    }
}

impl<T: Windowed> Windowed for &T {
    fn key(&self) -> EntryKey {
        (**self).key()
    }

    fn size(&self) -> u64 {
        (**self).size()
    }
}

impl Windowed for (EntryKey, u64) {
    fn key(&self) -> EntryKey {
        self.0
    }

    fn size(&self) -> u64 {
        self.1
    }
}

/// Priority filter of a head scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PriorityBand {
    /// Every priority.
    All,
    /// Inclusive range.
    Range { min: Priority, max: Priority },
    /// Only the priority of the first entry found.
    SameAsFirst,
}

impl PriorityBand {
    pub(crate) const fn range(min: Priority, max: Priority) -> Self {
        Self::Range { min, max }
    }
}

/// Running totals of a head scan.
#[derive(Debug)]
struct HeadWindow {
    max_entries: Option<u64>,
    max_bytes: Option<u64>,
    entries: u64,
    bytes: u64,
}

impl HeadWindow {
    fn new(num_entries: i64, num_bytes: i64) -> Self {
        Self {
            max_entries: bound(num_entries),
            max_bytes: bound(num_bytes),
            entries: 0,
            bytes: 0,
        }
    }

    fn is_full(&self) -> bool {
        self.max_entries.is_some_and(|max| self.entries >= max)
    }

    /// Admits an entry of `size` bytes, or reports that the scan must stop.
    fn admit(&mut self, size: u64) -> bool {
        if self.is_full() {
            return false;
        }
        if let Some(max) = self.max_bytes {
            if self.entries > 0 && self.bytes.saturating_add(size) >= max {
                return false;
            }
        }
        self.entries += 1;
        self.bytes = self.bytes.saturating_add(size);
        true
    }
}

/// Selects the head window from items given in total order.
pub(crate) fn select_head<T, I>(
    items: I,
    num_entries: i64,
    num_bytes: i64,
    band: PriorityBand,
) -> Vec<T>
where
    T: Windowed,
    I: IntoIterator<Item = T>,
{
    let mut window = HeadWindow::new(num_entries, num_bytes);
    let mut band = band;
    let mut selected = Vec::new();

    for item in items {
        if window.is_full() {
            break;
        }
        let priority = item.key().priority;
        let (min, max) = match band {
            PriorityBand::All => (Priority::MIN, Priority::MAX),
            PriorityBand::Range { min, max } => (min, max),
            PriorityBand::SameAsFirst => {
                band = PriorityBand::range(priority, priority);
                (priority, priority)
            },
        };
        // Descending priority: nothing further down can match.
        if priority < min {
            break;
        }
        if priority > max {
            continue;
        }
        if !window.admit(item.size()) {
            break;
        }
        selected.push(item);
    }
    selected
}

/// Running totals of a tail scan.
#[derive(Debug)]
struct LowestWindow {
    max_entries: Option<u64>,
    max_bytes: Option<u64>,
    entries: u64,
    bytes: u64,
}

impl LowestWindow {
    fn new(num_entries: i64, num_bytes: i64) -> Self {
        Self {
            max_entries: bound(num_entries),
            max_bytes: bound(num_bytes),
            entries: 0,
            bytes: 0,
        }
    }

    /// The less restrictive of both bounds decides.
    fn is_inside_range(&self) -> bool {
        match (self.max_entries, self.max_bytes) {
            (None, None) => true,
            (None, Some(max_bytes)) => self.bytes < max_bytes,
            (Some(max_entries), None) => self.entries < max_entries,
            (Some(max_entries), Some(max_bytes)) => {
                self.entries < max_entries || self.bytes < max_bytes
            },
        }
    }
}

/// Selects the lowest window from items given in reverse total order
/// (tail first). The result is lowest first as well.
///
/// With `limit`, only items ordered strictly after it qualify. With
/// `leave_one`, the last selected item is given back when the selection would
/// otherwise cover all `total` items.
pub(crate) fn select_lowest<T, I>(
    items_from_tail: I,
    num_entries: i64,
    num_bytes: i64,
    limit: Option<EntryKey>,
    leave_one: bool,
    total: usize,
) -> Vec<T>
where
    T: Windowed,
    I: IntoIterator<Item = T>,
{
    let mut window = LowestWindow::new(num_entries, num_bytes);
    let mut selected = Vec::new();

    for item in items_from_tail {
        if !window.is_inside_range() {
            break;
        }
        if limit.is_some_and(|limit| limit >= item.key()) {
            break;
        }
        window.entries += 1;
        window.bytes = window.bytes.saturating_add(item.size());
        selected.push(item);
    }

    if leave_one && !selected.is_empty() && selected.len() == total {
        selected.pop();
    }
    selected
}
