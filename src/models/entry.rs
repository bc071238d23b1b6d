//! Queue entries, priorities and the total order.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Message priority from 0 (lowest) to 9 (highest).
///
/// Higher priorities are dequeued first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Priority(u8);

impl Priority {
    /// Lowest priority.
    pub const MIN: Self = Self(0);
    /// Low priority.
    pub const LOW: Self = Self(3);
    /// Default priority.
    pub const NORM: Self = Self(5);
    /// High priority.
    pub const HIGH: Self = Self(7);
    /// Highest priority.
    pub const MAX: Self = Self(9);

    /// Creates a priority, rejecting values above 9.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `value > 9`.
    pub fn new(value: u8) -> Result<Self> {
        if value > Self::MAX.0 {
            return Err(Error::InvalidInput(format!(
                "priority {value} is outside 0..=9"
            )));
        }
        Ok(Self(value))
    }

    /// Returns the numeric value.
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }

    /// Parses a number or one of `MIN`, `LOW`, `NORM`, `HIGH`, `MAX`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for anything else.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "MIN" => Ok(Self::MIN),
            "LOW" => Ok(Self::LOW),
            "NORM" | "NORMAL" => Ok(Self::NORM),
            "HIGH" => Ok(Self::HIGH),
            "MAX" => Ok(Self::MAX),
            other => other
                .parse::<u8>()
                .map_err(|_| Error::InvalidInput(format!("unknown priority '{s}'")))
                .and_then(Self::new),
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORM
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i64> for Priority {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        u8::try_from(value)
            .map_err(|_| Error::InvalidInput(format!("priority {value} is outside 0..=9")))
            .and_then(Self::new)
    }
}

/// Position of an entry in the total order.
///
/// `a < b` means `a` is dequeued before `b`: higher priority first, then the
/// smaller (older) unique id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryKey {
    /// Entry priority.
    pub priority: Priority,
    /// Entry unique id.
    pub unique_id: u64,
}

impl EntryKey {
    /// Creates a key.
    #[must_use]
    pub const fn new(priority: Priority, unique_id: u64) -> Self {
        Self {
            priority,
            unique_id,
        }
    }
}

impl Ord for EntryKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.unique_id.cmp(&other.unique_id))
    }
}

impl PartialOrd for EntryKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Opaque message content plus a type tag for reconstruction by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Discriminator the caller uses to decode `bytes`.
    pub type_tag: String,
    /// Serialized content, shared between copies of the entry.
    pub bytes: Arc<[u8]>,
}

impl Payload {
    /// Creates a payload.
    #[must_use]
    pub fn new(type_tag: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            type_tag: type_tag.into(),
            bytes: bytes.into(),
        }
    }
}

/// An entry stored in a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// Identity and age of the entry.
    pub unique_id: u64,
    /// Dequeue priority.
    pub priority: Priority,
    /// Bytes charged against the queue's byte limit.
    pub size_in_bytes: u64,
    /// Whether the entry must survive a restart.
    pub persistent: bool,
    /// Message content.
    pub payload: Payload,
}

static LAST_UNIQUE_ID: AtomicU64 = AtomicU64::new(0);

/// Returns a fresh unique id.
///
/// Ids are wall-clock nanoseconds, bumped by one whenever the clock has not
/// advanced past the previously issued id, so they never repeat and always
/// increase within a process.
pub fn next_unique_id() -> u64 {
    let now = Utc::now()
        .timestamp_nanos_opt()
        .and_then(|n| u64::try_from(n).ok())
        .unwrap_or(0);
    let previous = LAST_UNIQUE_ID
        .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or(now);
    now.max(previous + 1)
}

impl QueueEntry {
    /// Creates an entry with a fresh unique id, charged by payload length.
    #[must_use]
    pub fn new(
        priority: Priority,
        persistent: bool,
        type_tag: impl Into<String>,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Self {
        let payload = Payload::new(type_tag, bytes);
        Self {
            unique_id: next_unique_id(),
            priority,
            size_in_bytes: payload.bytes.len() as u64,
            persistent,
            payload,
        }
    }

    /// Replaces the unique id.
    #[must_use]
    pub const fn with_unique_id(mut self, unique_id: u64) -> Self {
        self.unique_id = unique_id;
        self
    }

    /// Replaces the byte size charged for the entry.
    #[must_use]
    pub const fn with_size_in_bytes(mut self, size_in_bytes: u64) -> Self {
        self.size_in_bytes = size_in_bytes;
        self
    }

    /// Returns the entry's position in the total order.
    #[must_use]
    pub const fn key(&self) -> EntryKey {
        EntryKey::new(self.priority, self.unique_id)
    }

    /// Creation time, when the id came from [`next_unique_id`].
    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.unique_id)
            .ok()
            .map(DateTime::from_timestamp_nanos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(prio: u8, id: u64) -> EntryKey {
        EntryKey::new(Priority::new(prio).unwrap(), id)
    }

    #[test]
    fn test_higher_priority_sorts_first() {
        assert!(key(9, 100) < key(5, 1));
        assert!(key(0, 1) > key(1, 100));
    }

    #[test]
    fn test_older_sorts_first_within_priority() {
        assert!(key(5, 1) < key(5, 2));
        assert_eq!(key(5, 7).cmp(&key(5, 7)), Ordering::Equal);
    }

    #[test]
    fn test_priority_bounds() {
        assert!(Priority::new(9).is_ok());
        assert!(matches!(Priority::new(10), Err(Error::InvalidInput(_))));
        assert!(Priority::try_from(-1).is_err());
        assert_eq!(Priority::try_from(3).unwrap(), Priority::LOW);
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!(Priority::parse("high").unwrap(), Priority::HIGH);
        assert_eq!(Priority::parse(" 2 ").unwrap().value(), 2);
        assert!(Priority::parse("urgent").is_err());
        assert!(Priority::parse("12").is_err());
    }

    #[test]
    fn test_unique_ids_increase() {
        let ids: Vec<u64> = (0..1000).map(|_| next_unique_id()).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_entry_size_defaults_to_payload_length() {
        let entry = QueueEntry::new(Priority::NORM, false, "text", b"hello".to_vec());
        assert_eq!(entry.size_in_bytes, 5);
        assert_eq!(entry.with_size_in_bytes(80).size_in_bytes, 80);
    }

    #[test]
    fn test_created_at_from_generated_id() {
        let entry = QueueEntry::new(Priority::NORM, false, "text", Vec::new());
        let created = entry.created_at().unwrap();
        assert!((Utc::now() - created).num_seconds().abs() < 60);
    }
}
