//! Row conversion between `SQLite` and [`QueueEntry`].
//!
//! `SQLite` integers are signed 64-bit. Unique ids are stored with the sign
//! bit flipped so that signed comparisons in SQL follow unsigned id order over
//! the whole `u64` range. Sizes and counts use a plain cast.

use crate::models::{EntryKey, Payload, Priority, QueueEntry};
use crate::storage::window::EntrySlot;
use rusqlite::Row;
use rusqlite::types::Type;

/// Columns read by [`entry_from_row`], in order.
pub const ENTRY_COLUMNS: &str = "data_id, prio, byte_size, persistent, type_tag, blob";

/// Columns read by [`slot_from_row`], in order.
pub const SLOT_COLUMNS: &str = "data_id, prio, byte_size, persistent";

/// Stores a `u64` in an `INTEGER` column.
#[allow(clippy::cast_possible_wrap)]
#[must_use]
pub const fn to_sql_int(value: u64) -> i64 {
    value as i64
}

/// Reads a `u64` back from an `INTEGER` column.
#[allow(clippy::cast_sign_loss)]
#[must_use]
pub const fn from_sql_int(value: i64) -> u64 {
    value as u64
}

const SIGN_BIT: u64 = 1 << 63;

/// Stores a unique id in the `data_id` column, order-preserving.
#[must_use]
pub const fn id_to_sql(unique_id: u64) -> i64 {
    to_sql_int(unique_id ^ SIGN_BIT)
}

/// Reads a unique id back from the `data_id` column.
#[must_use]
pub const fn id_from_sql(value: i64) -> u64 {
    from_sql_int(value) ^ SIGN_BIT
}

fn priority_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Priority> {
    let raw: i64 = row.get(idx)?;
    Priority::try_from(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

/// Builds an entry from a row selected with [`ENTRY_COLUMNS`].
pub fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<QueueEntry> {
    let unique_id = id_from_sql(row.get(0)?);
    let priority = priority_at(row, 1)?;
    let size_in_bytes = from_sql_int(row.get(2)?);
    let persistent: bool = row.get(3)?;
    let type_tag: String = row.get(4)?;
    let blob: Vec<u8> = row.get(5)?;

    Ok(QueueEntry {
        unique_id,
        priority,
        size_in_bytes,
        persistent,
        payload: Payload::new(type_tag, blob),
    })
}

/// Builds a slot from a row selected with [`SLOT_COLUMNS`].
pub(crate) fn slot_from_row(row: &Row<'_>) -> rusqlite::Result<EntrySlot> {
    Ok(EntrySlot {
        key: EntryKey::new(priority_at(row, 1)?, id_from_sql(row.get(0)?)),
        size: from_sql_int(row.get(2)?),
        persistent: row.get(3)?,
    })
}
