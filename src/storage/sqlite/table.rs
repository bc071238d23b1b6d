//! The queue table.
//!
//! All relational queues of a deployment share one table, partitioned by
//! queue name:
//!
//! ```text
//! queue_name TEXT | data_id INTEGER | prio INTEGER | type_tag TEXT |
//! persistent INTEGER | byte_size INTEGER | blob BLOB
//! PRIMARY KEY (queue_name, data_id)
//! ```
//!
//! Reads order by `prio DESC, data_id ASC`, the queue's total order. Byte
//! windows cannot be expressed in SQL, so windowed reads first select slots
//! (ids, priorities and sizes), apply the same window rules as the in-memory
//! tier and then fetch or delete the chosen rows by id. Select and delete of
//! bulk removals run in one `BEGIN IMMEDIATE` transaction.

use crate::models::{EntryKey, Priority, QueueEntry};
use crate::storage::QueueCounters;
use crate::storage::sqlite::entry_row::{
    ENTRY_COLUMNS, SLOT_COLUMNS, entry_from_row, from_sql_int, id_to_sql, slot_from_row, to_sql_int,
};
use crate::storage::sqlite::metrics::OperationTimer;
use crate::storage::sqlite::pool::ConnectionPool;
use crate::storage::window::{EntrySlot, PriorityBand, bound, select_head, select_lowest};
use crate::{Error, Result};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use tracing::instrument;

const BACKEND: &str = "sqlite_queue";

/// Ids per `IN (...)` list, well below `SQLite`'s variable limit.
const ID_CHUNK: usize = 500;

/// Handle on the queue table.
#[derive(Debug)]
pub struct QueueTable {
    pool: ConnectionPool,
    table: String,
}

impl QueueTable {
    /// Table name used when none is configured.
    pub const DEFAULT_TABLE_NAME: &'static str = "queue_entries";

    /// Creates a handle. The schema is created by [`ensure_schema`](Self::ensure_schema).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if the table name is not a plain
    /// SQL identifier.
    pub fn new(pool: ConnectionPool, table_name: impl Into<String>) -> Result<Self> {
        let table = table_name.into();
        let valid = table
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(Error::ConfigurationError(format!(
                "invalid table name '{table}'"
            )));
        }
        Ok(Self { pool, table })
    }

    /// Underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Table name.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table
    }

    fn run<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let timer = OperationTimer::start(BACKEND, operation);
        let result = self.pool.run(operation, f);
        timer.finish(&result);
        result
    }

    fn run_in_transaction<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        self.run(operation, |conn| {
            conn.execute("BEGIN IMMEDIATE", [])?;
            let result = f(conn);
            match result {
                Ok(value) => {
                    if let Err(e) = conn.execute("COMMIT", []) {
                        let _ = conn.execute("ROLLBACK", []);
                        return Err(e);
                    }
                    Ok(value)
                },
                Err(e) => {
                    let _ = conn.execute("ROLLBACK", []);
                    Err(e)
                },
            }
        })
    }

    /// Creates the table and its ordering index when missing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResourceUnavailable`] if the database is unreachable.
    #[instrument(skip(self), fields(operation = "create_table", backend = "sqlite_queue", table = %self.table))]
    pub fn ensure_schema(&self) -> Result<()> {
        self.run("create_table", |conn| {
            conn.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        queue_name TEXT NOT NULL,
                        data_id INTEGER NOT NULL,
                        prio INTEGER NOT NULL,
                        type_tag TEXT NOT NULL,
                        persistent INTEGER NOT NULL,
                        byte_size INTEGER NOT NULL,
                        blob BLOB NOT NULL,
                        PRIMARY KEY (queue_name, data_id)
                    )",
                    self.table
                ),
                [],
            )?;

            // Total order scan within one queue
            let _ = conn.execute(
                &format!(
                    "CREATE INDEX IF NOT EXISTS idx_{0}_order ON {0}(queue_name, prio DESC, data_id ASC)",
                    self.table
                ),
                [],
            );
            Ok(())
        })
    }

    /// Inserts one entry; `false` if its id is already stored for the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn add_entry(&self, queue: &str, entry: &QueueEntry) -> Result<bool> {
        self.add_entries(queue, std::slice::from_ref(entry))
            .map(|added| added.first().copied().unwrap_or(false))
    }

    /// Inserts entries in one transaction; reports per entry whether it was
    /// new.
    ///
    /// # Errors
    ///
    /// Returns an error if any insert fails; nothing is stored then.
    #[instrument(skip(self, entries), fields(operation = "add_entries", backend = "sqlite_queue", queue = %queue, count = entries.len()))]
    pub fn add_entries(&self, queue: &str, entries: &[QueueEntry]) -> Result<Vec<bool>> {
        self.run_in_transaction("add_entries", |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "INSERT OR IGNORE INTO {} (queue_name, data_id, prio, type_tag, persistent, byte_size, blob)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                self.table
            ))?;
            let mut added = Vec::with_capacity(entries.len());
            for entry in entries {
                let changed = stmt.execute(params![
                    queue,
                    id_to_sql(entry.unique_id),
                    i64::from(entry.priority.value()),
                    entry.payload.type_tag,
                    entry.persistent,
                    to_sql_int(entry.size_in_bytes),
                    &*entry.payload.bytes,
                ])?;
                added.push(changed == 1);
            }
            Ok(added)
        })
    }

    /// Updates the mutable columns of a stored entry and returns its previous
    /// slot, or `None` if the entry is not stored.
    ///
    /// The position (priority and id) is immutable.
    #[instrument(skip(self, entry), fields(operation = "modify_entry", backend = "sqlite_queue", queue = %queue, unique_id = entry.unique_id))]
    pub(crate) fn modify_entry(&self, queue: &str, entry: &QueueEntry) -> Result<Option<EntrySlot>> {
        self.run_in_transaction("modify_entry", |conn| {
            let previous = conn
                .query_row(
                    &format!(
                        "SELECT {SLOT_COLUMNS} FROM {} WHERE queue_name = ?1 AND data_id = ?2",
                        self.table
                    ),
                    params![queue, id_to_sql(entry.unique_id)],
                    slot_from_row,
                )
                .optional()?;
            if previous.is_some() {
                conn.execute(
                    &format!(
                        "UPDATE {} SET type_tag = ?3, persistent = ?4, byte_size = ?5, blob = ?6
                         WHERE queue_name = ?1 AND data_id = ?2",
                        self.table
                    ),
                    params![
                        queue,
                        id_to_sql(entry.unique_id),
                        entry.payload.type_tag,
                        entry.persistent,
                        to_sql_int(entry.size_in_bytes),
                        &*entry.payload.bytes,
                    ],
                )?;
            }
            Ok(previous)
        })
    }

    /// Head window over every priority.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_entries(&self, queue: &str, num_entries: i64, num_bytes: i64) -> Result<Vec<QueueEntry>> {
        self.get_entries_in_band(queue, num_entries, num_bytes, PriorityBand::All)
    }

    /// Head window restricted to `min_prio..=max_prio`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_entries_by_priority(
        &self,
        queue: &str,
        num_entries: i64,
        num_bytes: i64,
        min_prio: Priority,
        max_prio: Priority,
    ) -> Result<Vec<QueueEntry>> {
        self.get_entries_in_band(
            queue,
            num_entries,
            num_bytes,
            PriorityBand::range(min_prio, max_prio),
        )
    }

    #[instrument(skip(self), fields(operation = "get_entries", backend = "sqlite_queue", queue = %queue))]
    pub(crate) fn get_entries_in_band(
        &self,
        queue: &str,
        num_entries: i64,
        num_bytes: i64,
        band: PriorityBand,
    ) -> Result<Vec<QueueEntry>> {
        self.run("get_entries", |conn| {
            let slots = self.head_window(conn, queue, num_entries, num_bytes, band)?;
            self.fetch_by_ids(conn, queue, &slot_ids(&slots))
        })
    }

    /// Entries ordered strictly before the stored entry `limit_id`; empty if
    /// that entry is not stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    #[instrument(skip(self), fields(operation = "get_entries_with_limit", backend = "sqlite_queue", queue = %queue))]
    pub fn get_entries_with_limit(&self, queue: &str, limit_id: u64) -> Result<Vec<QueueEntry>> {
        self.run("get_entries_with_limit", |conn| {
            let limit = conn
                .query_row(
                    &format!(
                        "SELECT {SLOT_COLUMNS} FROM {} WHERE queue_name = ?1 AND data_id = ?2",
                        self.table
                    ),
                    params![queue, id_to_sql(limit_id)],
                    slot_from_row,
                )
                .optional()?;
            let Some(limit) = limit else {
                return Ok(Vec::new());
            };
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {ENTRY_COLUMNS} FROM {} WHERE queue_name = ?1
                 AND (prio > ?2 OR (prio = ?2 AND data_id < ?3))
                 ORDER BY prio DESC, data_id ASC",
                self.table
            ))?;
            let rows = stmt.query_map(
                params![
                    queue,
                    i64::from(limit.key.priority.value()),
                    id_to_sql(limit.key.unique_id)
                ],
                entry_from_row,
            )?;
            rows.collect()
        })
    }

    /// Lowest window, lowest first, without removing anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    #[instrument(skip(self), fields(operation = "get_lowest", backend = "sqlite_queue", queue = %queue))]
    pub fn get_lowest(
        &self,
        queue: &str,
        num_entries: i64,
        num_bytes: i64,
        limit: Option<EntryKey>,
        leave_one: bool,
    ) -> Result<Vec<QueueEntry>> {
        self.run("get_lowest", |conn| {
            let slots = self.lowest_window(conn, queue, num_entries, num_bytes, limit, leave_one)?;
            let mut entries = self.fetch_by_ids(conn, queue, &slot_ids(&slots))?;
            entries.reverse();
            Ok(entries)
        })
    }

    /// Removes and returns the lowest window, lowest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails; nothing is removed then.
    #[instrument(skip(self), fields(operation = "get_and_delete_lowest", backend = "sqlite_queue", queue = %queue))]
    pub fn get_and_delete_lowest(
        &self,
        queue: &str,
        num_entries: i64,
        num_bytes: i64,
        limit: Option<EntryKey>,
        leave_one: bool,
    ) -> Result<Vec<QueueEntry>> {
        self.run_in_transaction("get_and_delete_lowest", |conn| {
            let slots = self.lowest_window(conn, queue, num_entries, num_bytes, limit, leave_one)?;
            let mut entries = self.take_by_ids(conn, queue, &slot_ids(&slots))?;
            entries.reverse();
            Ok(entries)
        })
    }

    /// Removes and returns a head window in the given band.
    #[instrument(skip(self), fields(operation = "take_entries", backend = "sqlite_queue", queue = %queue))]
    pub(crate) fn take_entries_in_band(
        &self,
        queue: &str,
        num_entries: i64,
        num_bytes: i64,
        band: PriorityBand,
    ) -> Result<Vec<QueueEntry>> {
        self.run_in_transaction("take_entries", |conn| {
            let slots = self.head_window(conn, queue, num_entries, num_bytes, band)?;
            self.take_by_ids(conn, queue, &slot_ids(&slots))
        })
    }

    /// Removes the first `num_entries` entries.
    #[instrument(skip(self), fields(operation = "delete_first_entries", backend = "sqlite_queue", queue = %queue))]
    pub(crate) fn delete_first_entries(&self, queue: &str, num_entries: u64) -> Result<Vec<EntrySlot>> {
        self.run_in_transaction("delete_first_entries", |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "DELETE FROM {0} WHERE queue_name = ?1 AND data_id IN (
                    SELECT data_id FROM {0} WHERE queue_name = ?1
                    ORDER BY prio DESC, data_id ASC LIMIT ?2
                 ) RETURNING {SLOT_COLUMNS}",
                self.table
            ))?;
            let rows = stmt.query_map(
                // counts beyond i64::MAX wrap to a negative LIMIT, which SQLite reads as none
                params![queue, to_sql_int(num_entries)],
                slot_from_row,
            )?;
            rows.collect()
        })
    }

    /// Removes the given ids; returns the slots actually removed.
    #[instrument(skip(self, ids), fields(operation = "delete_entries", backend = "sqlite_queue", queue = %queue, count = ids.len()))]
    pub(crate) fn delete_entries(&self, queue: &str, ids: &[u64]) -> Result<Vec<EntrySlot>> {
        self.run_in_transaction("delete_entries", |conn| {
            let mut removed = Vec::new();
            for chunk in ids.chunks(ID_CHUNK) {
                let mut stmt = conn.prepare(&format!(
                    "DELETE FROM {} WHERE queue_name = ? AND data_id IN ({}) RETURNING {SLOT_COLUMNS}",
                    self.table,
                    placeholders(chunk.len())
                ))?;
                let rows = stmt.query_map(params_from_iter(id_values(queue, chunk)), slot_from_row)?;
                for slot in rows {
                    removed.push(slot?);
                }
            }
            Ok(removed)
        })
    }

    /// Removes and returns the given ids, in total order.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails; nothing is removed then.
    #[instrument(skip(self, ids), fields(operation = "take_entries", backend = "sqlite_queue", queue = %queue, count = ids.len()))]
    pub fn take_entries(&self, queue: &str, ids: &[u64]) -> Result<Vec<QueueEntry>> {
        self.run_in_transaction("take_entries", |conn| self.take_by_ids(conn, queue, ids))
    }

    /// Removes every entry ordered before `limit`, and `limit` itself when
    /// `inclusive`.
    #[instrument(skip(self), fields(operation = "delete_up_to", backend = "sqlite_queue", queue = %queue))]
    pub(crate) fn delete_up_to(
        &self,
        queue: &str,
        limit: EntryKey,
        inclusive: bool,
    ) -> Result<Vec<EntrySlot>> {
        let id_cmp = if inclusive { "<=" } else { "<" };
        self.run_in_transaction("delete_up_to", |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "DELETE FROM {} WHERE queue_name = ?1
                 AND (prio > ?2 OR (prio = ?2 AND data_id {id_cmp} ?3))
                 RETURNING {SLOT_COLUMNS}",
                self.table
            ))?;
            let rows = stmt.query_map(
                params![
                    queue,
                    i64::from(limit.priority.value()),
                    id_to_sql(limit.unique_id)
                ],
                slot_from_row,
            )?;
            rows.collect()
        })
    }

    /// Removes every non-persistent entry of the queue.
    #[instrument(skip(self), fields(operation = "delete_all_transient", backend = "sqlite_queue", queue = %queue))]
    pub(crate) fn delete_all_transient(&self, queue: &str) -> Result<Vec<EntrySlot>> {
        self.run_in_transaction("delete_all_transient", |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "DELETE FROM {} WHERE queue_name = ?1 AND persistent = 0 RETURNING {SLOT_COLUMNS}",
                self.table
            ))?;
            let rows = stmt.query_map(params![queue], slot_from_row)?;
            rows.collect()
        })
    }

    /// Removes every entry of the queue; returns the count.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    #[instrument(skip(self), fields(operation = "delete_all", backend = "sqlite_queue", queue = %queue))]
    pub fn delete_all(&self, queue: &str) -> Result<u64> {
        self.run("delete_all", |conn| {
            conn.execute(
                &format!("DELETE FROM {} WHERE queue_name = ?1", self.table),
                params![queue],
            )
            .map(|n| n as u64)
        })
    }

    /// Entries with the given ids, in total order; missing ids are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    #[instrument(skip(self, ids), fields(operation = "get_entries_by_ids", backend = "sqlite_queue", queue = %queue, count = ids.len()))]
    pub fn get_entries_by_ids(&self, queue: &str, ids: &[u64]) -> Result<Vec<QueueEntry>> {
        self.run("get_entries_by_ids", |conn| self.fetch_by_ids(conn, queue, ids))
    }

    /// Every entry of the queue, in total order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    #[instrument(skip(self), fields(operation = "get_all_entries", backend = "sqlite_queue", queue = %queue))]
    pub fn get_all_entries(&self, queue: &str) -> Result<Vec<QueueEntry>> {
        self.run("get_all_entries", |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {ENTRY_COLUMNS} FROM {} WHERE queue_name = ?1 ORDER BY prio DESC, data_id ASC",
                self.table
            ))?;
            let rows = stmt.query_map(params![queue], entry_from_row)?;
            rows.collect()
        })
    }

    /// Slots of every entry of the queue, in total order.
    #[instrument(skip(self), fields(operation = "get_entry_slots", backend = "sqlite_queue", queue = %queue))]
    pub(crate) fn get_entry_slots(&self, queue: &str) -> Result<Vec<EntrySlot>> {
        self.run("get_entry_slots", |conn| {
            query_slots(
                conn,
                &format!(
                    "SELECT {SLOT_COLUMNS} FROM {} WHERE queue_name = ? ORDER BY prio DESC, data_id ASC",
                    self.table
                ),
                vec![Value::Text(queue.to_string())],
            )
        })
    }

    /// Unique ids of the queue, in total order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn entry_references(&self, queue: &str) -> Result<Vec<u64>> {
        self.get_entry_slots(queue)
            .map(|slots| slots.iter().map(|slot| slot.key.unique_id).collect())
    }

    /// Aggregate counters of the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    #[instrument(skip(self), fields(operation = "count", backend = "sqlite_queue", queue = %queue))]
    pub fn counters(&self, queue: &str) -> Result<QueueCounters> {
        self.run("count", |conn| {
            conn.query_row(
                &format!(
                    "SELECT {COUNTER_COLUMNS} FROM {} WHERE queue_name = ?1",
                    self.table
                ),
                params![queue],
                |row| counters_at(row, 0),
            )
        })
    }

    /// Every queue with rows in the table, with its counters.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    #[instrument(skip(self), fields(operation = "queue_names", backend = "sqlite_queue"))]
    pub fn queue_names(&self) -> Result<Vec<(String, QueueCounters)>> {
        self.run("queue_names", |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT queue_name, {COUNTER_COLUMNS} FROM {} GROUP BY queue_name ORDER BY queue_name",
                self.table
            ))?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, counters_at(row, 1)?)))?;
            rows.collect()
        })
    }

    /// Liveness probe independent of any queue.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResourceUnavailable`] if the database is unreachable.
    pub fn ping(&self) -> Result<()> {
        self.pool.ping()
    }

    fn head_window(
        &self,
        conn: &Connection,
        queue: &str,
        num_entries: i64,
        num_bytes: i64,
        band: PriorityBand,
    ) -> rusqlite::Result<Vec<EntrySlot>> {
        let mut sql = format!("SELECT {SLOT_COLUMNS} FROM {} WHERE queue_name = ?", self.table);
        let mut values = vec![Value::Text(queue.to_string())];
        match band {
            PriorityBand::All => {},
            PriorityBand::Range { min, max } => {
                sql.push_str(" AND prio BETWEEN ? AND ?");
                values.push(Value::Integer(i64::from(min.value())));
                values.push(Value::Integer(i64::from(max.value())));
            },
            PriorityBand::SameAsFirst => {
                sql.push_str(&format!(
                    " AND prio = (SELECT max(prio) FROM {} WHERE queue_name = ?)",
                    self.table
                ));
                values.push(Value::Text(queue.to_string()));
            },
        }
        sql.push_str(" ORDER BY prio DESC, data_id ASC");
        if let Some(limit) = bound(num_entries) {
            sql.push_str(" LIMIT ?");
            values.push(Value::Integer(to_sql_int(limit)));
        }
        let slots = query_slots(conn, &sql, values)?;
        Ok(select_head(slots, num_entries, num_bytes, band))
    }

    fn lowest_window(
        &self,
        conn: &Connection,
        queue: &str,
        num_entries: i64,
        num_bytes: i64,
        limit: Option<EntryKey>,
        leave_one: bool,
    ) -> rusqlite::Result<Vec<EntrySlot>> {
        let total: i64 = conn.query_row(
            &format!("SELECT count(*) FROM {} WHERE queue_name = ?1", self.table),
            params![queue],
            |row| row.get(0),
        )?;

        let mut sql = format!("SELECT {SLOT_COLUMNS} FROM {} WHERE queue_name = ?", self.table);
        let mut values = vec![Value::Text(queue.to_string())];
        if let Some(limit) = limit {
            sql.push_str(" AND (prio < ? OR (prio = ? AND data_id > ?))");
            let prio = i64::from(limit.priority.value());
            values.push(Value::Integer(prio));
            values.push(Value::Integer(prio));
            values.push(Value::Integer(id_to_sql(limit.unique_id)));
        }
        sql.push_str(" ORDER BY prio ASC, data_id DESC");
        // a byte bound can only widen the range beyond the entry bound
        if bound(num_bytes).is_none() {
            if let Some(limit) = bound(num_entries) {
                sql.push_str(" LIMIT ?");
                values.push(Value::Integer(to_sql_int(limit)));
            }
        }
        let tail = query_slots(conn, &sql, values)?;
        let total = usize::try_from(total).unwrap_or(usize::MAX);
        Ok(select_lowest(tail, num_entries, num_bytes, limit, leave_one, total))
    }

    fn fetch_by_ids(
        &self,
        conn: &Connection,
        queue: &str,
        ids: &[u64],
    ) -> rusqlite::Result<Vec<QueueEntry>> {
        let mut entries = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(ID_CHUNK) {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM {} WHERE queue_name = ? AND data_id IN ({})",
                self.table,
                placeholders(chunk.len())
            ))?;
            let rows = stmt.query_map(params_from_iter(id_values(queue, chunk)), entry_from_row)?;
            for entry in rows {
                entries.push(entry?);
            }
        }
        entries.sort_by_key(QueueEntry::key);
        Ok(entries)
    }

    fn take_by_ids(
        &self,
        conn: &Connection,
        queue: &str,
        ids: &[u64],
    ) -> rusqlite::Result<Vec<QueueEntry>> {
        let mut entries = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(ID_CHUNK) {
            let mut stmt = conn.prepare(&format!(
                "DELETE FROM {} WHERE queue_name = ? AND data_id IN ({}) RETURNING {ENTRY_COLUMNS}",
                self.table,
                placeholders(chunk.len())
            ))?;
            let rows = stmt.query_map(params_from_iter(id_values(queue, chunk)), entry_from_row)?;
            for entry in rows {
                entries.push(entry?);
            }
        }
        entries.sort_by_key(QueueEntry::key);
        Ok(entries)
    }
}

const COUNTER_COLUMNS: &str = "count(*), coalesce(sum(byte_size), 0), coalesce(sum(persistent), 0), \
     coalesce(sum(CASE WHEN persistent THEN byte_size ELSE 0 END), 0)";

fn counters_at(row: &rusqlite::Row<'_>, first: usize) -> rusqlite::Result<QueueCounters> {
    Ok(QueueCounters {
        num_of_entries: from_sql_int(row.get(first)?),
        num_of_bytes: from_sql_int(row.get(first + 1)?),
        num_of_persistent_entries: from_sql_int(row.get(first + 2)?),
        num_of_persistent_bytes: from_sql_int(row.get(first + 3)?),
    })
}

fn query_slots(conn: &Connection, sql: &str, values: Vec<Value>) -> rusqlite::Result<Vec<EntrySlot>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(params_from_iter(values), slot_from_row)?;
    rows.collect()
}

fn slot_ids(slots: &[EntrySlot]) -> Vec<u64> {
    slots.iter().map(|slot| slot.key.unique_id).collect()
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn id_values(queue: &str, ids: &[u64]) -> Vec<Value> {
    std::iter::once(Value::Text(queue.to_string()))
        .chain(ids.iter().map(|id| Value::Integer(id_to_sql(*id))))
        .collect()
}
