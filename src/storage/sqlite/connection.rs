//! Connection factories for the `SQLite` tier.
//!
//! The pool never opens connections itself; it asks a [`Connector`]. This is
//! the seam where the location of the database is decided and where tests
//! inject an unreachable backend.

use crate::{Error, Result};
use rusqlite::Connection;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Opens connections to one database.
pub trait Connector: Send + Sync + fmt::Debug {
    /// Opens and configures a new connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResourceUnavailable`] if the database cannot be
    /// reached.
    fn connect(&self) -> Result<Connection>;

    /// Liveness probe on an open connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResourceUnavailable`] if the probe fails.
    fn ping(&self, conn: &Connection) -> Result<()> {
        conn.query_row("SELECT 1", [], |_| Ok(()))
            .map_err(|e| Error::ResourceUnavailable {
                operation: "ping".to_string(),
                cause: e.to_string(),
            })
    }

    /// Largest pool size the database supports, if limited.
    fn max_connections(&self) -> Option<usize> {
        None
    }

    /// Location for log messages.
    fn describe(&self) -> String;
}

#[derive(Debug)]
enum Target {
    File(PathBuf),
    SharedMemory(String),
}

/// Connector for a database file or a shared in-memory database.
#[derive(Debug)]
pub struct SqliteConnector {
    target: Target,
    // Keeps a shared in-memory database alive while the pool has no
    // connection open.
    anchor: Option<Mutex<Connection>>,
}

impl SqliteConnector {
    /// Connector for the database file at `path`, created on first connect.
    ///
    /// The parent directory must exist.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            target: Target::File(path.into()),
            anchor: None,
        }
    }

    /// Connector for a private in-memory database shared by all connections
    /// of this connector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if `SQLite` cannot allocate the
    /// database.
    pub fn in_memory() -> Result<Self> {
        let uri = format!(
            "file:tierqueue-{}?mode=memory&cache=shared",
            uuid::Uuid::new_v4().simple()
        );
        let anchor = Connection::open(&uri).map_err(|e| Error::OperationFailed {
            operation: "open_sqlite_in_memory".to_string(),
            cause: e.to_string(),
        })?;
        Ok(Self {
            target: Target::SharedMemory(uri),
            anchor: Some(Mutex::new(anchor)),
        })
    }

    /// Database path (None for in-memory).
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match &self.target {
            Target::File(path) => Some(path),
            Target::SharedMemory(_) => None,
        }
    }
}

impl Connector for SqliteConnector {
    fn connect(&self) -> Result<Connection> {
        let conn = match &self.target {
            Target::File(path) => Connection::open(path),
            Target::SharedMemory(uri) => Connection::open(uri),
        }
        .map_err(|e| Error::ResourceUnavailable {
            operation: "open_sqlite".to_string(),
            cause: e.to_string(),
        })?;
        configure_connection(&conn)?;
        Ok(conn)
    }

    fn max_connections(&self) -> Option<usize> {
        // shared-cache in-memory databases lock per table across connections
        self.anchor.as_ref().map(|_| 1)
    }

    fn describe(&self) -> String {
        match &self.target {
            Target::File(path) => path.display().to_string(),
            Target::SharedMemory(_) => ":memory:".to_string(),
        }
    }
}

/// Configures a `SQLite` connection for the queue workload.
///
/// # Configuration Applied
///
/// - **WAL mode**: concurrent readers alongside the single writer
/// - **NORMAL synchronous**: durable across application crashes
/// - **`busy_timeout`**: waits up to 5 seconds on lock contention instead of
///   failing with `SQLITE_BUSY`
///
/// In-memory databases report journal mode `memory`; the pragma is ignored
/// there.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if pragma configuration fails.
pub fn configure_connection(conn: &Connection) -> Result<()> {
    // journal_mode returns a row, so pragma_update is used instead of execute_batch
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    conn.pragma_update(None, "busy_timeout", "5000")
        .map_err(|e| Error::OperationFailed {
            operation: "configure_connection".to_string(),
            cause: e.to_string(),
        })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configure_connection() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(configure_connection(&conn).is_ok());

        let synchronous: i32 = conn
            .pragma_query_value(None, "synchronous", |row| row.get(0))
            .unwrap();
        assert_eq!(synchronous, 1, "Expected NORMAL synchronous mode (1)");

        let busy_timeout: i32 = conn
            .pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .unwrap();
        assert_eq!(busy_timeout, 5000);
    }

    #[test]
    fn test_shared_memory_visible_across_connections() {
        let connector = SqliteConnector::in_memory().unwrap();
        assert_eq!(connector.max_connections(), Some(1));
        assert!(connector.path().is_none());

        let first = connector.connect().unwrap();
        first
            .execute("CREATE TABLE probe (id INTEGER)", [])
            .unwrap();
        drop(first);

        let second = connector.connect().unwrap();
        let count: i64 = second
            .query_row("SELECT count(*) FROM probe", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
        assert!(connector.ping(&second).is_ok());
    }

    #[test]
    fn test_file_connector_wal() {
        let dir = tempfile::tempdir().unwrap();
        let connector = SqliteConnector::file(dir.path().join("queue.db"));
        let conn = connector.connect().unwrap();
        let journal_mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .unwrap();
        assert_eq!(journal_mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_missing_directory_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let connector = SqliteConnector::file(dir.path().join("absent").join("queue.db"));
        assert!(matches!(
            connector.connect(),
            Err(Error::ResourceUnavailable { .. })
        ));
    }
}
