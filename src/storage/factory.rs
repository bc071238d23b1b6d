//! Factory for creating queues of a configured kind.

use crate::config::{QueueKind, TierQueueConfig};
use crate::models::{QueueProperty, StorageId};
use crate::storage::sqlite::{ConnectionPool, QueueTable, SqliteConnector};
use crate::storage::traits::QueueStorage;
use crate::storage::{CacheQueue, InMemoryQueue, Queue, RelationalQueue};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::debug;

/// Resolves `(kind, storage id, property)` into an initialized [`Queue`].
///
/// All relational and cache queues created by one factory share its
/// [`QueueTable`] and therefore its connection pool.
#[derive(Debug, Clone)]
pub struct QueueFactory {
    table: Arc<QueueTable>,
    default_property: QueueProperty,
}

impl QueueFactory {
    /// Creates a factory over an existing table.
    #[must_use]
    pub fn new(table: Arc<QueueTable>) -> Self {
        Self {
            table,
            default_property: QueueProperty::default(),
        }
    }

    /// Creates a factory from configuration.
    ///
    /// Opens nothing yet: connections are made on first use, so this
    /// succeeds while the database is unreachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the database directory cannot be created or the
    /// table name is not a valid identifier.
    pub fn from_config(config: &TierQueueConfig) -> Result<Self> {
        if let Some(parent) = config.sqlite.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::OperationFailed {
                operation: "create_database_dir".to_string(),
                cause: format!("{}: {e}", parent.display()),
            })?;
        }
        let connector = Arc::new(SqliteConnector::file(config.sqlite.path.clone()));
        let pool = ConnectionPool::new(connector, config.sqlite.pool_config());
        let table = QueueTable::new(pool, config.sqlite.table_name.clone())?;
        Ok(Self::new(Arc::new(table)).with_default_property(config.queue))
    }

    /// Sets the property used by [`Self::create_default`].
    #[must_use]
    pub const fn with_default_property(mut self, property: QueueProperty) -> Self {
        self.default_property = property;
        self
    }

    /// The shared table.
    #[must_use]
    pub const fn table(&self) -> &Arc<QueueTable> {
        &self.table
    }

    /// Property used by [`Self::create_default`].
    #[must_use]
    pub const fn default_property(&self) -> QueueProperty {
        self.default_property
    }

    /// Creates and initializes a queue.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] for inconsistent bounds, or the
    /// error of `initialize` (for example
    /// [`Error::ResourceUnavailable`] when the database is down).
    pub fn create(&self, kind: QueueKind, storage_id: StorageId, property: QueueProperty) -> Result<Queue> {
        let queue: Queue = match kind {
            QueueKind::Ram => InMemoryQueue::new(storage_id, property)?.into(),
            QueueKind::Jdbc => {
                RelationalQueue::new(storage_id, property, Arc::clone(&self.table))?.into()
            },
            QueueKind::Cache => CacheQueue::new(storage_id, property, Arc::clone(&self.table))?.into(),
        };
        queue.initialize()?;
        debug!(storage_id = %queue.storage_id(), kind = %kind, "Created queue");
        Ok(queue)
    }

    /// Creates and initializes a queue with the default property.
    ///
    /// # Errors
    ///
    /// See [`Self::create`].
    pub fn create_default(&self, kind: QueueKind, storage_id: StorageId) -> Result<Queue> {
        self.create(kind, storage_id, self.default_property)
    }
}
