//! Bounded connection pool with loss detection and background reconnect.
//!
//! Checkout, the connection limit, the acquire timeout and the checkout
//! health check are delegated to [`r2d2`], with [`ConnectorManager`] adapting
//! a [`Connector`]. On top of that the pool tracks whether the database is
//! reachable at all. Once a connection is found dead (a checkout that could
//! not produce a healthy connection, or a statement error classified as
//! connectivity loss) the pool:
//!
//! 1. flips its `available` flag to false,
//! 2. fails every later checkout immediately with
//!    [`Error::ResourceUnavailable`],
//! 3. starts one reconnect thread that retries every `reconnect_interval`
//!    until a fresh connection passes the ping, then flips the flag back and
//!    notifies every registered [`AvailabilityListener`].
//!
//! Callers never trigger the reconnect and never wait for it. The checkout
//! that first runs into the outage may wait up to `acquire_timeout`.

use crate::storage::lock::acquire_lock;
use crate::storage::sqlite::connection::Connector;
use crate::storage::sqlite::metrics;
use crate::{Error, Result};
use r2d2::{HandleError, ManageConnection};
use rusqlite::{Connection, ErrorCode};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pool tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of open connections.
    pub max_connections: usize,
    /// How long a checkout waits for a busy pool.
    pub acquire_timeout: Duration,
    /// Delay between reconnect attempts.
    pub reconnect_interval: Duration,
    /// Ping idle connections before handing them out.
    pub test_on_checkout: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 4,
            acquire_timeout: Duration::from_secs(5),
            reconnect_interval: Duration::from_secs(1),
            test_on_checkout: true,
        }
    }
}

impl PoolConfig {
    /// Sets the maximum number of open connections (at least 1).
    #[must_use]
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    /// Sets the checkout timeout.
    #[must_use]
    pub const fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Sets the reconnect interval.
    #[must_use]
    pub const fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Enables or disables the checkout ping.
    #[must_use]
    pub const fn with_test_on_checkout(mut self, enabled: bool) -> Self {
        self.test_on_checkout = enabled;
        self
    }
}

/// Notified when the database is reachable again after an outage.
///
/// Called on the reconnect thread; implementations may use the pool.
pub trait AvailabilityListener: Send + Sync {
    /// The reconnect thread re-established the database.
    fn database_available(&self);
}

/// [`r2d2`] adapter over a [`Connector`].
#[derive(Debug)]
pub struct ConnectorManager {
    connector: Arc<dyn Connector>,
}

impl ManageConnection for ConnectorManager {
    type Connection = Connection;
    type Error = Error;

    fn connect(&self) -> Result<Connection> {
        let conn = self.connector.connect()?;
        debug!(target = %self.connector.describe(), "Opened SQLite connection");
        Ok(conn)
    }

    fn is_valid(&self, conn: &mut Connection) -> Result<()> {
        self.connector.ping(conn)
    }

    fn has_broken(&self, conn: &mut Connection) -> bool {
        // a connection returned inside an open transaction is not reused
        !conn.is_autocommit()
    }
}

/// Routes connection errors from the pool's worker threads to `tracing`.
#[derive(Debug)]
struct TraceErrors;

impl HandleError<Error> for TraceErrors {
    fn handle_error(&self, error: Error) {
        debug!(error = %error, "SQLite connection attempt failed");
    }
}

/// A checked-out connection, returned to the pool on drop.
pub type PooledConnection = r2d2::PooledConnection<ConnectorManager>;

struct PoolShared {
    connector: Arc<dyn Connector>,
    config: PoolConfig,
    available: AtomicBool,
    reconnecting: AtomicBool,
    listeners: Mutex<Vec<Weak<dyn AvailabilityListener>>>,
}

impl PoolShared {
    fn unavailable(&self, operation: &str) -> Error {
        Error::ResourceUnavailable {
            operation: operation.to_string(),
            cause: format!(
                "connection to '{}' lost, reconnect pending",
                self.connector.describe()
            ),
        }
    }

    /// Opens a connection outside the pool and pings it.
    fn reach(&self) -> Result<Connection> {
        let conn = self.connector.connect()?;
        self.connector.ping(&conn)?;
        Ok(conn)
    }

    fn notify_available(&self) {
        let listeners: Vec<Arc<dyn AvailabilityListener>> = {
            let mut registered = acquire_lock(&self.listeners);
            registered.retain(|listener| listener.strong_count() > 0);
            registered.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in listeners {
            listener.database_available();
        }
    }
}

/// Pool of `SQLite` connections shared by every relational queue of a
/// deployment.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: r2d2::Pool<ConnectorManager>,
    shared: Arc<PoolShared>,
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state();
        f.debug_struct("ConnectionPool")
            .field("connector", &self.shared.connector)
            .field("config", &self.shared.config)
            .field("available", &self.is_available())
            .field("connections", &state.connections)
            .field("idle", &state.idle_connections)
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    /// Creates a pool. No connection is opened until the first checkout.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, config: PoolConfig) -> Self {
        let mut config = config.with_max_connections(config.max_connections);
        if let Some(limit) = connector.max_connections() {
            config.max_connections = config.max_connections.min(limit);
        }

        let inner = r2d2::Pool::builder()
            .max_size(u32::try_from(config.max_connections).unwrap_or(u32::MAX))
            .min_idle(Some(0))
            // r2d2 rejects a zero timeout
            .connection_timeout(config.acquire_timeout.max(Duration::from_millis(1)))
            .test_on_check_out(config.test_on_checkout)
            .idle_timeout(None)
            .max_lifetime(None)
            .error_handler(Box::new(TraceErrors))
            .build_unchecked(ConnectorManager {
                connector: Arc::clone(&connector),
            });

        Self {
            inner,
            shared: Arc::new(PoolShared {
                connector,
                config,
                available: AtomicBool::new(true),
                reconnecting: AtomicBool::new(false),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// False between a detected connection loss and a successful reconnect.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.shared.available.load(Ordering::Acquire)
    }

    /// Effective pool configuration.
    #[must_use]
    pub fn config(&self) -> PoolConfig {
        self.shared.config
    }

    /// Database location for log messages.
    #[must_use]
    pub fn describe(&self) -> String {
        self.shared.connector.describe()
    }

    /// Registers a listener for the end of an outage.
    ///
    /// The pool holds it weakly; a dropped listener is forgotten.
    pub fn add_availability_listener(&self, listener: Weak<dyn AvailabilityListener>) {
        let mut registered = acquire_lock(&self.shared.listeners);
        registered.retain(|known| known.strong_count() > 0);
        registered.push(listener);
    }

    /// Checks out a connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResourceUnavailable`] while the database is
    /// unreachable or when no connection frees up within the acquire timeout.
    pub fn get(&self, operation: &str) -> Result<PooledConnection> {
        if !self.is_available() {
            return Err(self.shared.unavailable(operation));
        }
        self.inner
            .get()
            .map_err(|e| self.checkout_failed(operation, &e))
    }

    /// Tells an exhausted pool from an unreachable database.
    fn checkout_failed(&self, operation: &str, err: &r2d2::Error) -> Error {
        let shared = &self.shared;
        match shared.reach() {
            Ok(_) => {
                metrics::pool_timeout();
                Error::ResourceUnavailable {
                    operation: operation.to_string(),
                    cause: format!(
                        "no connection free after {:?} ({} open): {err}",
                        shared.config.acquire_timeout,
                        self.inner.state().connections
                    ),
                }
            },
            Err(e) => {
                self.mark_lost(&e.to_string());
                shared.unavailable(operation)
            },
        }
    }

    /// Checks out a connection and runs `f` on it, classifying failures.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResourceUnavailable`] for connectivity failures and
    /// [`Error::OperationFailed`] for everything else.
    pub fn run<T>(
        &self,
        operation: &str,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let conn = self.get(operation)?;
        f(&conn).map_err(|e| self.classify(operation, &e, &conn))
    }

    /// Pings the database with a checked-out connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResourceUnavailable`] if the database is unreachable.
    pub fn ping(&self) -> Result<()> {
        let conn = self.get("ping")?;
        self.shared.connector.ping(&conn).inspect_err(|e| {
            self.mark_lost(&e.to_string());
        })
    }

    /// Maps a driver error, marking the pool lost if the connection is gone.
    fn classify(&self, operation: &str, err: &rusqlite::Error, conn: &Connection) -> Error {
        let lost = is_connectivity_error(err) || self.shared.connector.ping(conn).is_err();
        if lost {
            self.mark_lost(&err.to_string());
            Error::ResourceUnavailable {
                operation: operation.to_string(),
                cause: err.to_string(),
            }
        } else {
            Error::OperationFailed {
                operation: operation.to_string(),
                cause: err.to_string(),
            }
        }
    }

    /// Marks the pool unavailable and starts the reconnect thread once.
    fn mark_lost(&self, cause: &str) {
        let shared = &self.shared;
        if !shared.available.swap(false, Ordering::AcqRel) {
            return;
        }
        warn!(
            target = %shared.connector.describe(),
            cause,
            "SQLite connection lost, failing fast until reconnected"
        );
        metrics::connection_lost();

        if shared.reconnecting.swap(true, Ordering::AcqRel) {
            return;
        }
        let weak = Arc::downgrade(shared);
        let spawned = thread::Builder::new()
            .name("tierqueue-reconnect".to_string())
            .spawn(move || reconnect_loop(&weak));
        if let Err(e) = spawned {
            // without a thread, let the next checkout retry inline
            warn!(error = %e, "Failed to spawn reconnect thread");
            shared.reconnecting.store(false, Ordering::Release);
            shared.available.store(true, Ordering::Release);
        }
    }
}

fn reconnect_loop(weak: &Weak<PoolShared>) {
    let mut attempts: u64 = 0;
    loop {
        let interval = match weak.upgrade() {
            Some(shared) => shared.config.reconnect_interval,
            None => return,
        };
        thread::sleep(interval);
        let Some(shared) = weak.upgrade() else {
            return;
        };
        attempts += 1;

        match shared.reach() {
            Ok(_) => {
                shared.reconnecting.store(false, Ordering::Release);
                shared.available.store(true, Ordering::Release);
                metrics::reconnected();
                info!(
                    target = %shared.connector.describe(),
                    attempts,
                    "SQLite connection re-established"
                );
                shared.notify_available();
                return;
            },
            Err(e) => {
                debug!(attempts, error = %e, "SQLite reconnect attempt failed");
            },
        }
    }
}

/// Driver errors that mean the database itself is gone.
fn is_connectivity_error(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => matches!(
            e.code,
            ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
                | ErrorCode::NotADatabase
                | ErrorCode::DatabaseCorrupt
        ),
        _ => false,
    }
}
