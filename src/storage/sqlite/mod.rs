//! `SQLite` infrastructure of the relational tier.
//!
//! ## Module Structure
//!
//! - [`connection`]: connection factories ([`Connector`], [`SqliteConnector`])
//!   and pragma configuration
//! - [`pool`]: bounded [`ConnectionPool`] on `r2d2` with loss detection, a
//!   background reconnect thread and [`AvailabilityListener`] callbacks
//! - [`table`]: the shared [`QueueTable`] and its bulk operations
//! - [`entry_row`]: row conversion for [`QueueEntry`](crate::models::QueueEntry)
//! - [`metrics`]: operation timing and pool health counters
//!
//! ## Failure Model
//!
//! - Connectivity failures surface as
//!   [`Error::ResourceUnavailable`](crate::Error::ResourceUnavailable) and flip
//!   the pool into fail-fast mode until the reconnect thread succeeds
//! - Every other driver error surfaces as
//!   [`Error::OperationFailed`](crate::Error::OperationFailed)
//! - Rows written before an outage are untouched by it

pub mod connection;
pub mod entry_row;
pub mod metrics;
pub mod pool;
pub mod table;

pub use connection::{Connector, SqliteConnector, configure_connection};
pub use metrics::OperationTimer;
pub use pool::{AvailabilityListener, ConnectionPool, ConnectorManager, PoolConfig, PooledConnection};
pub use table::QueueTable;
