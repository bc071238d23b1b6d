//! # Tierqueue
//!
//! Priority message queue storage for publish/subscribe brokers.
//!
//! Every callback queue, history queue and point-to-point delivery queue of a
//! broker is an instance of this engine. Entries are kept in one total order
//! (priority descending, then age ascending) regardless of where they live.
//!
//! ## Features
//!
//! - One queue contract ([`QueueStorage`]) with three tiers behind it
//! - In-memory tier with an ordered index and O(1) counters
//! - `SQLite` persistent tier with a pooled, self-healing connection layer
//! - Cache tier that keeps the hot prefix in memory and spills the rest to disk
//! - Capacity limits with a one-shot overflow allowance
//!
//! ## Example
//!
//! ```rust,ignore
//! use tierqueue::{InMemoryQueue, Priority, QueueEntry, QueueProperty, QueueStorage, StorageId};
//!
//! let queue = InMemoryQueue::new(StorageId::parse("callback:client/joe/1")?, QueueProperty::default())?;
//! queue.initialize()?;
//! queue.put(&[QueueEntry::new(Priority::HIGH, true, "msg", b"hello".to_vec())], false)?;
//! let head = queue.peek(1, -1)?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
// multiple_crate_versions is inherently crate-level (detects duplicate transitive dependencies).
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod config;
pub mod models;
pub mod observability;
pub mod storage;

// Re-exports for convenience
pub use config::{QueueKind, TierQueueConfig};
pub use models::{EntryKey, Payload, Priority, QueueEntry, QueueProperty, StorageId};
pub use storage::{
    CacheQueue, InMemoryQueue, Queue, QueueCounters, QueueFactory, QueueStorage, RelationalQueue,
};

/// Error type for queue operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Priority outside 0..=9, malformed storage id |
/// | `OperationFailed` | `SQLite` statement errors that are not connectivity related |
/// | `CapacityExceeded` | Put beyond the one-shot overflow allowance |
/// | `ResourceUnavailable` | Persistent backend unreachable (retryable) |
/// | `ConfigurationError` | Cache bound larger than the queue bound, bad config file values |
/// | `Shutdown` | Data operation on a queue that is shut down or destroyed |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - A priority outside `0..=9` is requested
    /// - A storage id string lacks the `relating:postfix` separator
    /// - A queue kind string is unknown
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    ///
    /// Raised when:
    /// - `SQLite` statements fail for reasons other than connection loss
    /// - Filesystem I/O errors occur (log files, config files)
    /// - Observability is initialized twice
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// The queue is full.
    ///
    /// Raised when:
    /// - `put` finds the entry count above `max_entries`
    /// - `put` finds the byte count above `max_bytes`
    ///
    /// The put has no effect.
    #[error("queue '{storage_id}' overflow: {reason}")]
    CapacityExceeded {
        /// Queue that rejected the put.
        storage_id: String,
        /// Which limit was hit.
        reason: String,
    },

    /// The persistent backend is unreachable.
    ///
    /// Raised when:
    /// - The connection pool is marked lost and the reconnect thread has not yet
    ///   succeeded
    /// - A statement fails and the follow-up ping fails too
    /// - The cache tier has to spill or promote while the cold tier is down
    ///
    /// Callers may retry; the pool recovers without any explicit call.
    #[error("resource unavailable during '{operation}': {cause}")]
    ResourceUnavailable {
        /// The operation that hit the outage.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// Invalid configuration.
    ///
    /// Raised when:
    /// - `max_entries_cache > max_entries` or `max_bytes_cache > max_bytes`
    /// - A configuration file value cannot be interpreted
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// The queue is not active.
    ///
    /// Raised when:
    /// - Any data operation runs after `shutdown()` or `destroy()`
    /// - Any data operation runs before `initialize()`
    #[error("queue '{storage_id}' is shut down")]
    Shutdown {
        /// Queue that refused the call.
        storage_id: String,
    },
}

impl Error {
    /// Returns true if the caller may retry the operation later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ResourceUnavailable { .. })
    }
}

/// Result type alias for queue operations.
pub type Result<T> = std::result::Result<T, Error>;
