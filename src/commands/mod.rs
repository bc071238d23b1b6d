//! Command handlers module.
//!
//! - `queue.rs`: inspection and maintenance of queues in the persistent store

mod queue;

pub use queue::{cmd_clear, cmd_peek, cmd_ping, cmd_purge_transient, cmd_queues, cmd_stats};
