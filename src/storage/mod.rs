//! Queue storage tiers.
//!
//! Three implementations of one [`QueueStorage`] contract:
//! - **Memory**: ordered in-process index, no I/O
//! - **Relational**: `SQLite` rows partitioned by queue name, pooled connections
//!   with reconnect
//! - **Cache**: a bounded memory prefix in front of a relational remainder
//!
//! Callers pick a tier through [`QueueFactory`] and hold the resulting
//! [`Queue`].

// Allow significant_drop_tightening - queue locks span the whole operation,
// backend I/O included.
#![allow(clippy::significant_drop_tightening)]
// Allow cast_possible_truncation - entry counts are bounded by memory.
#![allow(clippy::cast_possible_truncation)]
// Allow match_same_arms for explicit enum handling.
#![allow(clippy::match_same_arms)]

mod cache;
mod counters;
mod factory;
mod lifecycle;
mod listener;
pub mod lock;
mod memory;
mod queue;
mod relational;
pub mod sqlite;
pub mod traits;
mod window;

pub use cache::CacheQueue;
pub use counters::QueueCounters;
pub use factory::QueueFactory;
pub use lifecycle::QueueState;
pub use listener::{PutListener, StorageSizeListener};
pub use memory::InMemoryQueue;
pub use queue::Queue;
pub use relational::RelationalQueue;
pub use traits::QueueStorage;
