//! Data models for tierqueue.
//!
//! This module contains the data structures shared by every queue tier.

mod entry;
mod property;
mod storage_id;

pub use entry::{EntryKey, Payload, Priority, QueueEntry, next_unique_id};
pub use property::QueueProperty;
pub use storage_id::StorageId;
