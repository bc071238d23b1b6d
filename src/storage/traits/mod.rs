//! Storage traits.

mod queue;

pub use queue::QueueStorage;
