//! Queue lifecycle states.

use crate::models::StorageId;
use crate::{Error, Result};
use std::fmt;

/// Lifecycle of a queue instance.
///
/// ```text
/// Uninitialized --initialize--> Active <--shutdown/initialize--> Shutdown
///                                  \                               /
///                                   +-----------destroy-----------+--> Destroyed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueState {
    /// Constructed, not yet initialized.
    #[default]
    Uninitialized,
    /// Serving operations.
    Active,
    /// Runtime resources released, durable content kept.
    Shutdown,
    /// Content removed; terminal.
    Destroyed,
}

impl QueueState {
    /// Fails with [`Error::Shutdown`] unless active.
    pub fn ensure_active(self, storage_id: &StorageId) -> Result<()> {
        if self == Self::Active {
            Ok(())
        } else {
            Err(Error::Shutdown {
                storage_id: storage_id.to_string(),
            })
        }
    }

    /// Fails with [`Error::Shutdown`] if the queue was destroyed.
    pub fn ensure_not_destroyed(self, storage_id: &StorageId) -> Result<()> {
        if self == Self::Destroyed {
            Err(Error::Shutdown {
                storage_id: storage_id.to_string(),
            })
        } else {
            Ok(())
        }
    }

    /// True once shut down or destroyed.
    #[must_use]
    pub const fn is_shutdown(self) -> bool {
        matches!(self, Self::Shutdown | Self::Destroyed)
    }
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Active => "active",
            Self::Shutdown => "shutdown",
            Self::Destroyed => "destroyed",
        };
        write!(f, "{name}")
    }
}
