//! Put interceptors and storage size listeners.

use crate::models::{QueueEntry, StorageId};
use crate::storage::QueueCounters;
use crate::storage::lock::{acquire_read, acquire_write};
use std::fmt;
use std::sync::{Arc, RwLock};

/// Interceptor invoked around `put`.
///
/// A queue holds at most one put listener. The dispatch layer uses it to
/// deliver an entry directly instead of queueing it.
pub trait PutListener: Send + Sync {
    /// Called before entries are stored. Returning `false` swallows the put:
    /// nothing is stored and the call succeeds.
    fn put_pre(&self, entries: &[QueueEntry]) -> bool;

    /// Called after entries were stored.
    fn put_post(&self, entries: &[QueueEntry]);
}

/// Observer of entry and byte counts.
pub trait StorageSizeListener: Send + Sync {
    /// Called after every mutation with the queue's current counters.
    fn changed(&self, storage_id: &StorageId, counters: &QueueCounters, is_shutdown: bool);
}

/// Listener slots of one queue.
#[derive(Default)]
pub(crate) struct Listeners {
    put: RwLock<Option<Arc<dyn PutListener>>>,
    size: RwLock<Vec<Arc<dyn StorageSizeListener>>>,
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("put", &acquire_read(&self.put).is_some())
            .field("size", &acquire_read(&self.size).len())
            .finish()
    }
}

impl Listeners {
    /// Installs or removes the put listener, returning the previous one.
    pub(crate) fn set_put_listener(
        &self,
        listener: Option<Arc<dyn PutListener>>,
    ) -> Option<Arc<dyn PutListener>> {
        std::mem::replace(&mut *acquire_write(&self.put), listener)
    }

    /// Runs the pre hook; `true` means go ahead and store.
    pub(crate) fn put_pre(&self, entries: &[QueueEntry], ignore_put_interceptor: bool) -> bool {
        if ignore_put_interceptor {
            return true;
        }
        let listener = acquire_read(&self.put).clone();
        listener.is_none_or(|l| l.put_pre(entries))
    }

    pub(crate) fn put_post(&self, entries: &[QueueEntry], ignore_put_interceptor: bool) {
        if ignore_put_interceptor {
            return;
        }
        let listener = acquire_read(&self.put).clone();
        if let Some(listener) = listener {
            listener.put_post(entries);
        }
    }

    pub(crate) fn add_size_listener(&self, listener: Arc<dyn StorageSizeListener>) {
        acquire_write(&self.size).push(listener);
    }

    pub(crate) fn remove_size_listener(&self, listener: &Arc<dyn StorageSizeListener>) -> bool {
        let mut listeners = acquire_write(&self.size);
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    /// Notifies size listeners. Never call while holding the queue lock.
    pub(crate) fn notify_size(
        &self,
        storage_id: &StorageId,
        counters: &QueueCounters,
        is_shutdown: bool,
    ) {
        let listeners = acquire_read(&self.size).clone();
        for listener in listeners {
            listener.changed(storage_id, counters, is_shutdown);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Priority;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Veto;

    impl PutListener for Veto {
        fn put_pre(&self, _entries: &[QueueEntry]) -> bool {
            false
        }

        fn put_post(&self, _entries: &[QueueEntry]) {}
    }

    #[derive(Default)]
    struct Recorder(AtomicU64);

    impl StorageSizeListener for Recorder {
        fn changed(&self, _id: &StorageId, counters: &QueueCounters, _is_shutdown: bool) {
            self.0.store(counters.num_of_entries, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_veto_and_bypass() {
        let listeners = Listeners::default();
        let entries = [QueueEntry::new(Priority::NORM, false, "t", Vec::new())];
        assert!(listeners.put_pre(&entries, false));

        listeners.set_put_listener(Some(Arc::new(Veto)));
        assert!(!listeners.put_pre(&entries, false));
        assert!(listeners.put_pre(&entries, true));

        assert!(listeners.set_put_listener(None).is_some());
        assert!(listeners.put_pre(&entries, false));
    }

    #[test]
    fn test_size_listener_add_remove() {
        let listeners = Listeners::default();
        let recorder = Arc::new(Recorder::default());
        let handle: Arc<dyn StorageSizeListener> = recorder.clone();
        listeners.add_size_listener(Arc::clone(&handle));

        let id = StorageId::parse("callback:a").unwrap();
        let counters = QueueCounters {
            num_of_entries: 3,
            ..QueueCounters::default()
        };
        listeners.notify_size(&id, &counters, false);
        assert_eq!(recorder.0.load(Ordering::SeqCst), 3);

        assert!(listeners.remove_size_listener(&handle));
        assert!(!listeners.remove_size_listener(&handle));
    }
}
