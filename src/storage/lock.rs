//! Lock acquisition with poison recovery.
//!
//! A panic inside a critical section poisons the lock. The queue state it
//! guards is only mutated through methods that keep index and counters in
//! step, so we recover the inner value, log a warning and count the event
//! instead of cascading the panic into every later caller.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Acquires a mutex, recovering from poison.
///
/// # Examples
///
/// ```ignore
/// use std::sync::Mutex;
/// use tierqueue::storage::lock::acquire_lock;
///
/// let mutex = Mutex::new(0_u64);
/// *acquire_lock(&mutex) += 1;
/// ```
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("queue mutex was poisoned, recovering");
            metrics::counter!("queue_lock_poison_recovery_total", "kind" => "mutex").increment(1);
            poisoned.into_inner()
        },
    }
}

/// Acquires a shared read lock, recovering from poison.
pub fn acquire_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("queue rwlock was poisoned, recovering read guard");
            metrics::counter!("queue_lock_poison_recovery_total", "kind" => "read").increment(1);
            poisoned.into_inner()
        },
    }
}

/// Acquires an exclusive write lock, recovering from poison.
pub fn acquire_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("queue rwlock was poisoned, recovering write guard");
            metrics::counter!("queue_lock_poison_recovery_total", "kind" => "write").increment(1);
            poisoned.into_inner()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_acquire_lock_concurrent() {
        let mutex = Arc::new(Mutex::new(0));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let mutex = Arc::clone(&mutex);
                thread::spawn(move || {
                    *acquire_lock(&mutex) += 1;
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(*acquire_lock(&mutex), 10);
    }

    #[test]
    #[allow(clippy::panic)]
    fn test_recovers_poisoned_rwlock() {
        let lock = Arc::new(RwLock::new(5));
        let poisoner = Arc::clone(&lock);
        let _ = thread::spawn(move || {
            let _guard = poisoner.write().unwrap();
            panic!("poison the lock");
        })
        .join();

        assert!(lock.is_poisoned());
        assert_eq!(*acquire_read(&lock), 5);
        *acquire_write(&lock) = 6;
        assert_eq!(*acquire_read(&lock), 6);
    }

    #[test]
    #[allow(clippy::panic)]
    fn test_recovers_poisoned_mutex() {
        let mutex = Arc::new(Mutex::new(vec![1]));
        let poisoner = Arc::clone(&mutex);
        let _ = thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison the mutex");
        })
        .join();

        acquire_lock(&mutex).push(2);
        assert_eq!(*acquire_lock(&mutex), vec![1, 2]);
    }
}
