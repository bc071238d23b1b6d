//! Chaos testing for concurrent queue access.
//!
//! Many threads hammer one queue of each tier with mixed operations; at the
//! end the maintained counters must agree with the stored entries and the
//! order must still hold.

// Chaos tests use expect/unwrap for simplicity - panics are acceptable in tests
// Excessive nesting is acceptable in concurrent test code with thread spawns
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::excessive_nesting)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use test_case::test_case;
use tierqueue::storage::sqlite::{ConnectionPool, PoolConfig, QueueTable, SqliteConnector};
use tierqueue::{
    Priority, Queue, QueueEntry, QueueFactory, QueueKind, QueueProperty, QueueStorage, StorageId,
};

const THREADS: u64 = 8;
const OPS_PER_THREAD: u64 = 60;

fn shared_queue(kind: QueueKind, dir: &std::path::Path) -> Arc<Queue> {
    let pool = ConnectionPool::new(
        Arc::new(SqliteConnector::file(dir.join("chaos.db"))),
        PoolConfig::default(),
    );
    let factory = QueueFactory::new(Arc::new(
        QueueTable::new(pool, QueueTable::DEFAULT_TABLE_NAME).unwrap(),
    ));
    let property = QueueProperty::new(100_000, 100_000_000).with_cache(20, 1_000_000);
    Arc::new(
        factory
            .create(kind, StorageId::parse("callback:chaos").unwrap(), property)
            .unwrap(),
    )
}

fn assert_consistent(queue: &Queue) {
    let entries = queue.peek(-1, -1).unwrap();
    let counters = queue.counters();
    assert_eq!(counters.num_of_entries, entries.len() as u64);
    assert_eq!(
        counters.num_of_bytes,
        entries.iter().map(|e| e.size_in_bytes).sum::<u64>()
    );
    assert_eq!(
        counters.num_of_persistent_entries,
        entries.iter().filter(|e| e.persistent).count() as u64
    );
    assert!(entries.windows(2).all(|pair| pair[0].key() < pair[1].key()));
}

#[test_case(QueueKind::Ram; "ram")]
#[test_case(QueueKind::Jdbc; "jdbc")]
#[test_case(QueueKind::Cache; "cache")]
fn test_concurrent_mixed_operations(kind: QueueKind) {
    let dir = tempfile::tempdir().unwrap();
    let queue = shared_queue(kind, dir.path());
    let next_id = Arc::new(AtomicU64::new(1));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let queue = Arc::clone(&queue);
            let next_id = Arc::clone(&next_id);
            thread::spawn(move || {
                for op in 0..OPS_PER_THREAD {
                    let id = next_id.fetch_add(1, Ordering::SeqCst);
                    let prio = Priority::new(u8::try_from((t + op) % 10).unwrap()).unwrap();
                    let entry = QueueEntry::new(prio, op % 3 != 0, "chaos", vec![0u8; 8])
                        .with_unique_id(id);
                    queue.put_entry(&entry, false).unwrap();

                    match op % 6 {
                        0 => {
                            queue.remove().unwrap();
                        },
                        1 => {
                            queue.peek(5, -1).unwrap();
                        },
                        2 => {
                            queue.take_lowest(1, -1, None, true).unwrap();
                        },
                        3 => {
                            queue.remove_random(&[entry]).unwrap();
                        },
                        4 => {
                            queue.peek_same_priority(-1, -1).unwrap();
                        },
                        _ => {
                            queue
                                .remove_with_priority(1, -1, Priority::MIN, Priority::LOW)
                                .unwrap();
                        },
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_consistent(&queue);
    queue.clear().unwrap();
    assert_eq!(queue.num_of_entries(), 0);
}

#[test]
fn test_concurrent_puts_keep_every_entry() {
    let dir = tempfile::tempdir().unwrap();
    let queue = shared_queue(QueueKind::Cache, dir.path());

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..OPS_PER_THREAD {
                    let entry = QueueEntry::new(Priority::NORM, true, "chaos", vec![1u8; 4])
                        .with_unique_id(t * OPS_PER_THREAD + i + 1);
                    queue.put_entry(&entry, false).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let expected: Vec<u64> = (1..=THREADS * OPS_PER_THREAD).collect();
    assert_eq!(queue.entry_references().unwrap(), expected);
    assert_consistent(&queue);
}
