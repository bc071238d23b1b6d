//! Database outage and restart behavior.
//!
//! A connector that can be switched off stands in for an unreachable
//! database. Covers:
//! - Fast failure while the database is down, with counters untouched
//! - Resumption without caller action once it is back
//! - The cache tier serving its hot prefix during the outage
//! - The cache tier catching up on its own once the database is back
//! - Content surviving a process restart, with or without shutdown

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tierqueue::storage::sqlite::{Connector, ConnectionPool, PoolConfig, QueueTable, SqliteConnector};
use tierqueue::{
    Error, Priority, Queue, QueueEntry, QueueFactory, QueueKind, QueueProperty, QueueStorage,
    StorageId, TierQueueConfig,
};

// ============================================================================
// Helpers
// ============================================================================

#[derive(Debug)]
struct Switchable {
    inner: SqliteConnector,
    down: AtomicBool,
}

impl Switchable {
    fn unavailable(operation: &str) -> Error {
        Error::ResourceUnavailable {
            operation: operation.to_string(),
            cause: "database switched off".to_string(),
        }
    }
}

impl Connector for Switchable {
    fn connect(&self) -> tierqueue::Result<Connection> {
        if self.down.load(Ordering::SeqCst) {
            return Err(Self::unavailable("connect"));
        }
        self.inner.connect()
    }

    fn ping(&self, conn: &Connection) -> tierqueue::Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(Self::unavailable("ping"));
        }
        self.inner.ping(conn)
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}

fn switchable_factory(dir: &Path) -> (QueueFactory, Arc<Switchable>) {
    let connector = Arc::new(Switchable {
        inner: SqliteConnector::file(dir.join("queues.db")),
        down: AtomicBool::new(false),
    });
    let config = PoolConfig::default()
        .with_max_connections(2)
        .with_acquire_timeout(Duration::from_millis(200))
        .with_reconnect_interval(Duration::from_millis(20));
    let pool = ConnectionPool::new(connector.clone(), config);
    let table = QueueTable::new(pool, QueueTable::DEFAULT_TABLE_NAME).unwrap();
    (QueueFactory::new(Arc::new(table)), connector)
}

fn wait_for(done: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    done()
}

fn wait_until_available(factory: &QueueFactory) {
    assert!(
        wait_for(|| factory.table().pool().is_available()),
        "pool did not reconnect"
    );
}

fn entry(prio: u8, id: u64, persistent: bool) -> QueueEntry {
    QueueEntry::new(Priority::new(prio).unwrap(), persistent, "update", vec![7u8; 16])
        .with_unique_id(id)
}

fn ids(entries: &[QueueEntry]) -> Vec<u64> {
    entries.iter().map(|e| e.unique_id).collect()
}

fn is_unavailable<T>(result: &tierqueue::Result<T>) -> bool {
    matches!(result, Err(e) if e.is_retryable())
}

// ============================================================================
// Outage
// ============================================================================

#[test]
fn test_relational_outage_resumes() {
    let dir = tempfile::tempdir().unwrap();
    let (factory, connector) = switchable_factory(dir.path());
    let queue = factory
        .create(
            QueueKind::Jdbc,
            StorageId::parse("callback:outage").unwrap(),
            QueueProperty::new(100, 100_000),
        )
        .unwrap();
    queue
        .put(&[entry(5, 1, true), entry(5, 2, true), entry(9, 3, true)], false)
        .unwrap();

    connector.down.store(true, Ordering::SeqCst);
    assert!(is_unavailable(&queue.put_entry(&entry(5, 4, true), false)));
    assert!(is_unavailable(&queue.peek(-1, -1)));
    assert!(is_unavailable(&queue.remove()));
    assert!(is_unavailable(&factory.table().ping()));
    assert_eq!(queue.num_of_entries(), 3);

    connector.down.store(false, Ordering::SeqCst);
    wait_until_available(&factory);

    queue.put_entry(&entry(5, 4, true), false).unwrap();
    assert_eq!(ids(&queue.peek(-1, -1).unwrap()), vec![3, 1, 2, 4]);
    assert_eq!(queue.num_of_entries(), 4);
}

#[test]
fn test_cache_serves_hot_tier_during_outage() {
    let dir = tempfile::tempdir().unwrap();
    let (factory, connector) = switchable_factory(dir.path());
    let queue = factory
        .create(
            QueueKind::Cache,
            StorageId::parse("callback:cache-outage").unwrap(),
            QueueProperty::new(100, 100_000).with_cache(3, 100_000),
        )
        .unwrap();
    let Queue::Cache(cache) = &queue else {
        unreachable!("factory returned the wrong tier");
    };
    queue.put(&[entry(5, 1, true), entry(5, 2, true)], false).unwrap();

    connector.down.store(true, Ordering::SeqCst);
    // fits into the hot tier; its row waits for the database
    queue.put_entry(&entry(5, 3, true), false).unwrap();
    assert_eq!(cache.num_of_pending_writes(), 1);
    assert_eq!(ids(&queue.peek(-1, -1).unwrap()), vec![1, 2, 3]);
    // needs the cold tier
    assert!(is_unavailable(&queue.put_entry(&entry(5, 4, true), false)));
    // would delete a row
    assert!(is_unavailable(&queue.remove()));
    assert_eq!(queue.num_of_entries(), 3);

    connector.down.store(false, Ordering::SeqCst);
    wait_until_available(&factory);
    assert!(wait_for(|| cache.num_of_pending_writes() == 0));
    assert_eq!(
        factory.table().entry_references("callback:cache-outage").unwrap(),
        vec![1, 2, 3]
    );

    queue.put_entry(&entry(5, 4, true), false).unwrap();
    queue.put_entry(&entry(9, 5, true), false).unwrap();
    assert_eq!(ids(&queue.peek(-1, -1).unwrap()), vec![5, 1, 2, 3, 4]);
    assert_eq!(queue.num_of_entries(), 5);
}

#[test]
fn test_cache_catches_up_after_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let (factory, connector) = switchable_factory(dir.path());
    let queue = factory
        .create(
            QueueKind::Cache,
            StorageId::parse("callback:cache-reconnect").unwrap(),
            QueueProperty::new(100, 100_000).with_cache(2, 100_000),
        )
        .unwrap();
    let Queue::Cache(cache) = &queue else {
        unreachable!("factory returned the wrong tier");
    };
    queue
        .put(
            &[entry(5, 1, false), entry(5, 2, false), entry(5, 3, false), entry(5, 4, false)],
            false,
        )
        .unwrap();

    connector.down.store(true, Ordering::SeqCst);
    // hot transient entries have no rows; the refill from the cold tier fails
    assert_eq!(queue.remove_num(2).unwrap(), 2);
    assert_eq!(cache.hot_counters().num_of_entries, 0);
    queue.put_entry(&entry(9, 5, true), false).unwrap();
    assert_eq!(cache.num_of_pending_writes(), 1);

    // no queue call after this point until the checks
    connector.down.store(false, Ordering::SeqCst);
    assert!(wait_for(|| {
        cache.num_of_pending_writes() == 0 && cache.hot_counters().num_of_entries == 2
    }));
    assert_eq!(
        factory.table().entry_references("callback:cache-reconnect").unwrap(),
        vec![5, 3, 4]
    );
    assert_eq!(ids(&queue.peek(-1, -1).unwrap()), vec![5, 3, 4]);
    assert_eq!(queue.num_of_entries(), 3);
}

#[test]
fn test_cache_returns_hot_part_when_cold_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (factory, connector) = switchable_factory(dir.path());
    let queue = factory
        .create(
            QueueKind::Cache,
            StorageId::parse("callback:cache-partial").unwrap(),
            QueueProperty::new(100, 100_000).with_cache(2, 100_000),
        )
        .unwrap();
    queue
        .put(&[entry(5, 1, true), entry(5, 2, true), entry(5, 3, true)], false)
        .unwrap();

    connector.down.store(true, Ordering::SeqCst);
    assert_eq!(ids(&queue.peek(-1, -1).unwrap()), vec![1, 2]);
    assert_eq!(ids(&queue.peek(2, -1).unwrap()), vec![1, 2]);
    assert!(is_unavailable(&queue.peek_lowest(1, -1, None, false)));
    connector.down.store(false, Ordering::SeqCst);
}

// ============================================================================
// Restart
// ============================================================================

fn on_disk(dir: &Path) -> TierQueueConfig {
    TierQueueConfig::default().with_database_path(dir.join("broker").join("queues.db"))
}

fn open(config: &TierQueueConfig, kind: QueueKind, id: &str) -> Queue {
    QueueFactory::from_config(config)
        .unwrap()
        .create(kind, StorageId::parse(id).unwrap(), QueueProperty::new(100, 100_000).with_cache(2, 100_000))
        .unwrap()
}

#[test]
fn test_relational_round_trip_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = on_disk(dir.path());
    {
        let queue = open(&config, QueueKind::Jdbc, "history:restart");
        queue
            .put(&[entry(5, 1, true), entry(9, 2, false), entry(5, 3, true)], false)
            .unwrap();
        queue.shutdown().unwrap();
    }

    let queue = open(&config, QueueKind::Jdbc, "history:restart");
    let entries = queue.peek(-1, -1).unwrap();
    assert_eq!(ids(&entries), vec![2, 1, 3]);
    assert_eq!(entries[1], entry(5, 1, true));
    assert_eq!(queue.num_of_entries(), 3);
    assert_eq!(queue.num_of_bytes(), 48);
    assert_eq!(queue.num_of_persistent_entries(), 2);
}

#[test]
fn test_cache_round_trip_keeps_persistent_only() {
    let dir = tempfile::tempdir().unwrap();
    let config = on_disk(dir.path());
    {
        let queue = open(&config, QueueKind::Cache, "callback:restart");
        queue
            .put(
                &[
                    entry(9, 1, true),
                    entry(7, 2, false),
                    entry(5, 3, true),
                    entry(5, 4, false),
                    entry(3, 5, true),
                ],
                false,
            )
            .unwrap();
        queue.shutdown().unwrap();
    }

    let queue = open(&config, QueueKind::Cache, "callback:restart");
    assert_eq!(ids(&queue.peek(-1, -1).unwrap()), vec![1, 3, 5]);
    assert_eq!(queue.num_of_entries(), 3);
    assert_eq!(queue.num_of_persistent_entries(), 3);
    let Queue::Cache(cache) = &queue else {
        unreachable!("factory returned the wrong tier");
    };
    assert_eq!(cache.hot_counters().num_of_entries, 2);
}

#[test]
fn test_cache_persistent_entries_survive_crash() {
    let dir = tempfile::tempdir().unwrap();
    let config = on_disk(dir.path());
    {
        let queue = open(&config, QueueKind::Cache, "callback:crash");
        queue
            .put(&[entry(5, 1, true), entry(5, 2, true), entry(5, 3, false)], false)
            .unwrap();
        // dropped without shutdown
    }

    let queue = open(&config, QueueKind::Cache, "callback:crash");
    assert_eq!(ids(&queue.peek(-1, -1).unwrap()), vec![1, 2]);
    assert_eq!(queue.num_of_persistent_entries(), 2);
}

#[test]
fn test_destroy_removes_rows() {
    let dir = tempfile::tempdir().unwrap();
    let config = on_disk(dir.path());
    {
        let queue = open(&config, QueueKind::Jdbc, "callback:destroy");
        queue.put_entry(&entry(5, 1, true), false).unwrap();
        queue.destroy().unwrap();
    }
    let queue = open(&config, QueueKind::Jdbc, "callback:destroy");
    assert_eq!(queue.num_of_entries(), 0);
}
