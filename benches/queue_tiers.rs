//! Benchmarks for the queue tiers.
//!
//! Compares the in-memory, relational and cache tiers on the hot path:
//! - put of a single entry into a populated queue
//! - peek of the head window
//! - put followed by remove of the head entry

// Criterion macros generate items without docs - this is expected for benchmarks
// Benchmarks use expect/unwrap for simplicity - panics are acceptable in benchmarks
#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use tierqueue::storage::sqlite::{ConnectionPool, PoolConfig, QueueTable, SqliteConnector};
use tierqueue::{
    Priority, Queue, QueueEntry, QueueFactory, QueueKind, QueueProperty, QueueStorage, StorageId,
};

// ============================================================================
// Helper Functions
// ============================================================================

const KINDS: [QueueKind; 3] = [QueueKind::Ram, QueueKind::Jdbc, QueueKind::Cache];

/// Creates a queue of `kind` backed by a database file in `temp_dir`.
fn create_queue(temp_dir: &TempDir, kind: QueueKind) -> Queue {
    let connector = SqliteConnector::file(temp_dir.path().join(format!("{kind}.db")));
    let pool = ConnectionPool::new(Arc::new(connector), PoolConfig::default());
    let table = QueueTable::new(pool, QueueTable::DEFAULT_TABLE_NAME)
        .expect("Failed to create queue table");
    let property = QueueProperty::new(1_000_000, 1_000_000_000).with_cache(1000, 10_000_000);
    QueueFactory::new(Arc::new(table))
        .create(kind, StorageId::parse("callback:bench").unwrap(), property)
        .expect("Failed to create queue")
}

fn sample_entry(i: usize) -> QueueEntry {
    let prio = Priority::new(u8::try_from(i % 10).unwrap()).unwrap();
    QueueEntry::new(prio, i % 2 == 0, "publish", vec![0u8; 256])
}

/// Populates the queue with `count` entries of mixed priority.
fn populate(queue: &Queue, count: usize) {
    let entries: Vec<QueueEntry> = (0..count).map(sample_entry).collect();
    queue.put(&entries, false).expect("Failed to populate queue");
}

// ============================================================================
// Benchmarks
// ============================================================================

fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("put");
    group.measurement_time(Duration::from_secs(5));

    for kind in KINDS {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let queue = create_queue(&temp_dir, kind);
        populate(&queue, 1000);

        group.bench_with_input(BenchmarkId::from_parameter(kind), &queue, |b, queue| {
            let mut i = 0;
            b.iter(|| {
                i += 1;
                queue.put_entry(&sample_entry(i), false).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_peek(c: &mut Criterion) {
    let mut group = c.benchmark_group("peek_100");

    for kind in KINDS {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let queue = create_queue(&temp_dir, kind);
        populate(&queue, 2000);

        group.bench_with_input(BenchmarkId::from_parameter(kind), &queue, |b, queue| {
            b.iter(|| black_box(queue.peek(100, -1).unwrap()));
        });
    }

    group.finish();
}

fn bench_put_remove(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_remove");

    for kind in KINDS {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let queue = create_queue(&temp_dir, kind);
        populate(&queue, 1000);

        group.bench_with_input(BenchmarkId::from_parameter(kind), &queue, |b, queue| {
            let mut i = 0;
            b.iter(|| {
                i += 1;
                queue.put_entry(&sample_entry(i), false).unwrap();
                black_box(queue.remove().unwrap())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_put, bench_peek, bench_put_remove);
criterion_main!(benches);
