//! Queue inspection and maintenance commands.
//!
//! Every command works on the persistent store only; queues are opened as
//! relational queues and shut down again afterwards.

use anyhow::{Context, Result};
use tierqueue::{QueueEntry, QueueFactory, QueueKind, QueueStorage, StorageId};

fn open_queue(factory: &QueueFactory, storage_id: &str) -> Result<tierqueue::Queue> {
    let storage_id = StorageId::parse(storage_id)
        .with_context(|| format!("invalid storage id '{storage_id}'"))?;
    factory
        .create_default(QueueKind::Jdbc, storage_id.clone())
        .with_context(|| format!("failed to open queue '{storage_id}'"))
}

/// Lists every queue with rows in the store.
pub fn cmd_queues(factory: &QueueFactory) -> Result<()> {
    let queues = factory
        .table()
        .queue_names()
        .context("failed to list queues")?;

    if queues.is_empty() {
        println!("No queues in {}", factory.table().pool().describe());
        return Ok(());
    }

    println!("{:<48} {:>10} {:>12} {:>10}", "QUEUE", "ENTRIES", "BYTES", "PERSISTENT");
    for (name, counters) in queues {
        println!(
            "{:<48} {:>10} {:>12} {:>10}",
            name, counters.num_of_entries, counters.num_of_bytes, counters.num_of_persistent_entries
        );
    }
    Ok(())
}

/// Shows the counters of one queue.
pub fn cmd_stats(factory: &QueueFactory, storage_id: &str) -> Result<()> {
    let queue = open_queue(factory, storage_id)?;
    let counters = queue.counters();
    let first = queue.peek_first().context("failed to read queue head")?;

    println!("Queue: {}", queue.storage_id());
    println!("  Entries:            {}", counters.num_of_entries);
    println!("  Bytes:              {}", counters.num_of_bytes);
    println!("  Persistent entries: {}", counters.num_of_persistent_entries);
    println!("  Persistent bytes:   {}", counters.num_of_persistent_bytes);
    if let Some(entry) = first {
        println!("  Head:               {}", describe_entry(&entry));
    }

    queue.shutdown()?;
    Ok(())
}

/// Prints the first entries of one queue.
pub fn cmd_peek(factory: &QueueFactory, storage_id: &str, num: i64, bytes: i64, json: bool) -> Result<()> {
    let queue = open_queue(factory, storage_id)?;
    let entries = queue.peek(num, bytes).context("failed to peek")?;

    if json {
        let values: Vec<serde_json::Value> = entries.iter().map(entry_json).collect();
        println!("{}", serde_json::to_string_pretty(&values)?);
    } else if entries.is_empty() {
        println!("Queue '{}' is empty", queue.storage_id());
    } else {
        for entry in &entries {
            println!("{}", describe_entry(entry));
        }
    }

    queue.shutdown()?;
    Ok(())
}

/// Removes every transient entry of one queue.
pub fn cmd_purge_transient(factory: &QueueFactory, storage_id: &str) -> Result<()> {
    let queue = open_queue(factory, storage_id)?;
    let removed = queue
        .remove_transient()
        .context("failed to remove transient entries")?;
    println!("Removed {removed} transient entries from '{}'", queue.storage_id());
    queue.shutdown()?;
    Ok(())
}

/// Removes every entry of one queue.
pub fn cmd_clear(factory: &QueueFactory, storage_id: &str) -> Result<()> {
    let queue = open_queue(factory, storage_id)?;
    let removed = queue.clear().context("failed to clear queue")?;
    println!("Removed {removed} entries from '{}'", queue.storage_id());
    queue.shutdown()?;
    Ok(())
}

/// Checks that the store is reachable.
pub fn cmd_ping(factory: &QueueFactory) -> Result<()> {
    let target = factory.table().pool().describe();
    factory
        .table()
        .ping()
        .with_context(|| format!("{target} is unreachable"))?;
    println!("ok: {target}");
    Ok(())
}

fn describe_entry(entry: &QueueEntry) -> String {
    let created = entry
        .created_at()
        .map_or_else(|| "-".to_string(), |at| at.to_rfc3339());
    format!(
        "#{} prio={} bytes={} {} type={} created={}",
        entry.unique_id,
        entry.priority,
        entry.size_in_bytes,
        if entry.persistent { "persistent" } else { "transient" },
        entry.payload.type_tag,
        created
    )
}

fn entry_json(entry: &QueueEntry) -> serde_json::Value {
    serde_json::json!({
        "unique_id": entry.unique_id,
        "priority": entry.priority.value(),
        "size_in_bytes": entry.size_in_bytes,
        "persistent": entry.persistent,
        "type_tag": entry.payload.type_tag,
        "payload_len": entry.payload.bytes.len(),
        "created_at": entry.created_at().map(|at| at.to_rfc3339()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tierqueue::Priority;
    use tierqueue::storage::sqlite::{ConnectionPool, PoolConfig, QueueTable, SqliteConnector};

    fn factory() -> QueueFactory {
        let pool = ConnectionPool::new(
            Arc::new(SqliteConnector::in_memory().unwrap()),
            PoolConfig::default(),
        );
        QueueFactory::new(Arc::new(
            QueueTable::new(pool, QueueTable::DEFAULT_TABLE_NAME).unwrap(),
        ))
    }

    fn seed(factory: &QueueFactory) {
        let queue = open_queue(factory, "callback:client/joe/1").unwrap();
        queue
            .put(
                &[
                    QueueEntry::new(Priority::HIGH, true, "publish", b"abc".to_vec()).with_unique_id(1),
                    QueueEntry::new(Priority::NORM, false, "publish", b"de".to_vec()).with_unique_id(2),
                ],
                false,
            )
            .unwrap();
        queue.shutdown().unwrap();
    }

    #[test]
    fn test_describe_entry() {
        let entry = QueueEntry::new(Priority::HIGH, false, "publish", b"abc".to_vec()).with_unique_id(42);
        let line = describe_entry(&entry);
        assert!(line.starts_with("#42 prio=7 bytes=3 transient type=publish"));
    }

    #[test]
    fn test_entry_json() {
        let entry = QueueEntry::new(Priority::MAX, true, "update", b"x".to_vec()).with_unique_id(7);
        let value = entry_json(&entry);
        assert_eq!(value["unique_id"], 7);
        assert_eq!(value["priority"], 9);
        assert_eq!(value["persistent"], true);
        assert_eq!(value["payload_len"], 1);
    }

    #[test]
    fn test_invalid_storage_id_rejected() {
        let factory = factory();
        assert!(cmd_stats(&factory, "no-separator").is_err());
    }

    #[test]
    fn test_purge_and_clear() {
        let factory = factory();
        seed(&factory);
        cmd_peek(&factory, "callback:client/joe/1", -1, -1, true).unwrap();
        cmd_purge_transient(&factory, "callback:client/joe/1").unwrap();

        let queue = open_queue(&factory, "callback:client/joe/1").unwrap();
        assert_eq!(queue.entry_references().unwrap(), vec![1]);
        queue.shutdown().unwrap();

        cmd_clear(&factory, "callback:client/joe/1").unwrap();
        cmd_queues(&factory).unwrap();
        cmd_ping(&factory).unwrap();
        let queue = open_queue(&factory, "callback:client/joe/1").unwrap();
        assert_eq!(queue.num_of_entries(), 0);
    }
}
