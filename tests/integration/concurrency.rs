//! Concurrency and race condition tests
//!
//! These tests verify thread-safety of the in-memory store:
//! - Concurrent counter increments are never lost
//! - Snapshots never observe half of a batch
//! - Write-through flushes from many tasks leave a valid journal

use std::sync::Arc;
use std::time::Duration;

use tally::storage::{MemoryBackend, MetricUpdate, StorageBackend};
use tempfile::tempdir;

use crate::helpers::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_increments_are_not_lost() {
    let storage = Arc::new(MemoryBackend::new());
    let mut handles = vec![];

    for _ in 0..50 {
        let storage = storage.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..20 {
                storage.set_counter("hits", 1).await.unwrap();
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(storage.get_counter("hits").await.unwrap(), 1000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_snapshots_never_see_partial_batches() {
    let storage = Arc::new(MemoryBackend::new());
    storage
        .update_metrics_batch(vec![
            MetricUpdate::gauge("left", 0.0),
            MetricUpdate::gauge("right", 0.0),
        ])
        .await
        .unwrap();

    let writer = {
        let storage = storage.clone();
        tokio::spawn(async move {
            for i in 1..=500 {
                storage
                    .update_metrics_batch(vec![
                        MetricUpdate::gauge("left", i as f64),
                        MetricUpdate::gauge("right", i as f64),
                    ])
                    .await
                    .unwrap();
            }
        })
    };

    let mut readers = vec![];
    for _ in 0..4 {
        let storage = storage.clone();
        readers.push(tokio::spawn(async move {
            for _ in 0..500 {
                let snapshot = storage.get_all().await.unwrap();
                assert_eq!(snapshot.gauges["left"], snapshot.gauges["right"]);
            }
        }));
    }

    writer.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_write_through_leaves_valid_journal() {
    let temp_dir = tempdir().unwrap();
    let path = journal_path(&temp_dir);
    let storage = open_memory(&path, Duration::ZERO).await;

    let mut handles = vec![];
    for task in 0..10 {
        let storage = storage.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..10 {
                storage
                    .set_gauge(&format!("task{task}"), i as f64)
                    .await
                    .unwrap();
                storage.set_counter("writes", 1).await.unwrap();
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    let on_disk = read_journal(&path).await;
    assert_eq!(on_disk.counters["writes"], 100);
    assert_eq!(on_disk.gauges.len(), 10);
    assert!(on_disk.gauges.values().all(|v| *v == 9.0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_periodic_flush_races_with_writers() {
    let temp_dir = tempdir().unwrap();
    let path = journal_path(&temp_dir);
    let storage = open_memory(&path, Duration::from_millis(5)).await;

    let mut handles = vec![];
    for _ in 0..8 {
        let storage = storage.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..50 {
                storage.set_counter("hits", 1).await.unwrap();
                tokio::task::yield_now().await;
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }
    storage.close().await.unwrap();

    assert_eq!(read_journal(&path).await.counters["hits"], 400);
}
