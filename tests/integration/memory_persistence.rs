//! Integration tests for the journaled in-memory store
//!
//! These tests verify that:
//! - State survives a close and reopen through the journal
//! - Write-through mode persists before each call returns
//! - Periodic mode only persists on its timer and on close
//! - A malformed journal stops the store from opening

use std::path::PathBuf;
use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use tally::config::StorageConfig;
use tally::storage::{MetricUpdate, StorageBackend, StorageError};
use tempfile::tempdir;

use crate::helpers::*;

#[tokio::test]
async fn test_round_trip_through_config() {
    let temp_dir = tempdir().unwrap();
    let config = StorageConfig::Memory {
        path: Some(journal_path(&temp_dir)),
        store_interval_secs: 300,
        restore: true,
    };

    let storage = config.open().await.unwrap();
    for i in 0..25 {
        storage.set_gauge(&format!("gauge{i}"), i as f64 / 4.0).await.unwrap();
        storage.set_counter(&format!("counter{i}"), i * 3).await.unwrap();
        storage.set_counter(&format!("counter{i}"), 1).await.unwrap();
    }
    let before = storage.get_all().await.unwrap();
    storage.close().await.unwrap();

    let reopened = config.open().await.unwrap();
    let after = reopened.get_all().await.unwrap();
    reopened.close().await.unwrap();

    assert_eq!(after, before);
    assert_eq!(after.counters["counter7"], 22);
}

#[tokio::test]
async fn test_write_through_is_visible_before_return() {
    let temp_dir = tempdir().unwrap();
    let path = journal_path(&temp_dir);
    let storage = open_memory(&path, Duration::ZERO).await;

    storage.set_counter("hits", 10).await.unwrap();
    assert_eq!(read_journal(&path).await.counters["hits"], 10);

    storage.set_counter("hits", 5).await.unwrap();
    assert_eq!(read_journal(&path).await.counters["hits"], 15);

    storage
        .update_metrics_batch(vec![
            MetricUpdate::gauge("temp", 1.5),
            MetricUpdate::counter("hits", 1),
        ])
        .await
        .unwrap();

    let on_disk = read_journal(&path).await;
    assert_eq!(on_disk.gauges["temp"], 1.5);
    assert_eq!(on_disk.counters["hits"], 16);
}

#[tokio::test]
async fn test_close_flushes_periodic_store() {
    let temp_dir = tempdir().unwrap();
    let path = journal_path(&temp_dir);
    let storage = open_memory(&path, Duration::from_secs(3600)).await;

    storage.set_gauge("temp", 21.0).await.unwrap();
    assert!(!path.exists());

    storage.close().await.unwrap();
    assert_eq!(read_journal(&path).await.gauges["temp"], 21.0);

    // A second close only flushes again
    storage.set_gauge("temp", 22.0).await.unwrap();
    storage.close().await.unwrap();
    assert_eq!(read_journal(&path).await.gauges["temp"], 22.0);
}

#[tokio::test]
async fn test_hydration_replaces_initial_state() {
    let temp_dir = tempdir().unwrap();
    let path = journal_path(&temp_dir);
    tokio::fs::write(
        &path,
        r#"{
  "gauges": {
    "Alloc": 1024.5
  },
  "counters": {
    "PollCount": 42
  }
}"#,
    )
    .await
    .unwrap();

    let storage = open_memory(&path, Duration::ZERO).await;

    assert_eq!(storage.get_gauge("Alloc").await.unwrap(), 1024.5);
    assert_eq!(storage.get_counter("PollCount").await.unwrap(), 42);

    storage.set_counter("PollCount", 1).await.unwrap();
    assert_eq!(read_journal(&path).await.counters["PollCount"], 43);
}

#[tokio::test]
async fn test_journal_with_one_section_loads() {
    let temp_dir = tempdir().unwrap();
    let path = journal_path(&temp_dir);
    tokio::fs::write(&path, r#"{"counters": {"hits": 3}}"#)
        .await
        .unwrap();

    let storage = open_memory(&path, Duration::ZERO).await;

    assert_eq!(storage.get_counter("hits").await.unwrap(), 3);
    assert!(storage.get_all().await.unwrap().gauges.is_empty());
}

#[tokio::test]
async fn test_malformed_journal_is_fatal() {
    let temp_dir = tempdir().unwrap();
    let path = journal_path(&temp_dir);
    tokio::fs::write(&path, r#"{"gauges": {"temp": "hot"}}"#)
        .await
        .unwrap();

    let config = StorageConfig::Memory {
        path: Some(path),
        store_interval_secs: 0,
        restore: true,
    };

    assert_matches!(
        config.open().await.err(),
        Some(StorageError::SerializationError(_))
    );
}

#[tokio::test]
async fn test_no_journal_path_is_volatile() {
    let config = StorageConfig::Memory {
        path: Some(PathBuf::new()),
        store_interval_secs: 0,
        restore: true,
    };

    let storage = config.open().await.unwrap();
    storage.set_counter("hits", 1).await.unwrap();
    storage.close().await.unwrap();

    let reopened = config.open().await.unwrap();
    assert!(reopened.get_all().await.unwrap().is_empty());
}
