//! Storage backends for gauges and counters
//!
//! This module provides a trait-based abstraction over where metric values
//! live. The server picks one backend at startup and shares it as an
//! `Arc<dyn StorageBackend>`.
//!
//! ## Backends
//!
//! - **Memory** (default): maps in process memory, optionally journaled to a
//!   JSON file either on every write or on a fixed interval
//! - **PostgreSQL** (feature `storage-postgres`): one `metrics` table,
//!   lazily connected, with reconnect and retry on connection failures
//!
//! ## Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use tally::storage::{JournalConfig, MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = MemoryBackend::open(JournalConfig {
//!         path: Some("./metrics.json".into()),
//!         store_interval: Duration::from_secs(300),
//!         restore: true,
//!     })
//!     .await?;
//!
//!     backend.set_counter("PollCount", 1).await?;
//!     backend.close().await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod batch;
pub mod error;
pub mod memory;
#[cfg(feature = "storage-postgres")]
pub mod postgres;
pub mod retry;
pub mod schema;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use memory::{JournalConfig, MemoryBackend};
#[cfg(feature = "storage-postgres")]
pub use postgres::PostgresBackend;
pub use retry::{RetryPolicy, with_retry};
pub use schema::{MetricKind, MetricUpdate, MetricsSnapshot};
