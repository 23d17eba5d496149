//! Storage backend trait definition
//!
//! This module defines the core `StorageBackend` trait that both the
//! in-memory and the relational implementation satisfy. The HTTP layer and
//! the service only ever see an `Arc<dyn StorageBackend>` chosen at startup.

use async_trait::async_trait;

use super::error::StorageResult;
use super::schema::{MetricUpdate, MetricsSnapshot};

/// Trait for metric storage backends
///
/// Implementations must enforce the same invariants:
///
/// - exactly one value per `(name, kind)`
/// - gauges are last-write-wins, counters add every delta to the stored value
/// - `get_all` returns a copy that reflects a single instant
/// - `update_metrics_batch` is all-or-nothing
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they are shared across request
/// handlers running on different tasks.
///
/// ## Error Handling
///
/// Reads of absent metrics return `StorageError::NotFound`, never a zero
/// value. Backends that depend on an external service report
/// `StorageError::NotConnected` when it is unavailable.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short backend name for logs and health output
    fn name(&self) -> &'static str;

    /// Replace the value of gauge `name`
    async fn set_gauge(&self, name: &str, value: f64) -> StorageResult<()>;

    /// Current value of gauge `name`
    async fn get_gauge(&self, name: &str) -> StorageResult<f64>;

    /// Add `delta` to counter `name`, creating it at zero if absent
    async fn set_counter(&self, name: &str, delta: i64) -> StorageResult<()>;

    /// Current value of counter `name`
    async fn get_counter(&self, name: &str) -> StorageResult<i64>;

    /// Independent copy of every gauge and counter
    async fn get_all(&self) -> StorageResult<MetricsSnapshot>;

    /// Apply a batch of updates atomically
    ///
    /// Gauge updates replace, counter updates accumulate, in batch order.
    /// Either every update is applied or none is. An empty batch succeeds
    /// without touching the backend.
    async fn update_metrics_batch(&self, updates: Vec<MetricUpdate>) -> StorageResult<()>;

    /// Liveness check
    async fn ping(&self) -> StorageResult<()>;

    /// Release resources and flush pending state
    async fn close(&self) -> StorageResult<()>;
}
