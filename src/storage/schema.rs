//! Metric data model shared by every storage backend
//!
//! A metric is identified by the pair `(name, kind)`. The two kinds live in
//! separate namespaces, so `"load"` may exist both as a gauge and as a counter
//! without either one affecting the other.
//!
//! ## Semantics
//!
//! - **Gauge**: `f64`, each write replaces the stored value (last write wins)
//! - **Counter**: `i64`, each write is a delta added to the stored value,
//!   starting from zero when the counter does not exist yet

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{StorageError, StorageResult};

/// Kind of a metric, part of its identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Last-write-wins floating point value
    Gauge,

    /// Monotonically accumulating integer
    Counter,
}

impl MetricKind {
    /// The string stored in the `kind` column and used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown metric kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownKind(pub String);

impl std::fmt::Display for UnknownKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown metric kind: {:?}", self.0)
    }
}

impl std::error::Error for UnknownKind {}

impl FromStr for MetricKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}

/// A single validated update, as accepted by `update_metrics_batch`
///
/// Unlike the wire type [`crate::Metric`], an update cannot be malformed:
/// a gauge always carries a value and a counter always carries a delta.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricUpdate {
    /// Replace the gauge `name` with `value`
    Gauge { name: String, value: f64 },

    /// Add `delta` to the counter `name`
    Counter { name: String, delta: i64 },
}

impl MetricUpdate {
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        MetricUpdate::Gauge {
            name: name.into(),
            value,
        }
    }

    pub fn counter(name: impl Into<String>, delta: i64) -> Self {
        MetricUpdate::Counter {
            name: name.into(),
            delta,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            MetricUpdate::Gauge { name, .. } | MetricUpdate::Counter { name, .. } => name,
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            MetricUpdate::Gauge { .. } => MetricKind::Gauge,
            MetricUpdate::Counter { .. } => MetricKind::Counter,
        }
    }
}

/// Point-in-time copy of every stored metric
///
/// This is both the result of `get_all` and the on-disk journal format of the
/// in-memory backend:
///
/// ```json
/// {
///   "gauges": { "Alloc": 1024.5 },
///   "counters": { "PollCount": 42 }
/// }
/// ```
///
/// A snapshot never aliases backend state; mutating it has no effect on the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    #[serde(default)]
    pub gauges: BTreeMap<String, f64>,

    #[serde(default)]
    pub counters: BTreeMap<String, i64>,
}

impl MetricsSnapshot {
    /// Apply a single update with gauge-replace / counter-accumulate semantics
    ///
    /// A counter whose sum leaves the `i64` range is rejected and left
    /// unchanged.
    pub fn apply(&mut self, update: MetricUpdate) -> StorageResult<()> {
        match update {
            MetricUpdate::Gauge { name, value } => {
                self.gauges.insert(name, value);
            }
            MetricUpdate::Counter { name, delta } => {
                let current = self.counters.get(&name).copied().unwrap_or(0);
                let total = current.checked_add(delta).ok_or_else(|| {
                    StorageError::OutOfRange(format!("counter {} overflows i64", name))
                })?;
                self.counters.insert(name, total);
            }
        }
        Ok(())
    }

    /// Apply every update or none of them
    pub fn apply_all(
        &mut self,
        updates: impl IntoIterator<Item = MetricUpdate>,
    ) -> StorageResult<()> {
        let mut next = self.clone();
        for update in updates {
            next.apply(update)?;
        }
        *self = next;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.gauges.len() + self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty() && self.counters.is_empty()
    }
}
