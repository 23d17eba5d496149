//! Batch reconciliation
//!
//! Incoming batches are heterogeneous lists of wire metrics. Before anything
//! reaches a backend, items that cannot be applied are dropped:
//!
//! - blank name or empty kind
//! - unknown kind
//! - gauge without `value`, counter without `delta`
//! - gauge whose value is NaN or infinite
//!
//! What remains is a list of [`MetricUpdate`]s, which every backend applies
//! all-or-nothing. A malformed item is thus silently absent on both backends
//! while the valid items in the same batch still apply.

use tracing::trace;

use crate::Metric;

use super::schema::{MetricKind, MetricUpdate};

/// Convert a wire metric into an update, or `None` if it is malformed
pub fn validate(metric: Metric) -> Option<MetricUpdate> {
    if metric.id.trim().is_empty() || metric.mtype.is_empty() {
        return None;
    }

    match metric.mtype.parse::<MetricKind>().ok()? {
        MetricKind::Gauge => metric
            .value
            .filter(|v| v.is_finite())
            .map(|value| MetricUpdate::Gauge {
                name: metric.id,
                value,
            }),
        MetricKind::Counter => metric.delta.map(|delta| MetricUpdate::Counter {
            name: metric.id,
            delta,
        }),
    }
}

/// Keep the valid items of a batch, in their original order
pub fn reconcile(metrics: Vec<Metric>) -> Vec<MetricUpdate> {
    let total = metrics.len();
    let updates: Vec<MetricUpdate> = metrics.into_iter().filter_map(validate).collect();

    if updates.len() < total {
        trace!(
            "dropped {} malformed metrics from batch of {}",
            total - updates.len(),
            total
        );
    }

    updates
}
