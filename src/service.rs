//! Metrics service
//!
//! Sits between the HTTP handlers and the storage backend. Handlers pass raw
//! strings and wire metrics; the service parses kinds and values, rejects
//! malformed input and dispatches to the right backend call. Backends only
//! ever see validated names and numbers.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::Metric;
use crate::storage::batch;
use crate::storage::{MetricKind, StorageBackend, StorageError};

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug)]
pub enum ServiceError {
    /// The metric kind is neither `gauge` nor `counter`
    InvalidType(String),

    /// The value is missing or not a number of the right kind
    InvalidValue(String),

    /// The metric name is empty
    EmptyName,

    Storage(StorageError),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::InvalidType(kind) => write!(f, "invalid metric type: {:?}", kind),
            ServiceError::InvalidValue(msg) => write!(f, "invalid metric value: {}", msg),
            ServiceError::EmptyName => write!(f, "metric name is empty"),
            ServiceError::Storage(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServiceError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Storage(err)
    }
}

fn parse_kind(kind: &str) -> ServiceResult<MetricKind> {
    kind.parse()
        .map_err(|_| ServiceError::InvalidType(kind.to_string()))
}

fn check_name(name: &str) -> ServiceResult<()> {
    if name.trim().is_empty() {
        Err(ServiceError::EmptyName)
    } else {
        Ok(())
    }
}

fn parse_gauge(raw: &str) -> ServiceResult<f64> {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(ServiceError::InvalidValue(format!(
            "{:?} is not a finite number",
            raw
        ))),
    }
}

fn parse_counter(raw: &str) -> ServiceResult<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ServiceError::InvalidValue(format!("{:?} is not an integer", raw)))
}

/// Validated access to a storage backend
#[derive(Clone)]
pub struct MetricsService {
    storage: Arc<dyn StorageBackend>,
}

impl MetricsService {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Every metric as `name -> value` text, gauges and counters merged
    ///
    /// A counter shadows a gauge of the same name.
    pub async fn list_metrics(&self) -> ServiceResult<BTreeMap<String, String>> {
        let snapshot = self.storage.get_all().await?;

        let mut listing = BTreeMap::new();
        for (name, value) in snapshot.gauges {
            listing.insert(name, value.to_string());
        }
        for (name, delta) in snapshot.counters {
            listing.insert(name, delta.to_string());
        }

        Ok(listing)
    }

    /// Current value of one metric as text
    pub async fn get_metric(&self, kind: &str, name: &str) -> ServiceResult<String> {
        check_name(name)?;

        let value = match parse_kind(kind)? {
            MetricKind::Gauge => self.storage.get_gauge(name).await?.to_string(),
            MetricKind::Counter => self.storage.get_counter(name).await?.to_string(),
        };

        Ok(value)
    }

    /// Dispatch a plain-text update by kind
    pub async fn update_metric(&self, kind: &str, name: &str, raw: &str) -> ServiceResult<()> {
        match parse_kind(kind)? {
            MetricKind::Gauge => self.update_gauge(name, raw).await,
            MetricKind::Counter => self.update_counter(name, raw).await,
        }
    }

    #[instrument(skip(self))]
    pub async fn update_gauge(&self, name: &str, raw: &str) -> ServiceResult<()> {
        check_name(name)?;
        let value = parse_gauge(raw)?;
        self.storage.set_gauge(name, value).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn update_counter(&self, name: &str, raw: &str) -> ServiceResult<()> {
        check_name(name)?;
        let delta = parse_counter(raw)?;
        self.storage.set_counter(name, delta).await?;
        Ok(())
    }

    /// Apply one JSON update and return the metric with its stored value
    ///
    /// For counters the returned `delta` is the accumulated total.
    pub async fn update_metric_json(&self, metric: Metric) -> ServiceResult<Metric> {
        check_name(&metric.id)?;

        match parse_kind(&metric.mtype)? {
            MetricKind::Gauge => {
                let value = metric
                    .value
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| {
                        ServiceError::InvalidValue("gauge requires a finite value".into())
                    })?;
                self.storage.set_gauge(&metric.id, value).await?;
            }
            MetricKind::Counter => {
                let delta = metric
                    .delta
                    .ok_or_else(|| ServiceError::InvalidValue("counter requires a delta".into()))?;
                self.storage.set_counter(&metric.id, delta).await?;
            }
        }

        self.get_metric_json(metric).await
    }

    /// Fill in the stored value of the requested metric
    pub async fn get_metric_json(&self, metric: Metric) -> ServiceResult<Metric> {
        check_name(&metric.id)?;

        let found = match parse_kind(&metric.mtype)? {
            MetricKind::Gauge => {
                let value = self.storage.get_gauge(&metric.id).await?;
                Metric::gauge(metric.id, value)
            }
            MetricKind::Counter => {
                let delta = self.storage.get_counter(&metric.id).await?;
                Metric::counter(metric.id, delta)
            }
        };

        Ok(found)
    }

    /// Apply the well-formed items of a batch atomically
    ///
    /// Malformed items are dropped silently. Returns how many were applied.
    #[instrument(skip(self, metrics), fields(count = metrics.len()))]
    pub async fn update_metrics_batch(&self, metrics: Vec<Metric>) -> ServiceResult<usize> {
        let updates = batch::reconcile(metrics);

        let applied = updates.len();
        if applied == 0 {
            debug!("batch contained no valid metrics");
            return Ok(0);
        }

        self.storage.update_metrics_batch(updates).await?;
        Ok(applied)
    }

    pub async fn ping(&self) -> ServiceResult<()> {
        self.storage.ping().await?;
        Ok(())
    }
}
