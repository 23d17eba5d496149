pub mod agent;
pub mod config;
pub mod service;
pub mod signing;
pub mod storage;

#[cfg(feature = "api")]
pub mod api;

use serde::{Deserialize, Serialize};

/// A metric as it travels between agent and server
///
/// Gauges carry `value`, counters carry `delta`. Which field is meaningful
/// depends on `mtype`, so both are optional on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub id: String,

    #[serde(rename = "type")]
    pub mtype: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl Metric {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            mtype: storage::MetricKind::Gauge.to_string(),
            delta: None,
            value: Some(value),
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            mtype: storage::MetricKind::Counter.to_string(),
            delta: Some(delta),
            value: None,
        }
    }

    /// A lookup request carrying only name and kind
    pub fn query(id: impl Into<String>, mtype: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            mtype: mtype.into(),
            delta: None,
            value: None,
        }
    }
}
