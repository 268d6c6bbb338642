//! Core data models for the IPMI poller

use crate::ipmi::{SensorNumber, SessionTarget};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Default RMCP+ port of a BMC
pub const DEFAULT_IPMI_PORT: u16 = 623;

/// Unit of a metric as understood by the metrics backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricUnit {
    Percent,
    #[default]
    Number,
    Bytecount,
    Duration,
}

/// Aggregate the backend applies when downsampling
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    #[default]
    Avg,
    Sum,
    Min,
    Max,
}

/// Metric registered with the backend before any measurement is sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub name: String,
    pub description: String,
    pub display_name: String,
    pub display_name_short: String,
    pub unit: MetricUnit,
    pub default_aggregate: Aggregate,
}

/// Operator declared interest in one sensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorSpec {
    pub metric: MetricDefinition,
    /// Source to report this sensor under instead of the entity's
    pub source_override: Option<String>,
}

/// One managed host and the sensors polled from it
#[derive(Clone)]
pub struct MonitoredEntity {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Backend identity measurements are reported under
    pub source: String,
    pub sensors: BTreeMap<SensorNumber, SensorSpec>,
}

impl MonitoredEntity {
    pub fn session_target(&self) -> SessionTarget {
        SessionTarget {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }

    pub fn sensor(&self, sensor_number: SensorNumber) -> Option<&SensorSpec> {
        self.sensors.get(&sensor_number)
    }
}

impl fmt::Debug for MonitoredEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitoredEntity")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("source", &self.source)
            .field("sensors", &self.sensors)
            .finish()
    }
}

/// Measurements of one poll pass, sharing a source and a timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementBatch {
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub values: BTreeMap<String, f64>,
    pub source_overrides: BTreeMap<String, String>,
}

impl MeasurementBatch {
    pub fn new(source: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            source: source.into(),
            timestamp,
            values: BTreeMap::new(),
            source_overrides: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, metric: &str, value: f64, source_override: Option<&str>) {
        self.values.insert(metric.to_string(), value);
        if let Some(source) = source_override {
            self.source_overrides
                .insert(metric.to_string(), source.to_string());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn source_for(&self, metric: &str) -> &str {
        self.source_overrides
            .get(metric)
            .map(String::as_str)
            .unwrap_or(&self.source)
    }

    /// `(source, metric, value)` for every measurement
    pub fn measurements(&self) -> impl Iterator<Item = (&str, &str, f64)> + '_ {
        self.values
            .iter()
            .map(|(metric, value)| (self.source_for(metric), metric.as_str(), *value))
    }
}

/// Normalize a metric name to `[A-Za-z0-9_]`
///
/// Whitespace and dots become underscores, anything else outside the
/// allowed set is dropped.
pub fn normalize_metric_name(name: &str) -> String {
    name.trim()
        .chars()
        .filter_map(|c| match c {
            c if c.is_whitespace() || c == '.' => Some('_'),
            c if c.is_ascii_alphanumeric() || c == '_' => Some(c),
            _ => None,
        })
        .collect()
}
