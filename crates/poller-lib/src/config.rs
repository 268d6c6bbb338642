//! Poller configuration
//!
//! Read from an optional file (YAML, TOML or JSON, chosen by extension) and
//! overlaid with `IPMI_POLLER_*` environment variables, nested keys separated
//! by `__` (e.g. `IPMI_POLLER_METRICS__TOKEN`).

use crate::ipmi::{IpmitoolConfig, SensorNumber};
use crate::models::{
    normalize_metric_name, Aggregate, MetricDefinition, MetricUnit, MonitoredEntity, SensorSpec,
    DEFAULT_IPMI_PORT,
};
use anyhow::{bail, ensure, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::time::Duration;

pub const ENV_PREFIX: &str = "IPMI_POLLER";

const MIN_POLL_INTERVAL_SECS: u64 = 1;
const MAX_POLL_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Poller configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PollerConfig {
    /// Seconds between two polls of the same host
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Organization owning the meters
    pub org_id: String,

    pub metrics: MetricsApiConfig,

    pub meter_manager: MeterManagerConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub ipmitool: IpmitoolConfig,

    pub monitored_entities: Vec<EntityConfig>,
}

fn default_poll_interval() -> u64 {
    5
}

fn default_api_port() -> u16 {
    9780
}

fn default_metrics_url() -> String {
    "https://metrics-api.boundary.com".to_string()
}

fn default_meter_manager_url() -> String {
    "https://api.boundary.com".to_string()
}

fn default_http_timeout() -> u64 {
    30
}

fn default_ipmi_port() -> u16 {
    DEFAULT_IPMI_PORT
}

/// Measurements API endpoint and credentials
#[derive(Clone, Deserialize)]
pub struct MetricsApiConfig {
    #[serde(default = "default_metrics_url")]
    pub base_url: String,
    pub user: String,
    pub token: String,
}

impl fmt::Debug for MetricsApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsApiConfig")
            .field("base_url", &self.base_url)
            .field("user", &self.user)
            .finish()
    }
}

/// Meter manager endpoint and credentials
#[derive(Clone, Deserialize)]
pub struct MeterManagerConfig {
    #[serde(default = "default_meter_manager_url")]
    pub base_url: String,
    pub api_key: String,
}

impl fmt::Debug for MeterManagerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeterManagerConfig")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout(),
        }
    }
}

/// One monitored host
#[derive(Clone, Deserialize)]
pub struct EntityConfig {
    pub host: String,
    #[serde(default = "default_ipmi_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Existing meter to report under; a meter named after the host is used otherwise
    #[serde(default)]
    pub meter_id: Option<String>,
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,
}

impl fmt::Debug for EntityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("meter_id", &self.meter_id)
            .field("sensors", &self.sensors)
            .finish()
    }
}

/// One sensor of a monitored host
#[derive(Debug, Clone, Deserialize)]
pub struct SensorConfig {
    /// IPMI sensor number
    pub sensor_id: u32,
    pub metric: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub display_name_short: Option<String>,
    #[serde(default)]
    pub unit: MetricUnit,
    #[serde(default)]
    pub default_aggregate: Aggregate,
    /// Report this sensor under another source
    #[serde(default)]
    pub source: Option<String>,
}

impl SensorConfig {
    pub fn metric_definition(&self) -> MetricDefinition {
        let name = normalize_metric_name(&self.metric);
        MetricDefinition {
            description: self.description.clone().unwrap_or_default(),
            display_name: self.display_name.clone().unwrap_or_else(|| name.clone()),
            display_name_short: self
                .display_name_short
                .clone()
                .unwrap_or_else(|| name.clone()),
            unit: self.unit,
            default_aggregate: self.default_aggregate,
            name,
        }
    }
}

impl EntityConfig {
    /// Build the immutable entity once its source identity is known
    pub fn to_entity(&self, source: impl Into<String>) -> Result<MonitoredEntity> {
        let mut sensors = BTreeMap::new();
        for sensor in &self.sensors {
            let sensor_number = SensorNumber::try_from(sensor.sensor_id).with_context(|| {
                format!("sensor {} of {} is not a valid sensor number", sensor.sensor_id, self.host)
            })?;
            sensors.insert(
                sensor_number,
                SensorSpec {
                    metric: sensor.metric_definition(),
                    source_override: sensor.source.clone(),
                },
            );
        }

        Ok(MonitoredEntity {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            source: source.into(),
            sensors,
        })
    }
}

impl PollerConfig {
    /// Load configuration from a file and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Load configuration, reading environment overrides from `env` when given
    pub fn load_with_env(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let environment = config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .source(env);

        let config: PollerConfig = builder
            .add_source(environment)
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            (MIN_POLL_INTERVAL_SECS..=MAX_POLL_INTERVAL_SECS).contains(&self.poll_interval_secs),
            "poll_interval_secs must be between {} and {}, got {}",
            MIN_POLL_INTERVAL_SECS,
            MAX_POLL_INTERVAL_SECS,
            self.poll_interval_secs
        );
        ensure!(!self.org_id.trim().is_empty(), "org_id must not be empty");
        ensure!(
            !self.meter_manager.api_key.trim().is_empty(),
            "meter_manager.api_key must not be empty"
        );
        ensure!(
            !self.monitored_entities.is_empty(),
            "at least one monitored entity is required"
        );

        for entity in &self.monitored_entities {
            ensure!(!entity.host.trim().is_empty(), "monitored entity without host");
            ensure!(
                !entity.sensors.is_empty(),
                "monitored entity {} has no sensors",
                entity.host
            );

            let mut seen = HashSet::new();
            let mut metrics = HashSet::new();
            for sensor in &entity.sensors {
                if sensor.sensor_id > u8::MAX as u32 {
                    bail!(
                        "sensor_id {} of {} is out of range (0-255)",
                        sensor.sensor_id,
                        entity.host
                    );
                }
                if !seen.insert(sensor.sensor_id) {
                    bail!(
                        "sensor_id {} is declared twice for {}",
                        sensor.sensor_id,
                        entity.host
                    );
                }
                let metric = normalize_metric_name(&sensor.metric);
                if metric.is_empty() {
                    bail!(
                        "metric name {:?} of {} sensor {} is empty after normalization",
                        sensor.metric,
                        entity.host,
                        sensor.sensor_id
                    );
                }
                if !metrics.insert(metric) {
                    bail!(
                        "metric name {:?} of {} sensor {} collides with another sensor after normalization",
                        sensor.metric,
                        entity.host,
                        sensor.sensor_id
                    );
                }
            }
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }

    /// Distinct metric definitions over all entities, first declaration wins
    pub fn metric_definitions(&self) -> Vec<MetricDefinition> {
        let mut seen = HashSet::new();
        self.monitored_entities
            .iter()
            .flat_map(|entity| &entity.sensors)
            .map(SensorConfig::metric_definition)
            .filter(|definition| seen.insert(definition.name.clone()))
            .collect()
    }
}
