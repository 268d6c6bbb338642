//! Measurements API client

use super::{base_url, MetricsSink};
use crate::config::MetricsApiConfig;
use crate::health::{components, HealthRegistry};
use crate::models::{Aggregate, MeasurementBatch, MetricDefinition, MetricUnit};
use crate::observability::PollerMetrics;
use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, warn};
use url::Url;

/// Body of `PUT v1/metrics/{name}`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MetricUpdate<'a> {
    name: &'a str,
    description: &'a str,
    display_name: &'a str,
    display_name_short: &'a str,
    unit: MetricUnit,
    default_aggregate: Aggregate,
    #[serde(rename = "defaultResolutionMS")]
    default_resolution_ms: u64,
    is_disabled: bool,
}

struct Inner {
    client: Client,
    base_url: Url,
    user: String,
    token: String,
    metrics: PollerMetrics,
    health: Option<HealthRegistry>,
}

/// Client for the measurements API
///
/// Publishing spawns the request on the runtime the client was created on,
/// so [`MetricsSink::publish`] may be called from blocking threads.
#[derive(Clone)]
pub struct MetricsClient {
    inner: Arc<Inner>,
    runtime: Handle,
}

impl MetricsClient {
    /// Create a client; must be called from within a tokio runtime
    ///
    /// When `health` is given, publish outcomes are reported on its
    /// `metrics_sink` component.
    pub fn new(
        config: &MetricsApiConfig,
        timeout: Duration,
        health: Option<HealthRegistry>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let runtime = Handle::try_current().context("Metrics client requires a tokio runtime")?;

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                base_url: base_url(&config.base_url).context("Invalid metrics API URL")?,
                user: config.user.clone(),
                token: config.token.clone(),
                metrics: PollerMetrics::new(),
                health,
            }),
            runtime,
        })
    }

    /// Create or update a metric definition
    pub async fn upsert_metric_definition(
        &self,
        definition: &MetricDefinition,
        resolution_ms: u64,
    ) -> Result<()> {
        let url = self
            .inner
            .base_url
            .join(&format!("v1/metrics/{}", definition.name))
            .context("Invalid metric name")?;

        let body = MetricUpdate {
            name: &definition.name,
            description: &definition.description,
            display_name: &definition.display_name,
            display_name_short: &definition.display_name_short,
            unit: definition.unit,
            default_aggregate: definition.default_aggregate,
            default_resolution_ms: resolution_ms,
            is_disabled: false,
        };

        let response = self
            .inner
            .client
            .put(url)
            .basic_auth(&self.inner.user, Some(&self.inner.token))
            .json(&body)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "Metrics API error ({}) registering {}: {}",
                status,
                definition.name,
                body
            );
        }

        debug!(metric = %definition.name, "Metric definition registered");
        Ok(())
    }

    /// Append the measurements of one batch
    pub async fn send_measurements(&self, batch: &MeasurementBatch) -> Result<()> {
        self.inner.send_measurements(batch).await
    }
}

impl Inner {
    async fn send_measurements(&self, batch: &MeasurementBatch) -> Result<()> {
        let url = self
            .base_url
            .join("v1/measurements")
            .context("Invalid path")?;

        let response = self
            .client
            .post(url)
            .basic_auth(&self.user, Some(&self.token))
            .json(&measurements_payload(batch))
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Metrics API error ({}): {}", status, body);
        }

        Ok(())
    }
}

/// `[[source, metric, value, timestamp_ms], ...]`
fn measurements_payload(batch: &MeasurementBatch) -> Vec<Value> {
    let timestamp = batch.timestamp.timestamp_millis();
    batch
        .measurements()
        .map(|(source, metric, value)| serde_json::json!([source, metric, value, timestamp]))
        .collect()
}

impl MetricsSink for MetricsClient {
    fn publish(&self, batch: MeasurementBatch) {
        let inner = Arc::clone(&self.inner);

        self.runtime.spawn(async move {
            match inner.send_measurements(&batch).await {
                Ok(()) => {
                    debug!(source = %batch.source, measurements = batch.len(), "Measurements published");
                    if let Some(health) = &inner.health {
                        health.set_healthy(components::METRICS_SINK).await;
                    }
                }
                Err(e) => {
                    warn!(source = %batch.source, error = %e, "Failed to publish measurements");
                    inner.metrics.inc_publish_errors();
                    if let Some(health) = &inner.health {
                        health
                            .set_degraded(components::METRICS_SINK, e.to_string())
                            .await;
                    }
                }
            }
        });
    }
}
