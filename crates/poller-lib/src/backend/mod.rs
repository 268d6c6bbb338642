//! Clients of the metrics backend
//!
//! - [`MetricsClient`] registers metric definitions and appends measurements
//! - [`MeterManagerClient`] resolves the source identity of a host

mod meter_client;
mod metrics_client;

pub use meter_client::{CreateMeter, MeterManagerClient, MeterMetadata};
pub use metrics_client::MetricsClient;

use crate::config::EntityConfig;
use crate::models::MeasurementBatch;
use anyhow::{Context, Result};
use async_trait::async_trait;
use url::Url;

/// Destination of measurement batches
pub trait MetricsSink: Send + Sync {
    /// Hand off a batch; delivery is best effort and its outcome is not reported back
    fn publish(&self, batch: MeasurementBatch);
}

/// Assigns the stable source identity a host's measurements are reported under
#[async_trait]
pub trait SourceResolver: Send + Sync {
    async fn resolve_source_id(&self, entity: &EntityConfig) -> Result<String>;
}

/// Parse a base URL so that relative paths are joined below it
pub(crate) fn base_url(url: &str) -> Result<Url> {
    let mut url = Url::parse(url).with_context(|| format!("Invalid URL {}", url))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
