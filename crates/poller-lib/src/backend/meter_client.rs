//! Meter manager client resolving a host's source identity

use super::{base_url, SourceResolver};
use crate::config::{EntityConfig, MeterManagerConfig};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// A meter as returned by the meter manager
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MeterMetadata {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(
        alias = "obs_domain_id",
        alias = "observationDomainId",
        deserialize_with = "string_or_number"
    )]
    pub observation_domain_id: String,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

/// Outcome of a meter creation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateMeter {
    Created { meter_id: String },
    /// A meter with this name already exists
    Conflict,
}

/// Client for the meter manager API
pub struct MeterManagerClient {
    client: Client,
    base_url: Url,
    api_key: String,
    org_id: String,
}

impl MeterManagerClient {
    pub fn new(config: &MeterManagerConfig, org_id: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url(&config.base_url).context("Invalid meter manager URL")?,
            api_key: config.api_key.clone(),
            org_id: org_id.to_string(),
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(&format!("{}/{}", self.org_id, path))
            .context("Invalid path")
    }

    /// Create a meter named `name`
    pub async fn create_meter(&self, name: &str) -> Result<CreateMeter> {
        let response = self
            .client
            .post(self.url("meters")?)
            .basic_auth(&self.api_key, None::<&str>)
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await
            .context("Failed to send request")?;

        if response.status() == StatusCode::CONFLICT {
            return Ok(CreateMeter::Conflict);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Meter manager error ({}) creating {}: {}", status, name, body);
        }

        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| anyhow!("Meter creation response has no Location header"))?;

        let meter_id = location
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| anyhow!("Invalid meter location {}", location))?;

        Ok(CreateMeter::Created {
            meter_id: meter_id.to_string(),
        })
    }

    pub async fn get_meter_by_id(&self, meter_id: &str) -> Result<Option<MeterMetadata>> {
        let response = self
            .client
            .get(self.url(&format!("meters/{}", meter_id))?)
            .basic_auth(&self.api_key, None::<&str>)
            .send()
            .await
            .context("Failed to send request")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Meter manager error ({}): {}", status, body);
        }

        response
            .json()
            .await
            .map(Some)
            .context("Failed to parse response")
    }

    /// Look a meter up by name; ambiguous names resolve to nothing
    pub async fn get_meter_by_name(&self, name: &str) -> Result<Option<MeterMetadata>> {
        let response = self
            .client
            .get(self.url("meters")?)
            .query(&[("name", name)])
            .basic_auth(&self.api_key, None::<&str>)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Meter manager error ({}): {}", status, body);
        }

        let mut meters: Vec<MeterMetadata> =
            response.json().await.context("Failed to parse response")?;
        if meters.len() == 1 {
            Ok(meters.pop())
        } else {
            debug!(name, matches = meters.len(), "Meter lookup by name is not unique");
            Ok(None)
        }
    }

    /// Create a meter named `name`, or fetch the existing one
    pub async fn create_or_get_meter(&self, name: &str) -> Result<MeterMetadata> {
        match self.create_meter(name).await? {
            CreateMeter::Created { meter_id } => {
                info!(name, meter_id = %meter_id, "Meter created");
                self.get_meter_by_id(&meter_id)
                    .await?
                    .ok_or_else(|| anyhow!("Created meter {} not found", meter_id))
            }
            CreateMeter::Conflict => self
                .get_meter_by_name(name)
                .await?
                .ok_or_else(|| anyhow!("Meter {} exists but could not be looked up", name)),
        }
    }
}

#[async_trait]
impl SourceResolver for MeterManagerClient {
    async fn resolve_source_id(&self, entity: &EntityConfig) -> Result<String> {
        let meter = match &entity.meter_id {
            Some(meter_id) => self
                .get_meter_by_id(meter_id)
                .await?
                .ok_or_else(|| anyhow!("Meter {} not found", meter_id))?,
            None => self.create_or_get_meter(&entity.host).await?,
        };

        debug!(
            host = %entity.host,
            meter_id = %meter.id,
            source = %meter.observation_domain_id,
            "Resolved source identity"
        );
        Ok(meter.observation_domain_id)
    }
}
