use super::{Sink, SinkOptions};
use crate::error::ConfigError;
use crate::tsdb::Series;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_DATADOG_ENDPOINT: &str = "https://api.datadoghq.com";

const API_KEY_ENV: &str = "DD_API_KEY";
const SERIES_PATH: &str = "/api/v1/series";

#[derive(Debug, Serialize)]
struct SeriesPayload<'a> {
    series: Vec<DatadogSeries<'a>>,
}

#[derive(Debug, Serialize)]
struct DatadogSeries<'a> {
    metric: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    /// `[unix seconds, value]` pairs
    points: Vec<(u64, f64)>,
    tags: Vec<String>,
}

impl<'a> From<&'a Series> for DatadogSeries<'a> {
    fn from(series: &'a Series) -> Self {
        Self {
            metric: &series.name,
            kind: "gauge",
            points: series
                .data
                .iter()
                .map(|p| (p.timestamp / 1_000_000_000, p.value))
                .collect(),
            tags: series
                .meta
                .iter()
                .map(|(k, v)| format!("{}:{}", k, v))
                .collect(),
        }
    }
}

/// Submits series to the Datadog metrics API.
///
/// Options: `api_key` (falls back to `DD_API_KEY`) and `endpoint`
/// (default `https://api.datadoghq.com`).
pub struct DatadogSink {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl DatadogSink {
    pub const NAME: &'static str = "datadog";

    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    pub fn from_options(options: &SinkOptions) -> Result<Self> {
        let api_key = match options.get("api_key").and_then(|v| v.as_str()) {
            Some(key) => key.to_string(),
            None => std::env::var(API_KEY_ENV).map_err(|_| {
                ConfigError::invalid_option(
                    "api_key",
                    format!("datadog sink needs an api_key option or {}", API_KEY_ENV),
                )
            })?,
        };
        let endpoint = options
            .get("endpoint")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_DATADOG_ENDPOINT);

        Self::new(endpoint, api_key)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Sink for DatadogSink {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn publish(&self, series: &[Series]) -> Result<()> {
        if series.is_empty() {
            return Ok(());
        }

        let payload = SeriesPayload {
            series: series.iter().map(DatadogSeries::from).collect(),
        };

        let response = self
            .client
            .post(format!("{}{}", self.endpoint, SERIES_PATH))
            .header("DD-API-KEY", &self.api_key)
            .json(&payload)
            .send()
            .await
            .context("Failed to send series to Datadog")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Datadog API error ({}): {}", status, body);
        }

        debug!(series = series.len(), "Submitted series to Datadog");
        Ok(())
    }
}
