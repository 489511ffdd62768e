//! Agent configuration
//!
//! Loaded from an optional TOML file (`METER_CONFIG_FILE`, default
//! `/etc/cost-agent/config.toml`) overlaid with `METER_*` environment
//! variables, where `__` separates nested keys:
//!
//! ```text
//! METER_API_PORT=9100
//! METER_PRICING__FIXED_PRICE=0.096
//! METER_COLLECTORS__NODE__INTERVAL=30s
//! ```

use anyhow::{Context, Result};
use meter_lib::collector::CollectorSpec;
use meter_lib::cost::CostWeights;
use meter_lib::error::ConfigError;
use meter_lib::meter::{MeterConfig, DEFAULT_METRIC_PREFIX};
use meter_lib::models::{parse_duration, Meta};
use meter_lib::pricing::PricingConfig;
use meter_lib::sink::SinkOptions;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

const CONFIG_FILE_ENV: &str = "METER_CONFIG_FILE";
const DEFAULT_CONFIG_FILE: &str = "/etc/cost-agent/config.toml";

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Overrides the probed host name
    #[serde(default = "default_node_name")]
    pub node_name: Option<String>,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// `k=v,...` merged into the node metadata, e.g. Region and InstanceType
    #[serde(default)]
    pub node_meta: String,

    /// `k=v,...` added to every published series
    #[serde(default)]
    pub metric_tags: String,

    #[serde(default = "default_metric_prefix")]
    pub metric_prefix: String,

    #[serde(default)]
    pub pricing: PricingSection,

    /// Collector name to schedule and options
    #[serde(default)]
    pub collectors: BTreeMap<String, CollectorSpec>,

    /// Sink name to options
    #[serde(default)]
    pub sinks: BTreeMap<String, SinkOptions>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PricingSection {
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default)]
    pub fixed_price: Option<f64>,

    #[serde(default = "default_refetch_interval")]
    pub refetch_interval: String,

    #[serde(default = "default_weight")]
    pub cpu_weight: f64,

    #[serde(default = "default_weight")]
    pub memory_weight: f64,
}

impl Default for PricingSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            fixed_price: None,
            refetch_interval: default_refetch_interval(),
            cpu_weight: default_weight(),
            memory_weight: default_weight(),
        }
    }
}

fn default_node_name() -> Option<String> {
    std::env::var("NODE_NAME").ok().filter(|n| !n.is_empty())
}

fn default_api_port() -> u16 {
    8080
}

fn default_metric_prefix() -> String {
    DEFAULT_METRIC_PREFIX.to_string()
}

fn default_provider() -> String {
    "auto".to_string()
}

fn default_refetch_interval() -> String {
    "5m".to_string()
}

fn default_weight() -> f64 {
    0.5
}

impl AgentConfig {
    /// Load configuration from the config file and environment
    pub fn load() -> Result<Self> {
        let path =
            std::env::var(CONFIG_FILE_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(Path::new(&path))
    }

    /// Load configuration from `path` (if it exists) and environment
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("METER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?;

        let agent: AgentConfig = config
            .try_deserialize()
            .context("Invalid configuration")?;
        Ok(agent.with_defaults())
    }

    /// A node collector and a stdout sink when none are configured
    fn with_defaults(mut self) -> Self {
        if self.collectors.is_empty() {
            self.collectors
                .insert("node".to_string(), CollectorSpec::default());
        }
        if self.sinks.is_empty() {
            self.sinks.insert("stdout".to_string(), SinkOptions::new());
        }
        self
    }

    pub fn node_meta(&self) -> Result<Meta, ConfigError> {
        Meta::parse(&self.node_meta)
    }

    pub fn pricing_config(&self) -> Result<PricingConfig, ConfigError> {
        Ok(PricingConfig {
            provider: self.pricing.provider.clone(),
            fixed_price: self.pricing.fixed_price,
            refetch_interval: parse_duration(&self.pricing.refetch_interval)?,
        })
    }

    pub fn weights(&self) -> Result<CostWeights, ConfigError> {
        CostWeights::new(self.pricing.cpu_weight, self.pricing.memory_weight)
    }

    pub fn meter_config(&self) -> Result<MeterConfig, ConfigError> {
        Ok(MeterConfig {
            metric_prefix: self.metric_prefix.clone(),
            metric_tags: Meta::parse(&self.metric_tags)?,
        })
    }
}
