//! Unit price history
//!
//! A [`PriceProvider`] is the raw source of hourly prices for a time range.
//! The [`Pricer`] sits in front of it and keeps a growing per-node cache so
//! repeated cost computations only fetch the uncovered tail.

mod fixed;
mod pricer;
mod report;
mod static_table;

pub use fixed::FixedPriceProvider;
pub use pricer::Pricer;
pub use report::PriceReport;
pub use static_table::{on_demand_price, StaticTableProvider};

use crate::error::ConfigError;
use crate::models::Meta;
use crate::node::Node;
use crate::tsdb::DataPoints;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Source of raw hourly price samples
#[async_trait]
pub trait PriceProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Price samples covering `[start, end]` (nanoseconds). `filter` carries
    /// provider specific keys such as `Region` and `InstanceType`.
    async fn history(&self, start: u64, end: u64, filter: &Meta) -> Result<DataPoints>;
}

/// Price provider selection and cache settings
#[derive(Debug, Clone)]
pub struct PricingConfig {
    /// Provider name, or `auto` to pick one from the node metadata
    pub provider: String,
    /// Hourly price used by the `fixed` provider
    pub fixed_price: Option<f64>,
    /// Minimum time between provider fetches
    pub refetch_interval: Duration,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            provider: "auto".to_string(),
            fixed_price: None,
            refetch_interval: Duration::from_secs(300),
        }
    }
}

/// Create a provider by name
pub fn create_provider(
    name: &str,
    config: &PricingConfig,
) -> Result<Arc<dyn PriceProvider>, ConfigError> {
    match name {
        StaticTableProvider::NAME | "static" => Ok(Arc::new(StaticTableProvider::new())),
        FixedPriceProvider::NAME => {
            let price = config.fixed_price.ok_or_else(|| {
                ConfigError::invalid_option("fixed_price", "required by the fixed provider")
            })?;
            if !price.is_finite() || price < 0.0 {
                return Err(ConfigError::invalid_option(
                    "fixed_price",
                    format!("must be a non-negative number, got {}", price),
                ));
            }
            Ok(Arc::new(FixedPriceProvider::new(price)))
        }
        other => Err(ConfigError::UnknownProvider(other.to_string())),
    }
}

/// Pick the provider for this node
pub fn select_provider(
    node: &Node,
    config: &PricingConfig,
) -> Result<Arc<dyn PriceProvider>, ConfigError> {
    if config.provider != "auto" {
        return create_provider(&config.provider, config);
    }

    let has_catalog_keys =
        node.meta.contains_key("Region") && node.meta.contains_key("InstanceType");
    if has_catalog_keys {
        if node.is_spot() {
            warn!(
                node = %node.name,
                "Spot price history unavailable, pricing with the on-demand catalog"
            );
        }
        info!(provider = StaticTableProvider::NAME, "Selected price provider");
        return create_provider(StaticTableProvider::NAME, config);
    }

    if config.fixed_price.is_some() {
        info!(provider = FixedPriceProvider::NAME, "Selected price provider");
        return create_provider(FixedPriceProvider::NAME, config);
    }

    Err(ConfigError::invalid_option(
        "pricing.provider",
        "auto needs Region and InstanceType node metadata or a fixed_price",
    ))
}
