//! Destinations for computed cost series
//!
//! Sinks are created by name from the agent configuration and combined in a
//! [`MultiSink`] that publishes every batch to all of them.

mod datadog;
mod multi;
mod stdout;

pub use datadog::{DatadogSink, DEFAULT_DATADOG_ENDPOINT};
pub use multi::MultiSink;
pub use stdout::StdoutSink;

use crate::error::ConfigError;
use crate::tsdb::Series;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

/// Free-form sink settings from the agent configuration
pub type SinkOptions = BTreeMap<String, Value>;

/// A pluggable destination for cost series
#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    async fn publish(&self, series: &[Series]) -> Result<()>;
}

/// Create a sink by its registered name
pub fn create_sink(name: &str, options: &SinkOptions) -> Result<Box<dyn Sink>> {
    match name {
        StdoutSink::NAME => Ok(Box::new(StdoutSink::new())),
        DatadogSink::NAME => Ok(Box::new(DatadogSink::from_options(options)?)),
        other => Err(ConfigError::UnknownSink(other.to_string()).into()),
    }
}
