//! Run stat collection
//!
//! A [`Collector`] produces [`RunStats`] for one kind of resource, either on
//! a pull basis (periodic `collect`) or by pushing samples as events happen.
//! The [`Engine`] schedules every registered collector on its own task and
//! fans their output into a single channel.

mod cgroup;
mod discovery;
mod engine;
mod node;

#[cfg(test)]
mod tests;

pub use cgroup::{
    detect_cgroup_version, extract_container_id, parse_cfs_quota, parse_cpu_max,
    parse_memory_limit_v1, parse_memory_max, short_id, CgroupCollector, CgroupReader,
    CgroupVersion, ContainerCgroup, DEFAULT_CGROUP_ROOT,
};
pub use discovery::{ContainerRegistry, ContainerWatcher, WatcherHandle};
pub use engine::{Engine, EngineState, OUTPUT_BUFFER};
pub use node::NodeCollector;

use crate::error::ConfigError;
use crate::models::{parse_duration, RunStats};
use crate::node::Node;
use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub use async_trait::async_trait;

/// A pluggable source of run stats
#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &str;

    /// Prepare the collector. Called once, before the engine starts.
    async fn init(&mut self, config: &CollectorConfig) -> Result<()>;

    /// Take a snapshot of the resources this collector tracks
    async fn collect(&self) -> Result<Vec<RunStats>>;

    /// Push channel for event driven samples. Taken once by the engine;
    /// pull-only collectors return `None`.
    fn updates(&mut self) -> Option<mpsc::Receiver<RunStats>> {
        None
    }

    /// Release resources and wait for any internal tasks to exit
    async fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Resolved settings handed to [`Collector::init`]
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub node: Arc<Node>,
    pub interval: Duration,
    pub options: BTreeMap<String, Value>,
}

impl CollectorConfig {
    pub fn new(node: Arc<Node>, interval: Duration) -> Self {
        Self {
            node,
            interval,
            options: BTreeMap::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::invalid_interval(
                format!("{:?}", self.interval),
                "interval must be greater than 0",
            ));
        }
        Ok(())
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }

    /// Boolean option. Strings such as `"false"` are accepted since
    /// environment overrides arrive as text.
    pub fn option_bool(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.options.get(key) {
            None => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::String(s)) => s.trim().parse().map_err(|_| {
                ConfigError::invalid_option(key, format!("expected a boolean, got {:?}", s))
            }),
            Some(other) => Err(ConfigError::invalid_option(
                key,
                format!("expected a boolean, got {}", other),
            )),
        }
    }

    /// List option, given either as an array or a comma separated string
    pub fn option_list(&self, key: &str) -> Vec<String> {
        match self.options.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect(),
            Some(Value::String(s)) => s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            _ => Vec::new(),
        }
    }
}

fn default_interval() -> String {
    "10s".to_string()
}

/// Collector settings as written in the agent configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CollectorSpec {
    #[serde(default = "default_interval")]
    pub interval: String,
    #[serde(default)]
    pub options: BTreeMap<String, Value>,
}

impl Default for CollectorSpec {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            options: BTreeMap::new(),
        }
    }
}

impl CollectorSpec {
    /// Parse and validate the interval for `node`
    pub fn resolve(&self, node: Arc<Node>) -> Result<CollectorConfig, ConfigError> {
        let config = CollectorConfig {
            node,
            interval: parse_duration(&self.interval)?,
            options: self.options.clone(),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Create a collector by its registered name
pub fn create_collector(name: &str) -> Result<Box<dyn Collector>, ConfigError> {
    match name {
        NodeCollector::NAME => Ok(Box::new(NodeCollector::new())),
        CgroupCollector::NAME | "container" => Ok(Box::new(CgroupCollector::new())),
        other => Err(ConfigError::UnknownCollector(other.to_string())),
    }
}
