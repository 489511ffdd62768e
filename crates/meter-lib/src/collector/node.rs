use super::{Collector, CollectorConfig};
use crate::models::{Resource, RunStats};
use crate::node::Node;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Reports the host itself as one resource running since boot.
///
/// Option `meta` lists node metadata keys copied onto the sample tags.
#[derive(Debug, Default)]
pub struct NodeCollector {
    node: Option<Arc<Node>>,
    meta_keys: Vec<String>,
}

impl NodeCollector {
    pub const NAME: &'static str = "node";

    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Collector for NodeCollector {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn init(&mut self, config: &CollectorConfig) -> Result<()> {
        self.node = Some(config.node.clone());
        self.meta_keys = config.option_list("meta");
        Ok(())
    }

    async fn collect(&self) -> Result<Vec<RunStats>> {
        let node = self.node.as_ref().context("node collector used before init")?;

        let mut stats = RunStats::new(Resource::Node, node.boot_time)
            .with_allocation(node.cpu_shares, node.memory)
            .with_meta("node", node.name.as_str());
        for key in &self.meta_keys {
            if let Some(value) = node.meta.get(key) {
                stats.meta.insert(key.as_str(), value);
            }
        }

        Ok(vec![stats])
    }
}
