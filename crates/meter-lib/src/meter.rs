//! Consumer side of the pipeline
//!
//! Reads run stat batches from the engine, prices each sample and publishes
//! the resulting cost series to the sinks, one publish per batch.

use crate::cost::{Cost, CostCalculator};
use crate::health::{components, HealthRegistry};
use crate::models::{Meta, RunStats};
use crate::observability::{MeterMetrics, StructuredLogger};
use crate::sink::MultiSink;
use crate::tsdb::{DataPoint, DataPoints, Series};
use tokio::sync::mpsc;
use tracing::{debug, info};

pub const DEFAULT_METRIC_PREFIX: &str = "metering";

#[derive(Debug, Clone)]
pub struct MeterConfig {
    /// Series are named `<prefix>.cost.total|cpu|memory`
    pub metric_prefix: String,
    /// Tags added to every series
    pub metric_tags: Meta,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            metric_prefix: DEFAULT_METRIC_PREFIX.to_string(),
            metric_tags: Meta::new(),
        }
    }
}

pub struct Meter {
    calculator: CostCalculator,
    sinks: MultiSink,
    config: MeterConfig,
    health: HealthRegistry,
    metrics: MeterMetrics,
    logger: StructuredLogger,
}

impl Meter {
    pub fn new(
        calculator: CostCalculator,
        sinks: MultiSink,
        config: MeterConfig,
        health: HealthRegistry,
        metrics: MeterMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            calculator,
            sinks,
            config,
            health,
            metrics,
            logger,
        }
    }

    pub fn sinks(&self) -> &MultiSink {
        &self.sinks
    }

    /// Process batches until every producer has closed the channel
    pub async fn run(&self, mut run_stats: mpsc::Receiver<Vec<RunStats>>) {
        info!(sinks = self.sinks.len(), "Meter started");
        while let Some(batch) = run_stats.recv().await {
            self.process(&batch).await;
        }
        info!("Run stats channel closed, meter stopped");
    }

    /// Price one batch and publish it. Returns the number of series
    /// delivered to every sink.
    pub async fn process(&self, batch: &[RunStats]) -> usize {
        let mut series = Vec::with_capacity(batch.len() * 3);
        let mut last_error = None;

        for stats in batch {
            let tags = self.tags(stats);
            match self.calculator.compute(stats).await {
                Ok(cost) => {
                    self.metrics.inc_costs_computed(stats.resource.as_str());
                    self.logger.log_cost(
                        stats.resource.as_str(),
                        &tags.to_string(),
                        cost.total(),
                        cost.cpu_ratio,
                        cost.memory_ratio,
                        cost.start,
                        cost.end,
                    );
                    series.extend(self.series(&cost, tags));
                }
                Err(e) => {
                    self.metrics.inc_costs_failed();
                    self.logger.log_cost_failed(
                        stats.resource.as_str(),
                        &tags.to_string(),
                        &e.to_string(),
                    );
                    last_error = Some(e.to_string());
                }
            }
        }

        match last_error {
            Some(message) => self.health.set_degraded(components::PRICER, message).await,
            None if !batch.is_empty() => self.health.set_healthy(components::PRICER).await,
            None => {}
        }

        if series.is_empty() {
            debug!(samples = batch.len(), "Nothing to publish");
            return 0;
        }

        match self.sinks.publish_all(&series).await {
            Ok(()) => {
                self.metrics.add_series_published(series.len());
                self.health.set_healthy(components::SINKS).await;
                series.len()
            }
            Err(e) => {
                let failed = e.sinks();
                for sink in &failed {
                    self.metrics.inc_publish_errors(sink);
                }
                self.logger.log_publish_failed(&failed, &e.to_string());
                self.health
                    .set_degraded(components::SINKS, e.to_string())
                    .await;
                0
            }
        }
    }

    /// Metric tags, overridden by the sample's tags, plus the resource kind
    fn tags(&self, stats: &RunStats) -> Meta {
        let mut tags = self.config.metric_tags.merged(&stats.meta);
        tags.insert("resource", stats.resource.as_str());
        tags
    }

    fn series(&self, cost: &Cost, tags: Meta) -> [Series; 3] {
        let prefix = &self.config.metric_prefix;
        let point = |value: f64| -> DataPoints { vec![DataPoint::new(cost.end, value)].into() };

        [
            Series::new(format!("{}.cost.total", prefix), tags.clone(), point(cost.total())),
            Series::new(format!("{}.cost.cpu", prefix), tags.clone(), point(cost.cpu)),
            Series::new(format!("{}.cost.memory", prefix), tags, point(cost.memory)),
        ]
    }
}
