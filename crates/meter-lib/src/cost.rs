//! Cost attribution for run stats
//!
//! A sample is charged the node's price over its lifetime, scaled by the
//! share of node CPU and memory it was allocated:
//!
//! `cost = Σ price · Δt · (cpu_weight · cpu_ratio + memory_weight · memory_ratio)`

use crate::error::{ConfigError, PricingError};
use crate::models::{unix_nanos_now, RunStats};
use crate::node::Node;
use crate::pricing::Pricer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Share of the node price attributed to CPU and to memory
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostWeights {
    pub cpu: f64,
    pub memory: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            cpu: 0.5,
            memory: 0.5,
        }
    }
}

impl CostWeights {
    pub fn new(cpu: f64, memory: f64) -> Result<Self, ConfigError> {
        let weights = Self { cpu, memory };
        weights.validate()?;
        Ok(weights)
    }

    /// Both weights non-negative and summing to 1
    pub fn validate(&self) -> Result<(), ConfigError> {
        let finite = self.cpu.is_finite() && self.memory.is_finite();
        let negative = self.cpu < 0.0 || self.memory < 0.0;
        if !finite || negative || (self.cpu + self.memory - 1.0).abs() > 1e-9 {
            return Err(ConfigError::InvalidWeights {
                cpu: self.cpu,
                memory: self.memory,
            });
        }
        Ok(())
    }
}

/// Cost attributed to one sample over `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Cost {
    pub cpu: f64,
    pub memory: f64,
    pub cpu_ratio: f64,
    pub memory_ratio: f64,
    pub start: u64,
    pub end: u64,
}

impl Cost {
    pub fn total(&self) -> f64 {
        self.cpu + self.memory
    }
}

/// Fraction of `capacity` held by `allocated`.
///
/// An unset allocation or an unknown capacity is charged as the whole node,
/// and an allocation above capacity is capped at the whole node.
pub fn utilization_ratio(allocated: u64, capacity: u64) -> f64 {
    if allocated == 0 || capacity == 0 {
        return 1.0;
    }
    (allocated as f64 / capacity as f64).min(1.0)
}

/// Computes sample costs against the node's price history
#[derive(Clone)]
pub struct CostCalculator {
    node: Arc<Node>,
    pricer: Arc<Pricer>,
    weights: CostWeights,
}

impl CostCalculator {
    pub fn new(node: Arc<Node>, pricer: Arc<Pricer>, weights: CostWeights) -> Self {
        Self {
            node,
            pricer,
            weights,
        }
    }

    pub fn weights(&self) -> CostWeights {
        self.weights
    }

    pub fn pricer(&self) -> &Pricer {
        &self.pricer
    }

    /// Cost of `stats`, charging a running resource up to now
    pub async fn compute(&self, stats: &RunStats) -> Result<Cost, PricingError> {
        self.compute_at(stats, unix_nanos_now()).await
    }

    /// Cost of `stats`, charging a running resource up to `now`
    pub async fn compute_at(&self, stats: &RunStats, now: u64) -> Result<Cost, PricingError> {
        let start = stats.start;
        let end = stats.end_or(now);

        let cpu_ratio = utilization_ratio(stats.cpu, self.node.cpu_shares);
        let memory_ratio = utilization_ratio(stats.memory, self.node.memory);

        let prices = self.pricer.history(start, end).await?;
        let cpu = prices
            .scale(self.weights.cpu * cpu_ratio)
            .sum_per_hour();
        let memory = prices
            .scale(self.weights.memory * memory_ratio)
            .sum_per_hour();

        Ok(Cost {
            cpu,
            memory,
            cpu_ratio,
            memory_ratio,
            start,
            end,
        })
    }
}
