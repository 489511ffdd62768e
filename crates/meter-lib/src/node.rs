//! Host resource profile
//!
//! The [`Node`] is probed once at startup and shared read-only with the
//! collectors, the pricer and the cost calculator.

use crate::filter::Query;
use crate::models::Meta;
use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::{debug, warn};

/// Tag present on EC2 instances launched by a spot fleet request
pub const SPOT_TAG: &str = "aws:ec2spot:fleet-request-id";

/// Operating system details
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub name: String,
    pub family: String,
    pub version: String,
}

/// Capacity and identity of the machine the agent runs on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub address: String,
    /// Total CPU capacity in MHz summed across logical CPUs
    pub cpu_shares: u64,
    pub cpu_count: usize,
    /// Total memory in bytes
    pub memory: u64,
    /// Boot time in nanoseconds since the epoch
    pub boot_time: u64,
    pub platform: Platform,
    /// Provider filter keys (Region, InstanceType, ...) and grouping labels
    pub meta: Meta,
}

impl Node {
    /// Read the local host's capacity and platform details
    pub fn probe() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        let cpus = sys.cpus();
        let cpu_shares: u64 = cpus.iter().map(|c| c.frequency()).sum();
        if cpu_shares == 0 {
            warn!(cpus = cpus.len(), "CPU frequency unavailable, node CPU capacity is 0");
        }

        let node = Self {
            name: System::host_name().unwrap_or_else(|| "localhost".to_string()),
            address: String::new(),
            cpu_shares,
            cpu_count: cpus.len(),
            memory: sys.total_memory(),
            boot_time: System::boot_time().saturating_mul(1_000_000_000),
            platform: Platform {
                name: System::name().unwrap_or_default(),
                family: System::distribution_id(),
                version: System::os_version().unwrap_or_default(),
            },
            meta: Meta::new(),
        };

        debug!(
            node = %node.name,
            cpu_shares = node.cpu_shares,
            memory = node.memory,
            boot_time = node.boot_time,
            "Probed node"
        );

        node
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add metadata before the node is shared. Existing keys are overwritten.
    pub fn with_meta(mut self, meta: &Meta) -> Self {
        self.meta.merge(meta);
        self
    }

    /// Fraction of the node's CPU represented by `shares` MHz
    pub fn cpu_percent(&self, shares: u64) -> f64 {
        shares as f64 / self.cpu_shares as f64
    }

    /// Fraction of the node's memory represented by `bytes`
    pub fn memory_percent(&self, bytes: u64) -> f64 {
        bytes as f64 / self.memory as f64
    }

    /// Average clock speed of one logical CPU
    pub fn mhz_per_core(&self) -> f64 {
        if self.cpu_count == 0 {
            return 0.0;
        }
        self.cpu_shares as f64 / self.cpu_count as f64
    }

    pub fn is_spot(&self) -> bool {
        self.meta.contains_key(SPOT_TAG)
    }

    /// Match the node's metadata against a query
    pub fn matches(&self, query: &Query) -> bool {
        query
            .iter()
            .all(|(field, filters)| self.meta.matches_key(field, filters))
    }
}
