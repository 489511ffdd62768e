//! Resource cost metering for a single node
//!
//! This crate provides the core functionality for:
//! - Collecting run stats for the node and its containers
//! - Caching unit price history from a price provider
//! - Attributing cost to each resource by its CPU and memory share
//! - Publishing cost series to pluggable sinks
//! - Health checks and observability

pub mod api;
pub mod collector;
pub mod cost;
pub mod error;
pub mod filter;
pub mod health;
pub mod meter;
pub mod models;
pub mod node;
pub mod observability;
pub mod pricing;
pub mod sink;
pub mod tsdb;

pub use collector::{create_collector, Collector, CollectorConfig, CollectorSpec, Engine};
pub use cost::{Cost, CostCalculator, CostWeights};
pub use error::{ConfigError, EngineError, PricingError, PublishError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use meter::{Meter, MeterConfig};
pub use models::*;
pub use node::Node;
pub use observability::{MeterMetrics, StructuredLogger};
pub use pricing::{PriceProvider, Pricer, PricingConfig};
pub use sink::{create_sink, MultiSink, Sink};
pub use tsdb::{DataPoint, DataPoints, Series};
