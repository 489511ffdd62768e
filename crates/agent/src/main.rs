//! Cost Agent - per-node resource cost metering
//!
//! Runs on every node, collecting run stats for the node and its containers,
//! pricing them against the node's hourly price and publishing the resulting
//! cost series.

use anyhow::{Context, Result};
use meter_lib::{
    api::{self, AppState},
    collector::{create_collector, Engine},
    cost::CostCalculator,
    health::{components, HealthRegistry},
    meter::Meter,
    node::Node,
    observability::{MeterMetrics, StructuredLogger},
    pricing::{select_provider, Pricer},
    sink::{create_sink, MultiSink, Sink},
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting cost-agent");

    let config = config::AgentConfig::load()?;

    let mut node = Node::probe().with_meta(&config.node_meta()?);
    if let Some(name) = &config.node_name {
        node = node.with_name(name.as_str());
    }
    let node = Arc::new(node);
    info!(node = %node.name, meta = %node.meta, "Agent configured");

    let health_registry = HealthRegistry::new();
    health_registry.register(components::ENGINE).await;
    health_registry.register(components::PRICER).await;
    health_registry.register(components::SINKS).await;

    let metrics = MeterMetrics::new();
    let logger = StructuredLogger::new(node.name.as_str());

    // Pricing
    let pricing = config.pricing_config()?;
    let provider = select_provider(&node, &pricing)?;
    let pricer = Pricer::new(provider, &node, pricing.refetch_interval, metrics.clone())
        .await
        .context("Failed to seed price history")?;
    let calculator = CostCalculator::new(node.clone(), Arc::new(pricer), config.weights()?);

    // Sinks
    let mut sinks = MultiSink::new();
    for (name, options) in &config.sinks {
        let sink = create_sink(name, options)
            .with_context(|| format!("Failed to create sink {}", name))?;
        sinks.register(sink);
    }

    // Collectors
    let mut engine = Engine::new(metrics.clone(), logger.clone());
    for (name, spec) in &config.collectors {
        let collector = create_collector(name)?;
        let collector_config = spec.resolve(node.clone())?;
        engine
            .register(collector, collector_config)
            .await
            .with_context(|| format!("Failed to register collector {}", name))?;
    }
    let run_stats = engine
        .run_stats()
        .context("Run stats channel already taken")?;

    logger.log_startup(
        AGENT_VERSION,
        calculator.pricer().provider_name(),
        engine.collector_names(),
        sinks.name(),
    );

    let meter = Meter::new(
        calculator,
        sinks,
        config.meter_config()?,
        health_registry.clone(),
        metrics.clone(),
        logger.clone(),
    );

    // Start health and metrics server
    let app_state = Arc::new(AppState::new(health_registry.clone(), metrics.clone()));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    engine.start()?;
    let meter_handle = tokio::spawn(async move { meter.run(run_stats).await });

    // Mark agent as ready after initialization
    health_registry.set_ready(true).await;

    let reason = shutdown_signal().await?;
    logger.log_shutdown(reason);
    health_registry.set_ready(false).await;

    // Collectors first so the meter drains what is already in flight
    engine.stop().await;
    health_registry
        .set_unhealthy(components::ENGINE, "stopped")
        .await;
    if let Err(e) = meter_handle.await {
        warn!(error = %e, "Meter task ended abnormally");
    }

    api_handle.abort();
    info!("Shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.map(|_| "SIGINT received").map_err(Into::into),
            _ = terminate.recv() => Ok("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok("SIGINT received")
    }
}
