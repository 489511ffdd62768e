//! Collector scheduling engine
//!
//! Runs each registered collector on its own task: one immediate collect,
//! then a periodic collect on the configured interval, plus any samples the
//! collector pushes. Every batch lands on one shared output channel.

use super::{Collector, CollectorConfig};
use crate::error::EngineError;
use crate::models::RunStats;
use crate::observability::{MeterMetrics, StructuredLogger};
use anyhow::Result;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Capacity of the shared output channel
pub const OUTPUT_BUFFER: usize = 32;

/// Lifecycle of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
    Stopped,
}

struct Registered {
    collector: Box<dyn Collector>,
    interval: Duration,
}

/// Schedules collectors and fans their output into one channel
pub struct Engine {
    pending: Vec<Registered>,
    names: Vec<String>,
    handles: Vec<JoinHandle<()>>,
    shutdown_tx: broadcast::Sender<()>,
    out_tx: Option<mpsc::Sender<Vec<RunStats>>>,
    out_rx: Option<mpsc::Receiver<Vec<RunStats>>>,
    state: EngineState,
    metrics: MeterMetrics,
    logger: StructuredLogger,
}

impl Engine {
    pub fn new(metrics: MeterMetrics, logger: StructuredLogger) -> Self {
        let (out_tx, out_rx) = mpsc::channel(OUTPUT_BUFFER);
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            pending: Vec::new(),
            names: Vec::new(),
            handles: Vec::new(),
            shutdown_tx,
            out_tx: Some(out_tx),
            out_rx: Some(out_rx),
            state: EngineState::Idle,
            metrics,
            logger,
        }
    }

    /// Validate the config, initialize the collector and keep it for start.
    ///
    /// A zero interval or a duplicate name is rejected before the collector
    /// is initialized.
    pub async fn register(
        &mut self,
        mut collector: Box<dyn Collector>,
        config: CollectorConfig,
    ) -> Result<()> {
        if self.state != EngineState::Idle {
            return Err(EngineError::AlreadyStarted.into());
        }
        config.validate()?;

        let name = collector.name().to_string();
        if self.names.contains(&name) {
            return Err(EngineError::Duplicate(name).into());
        }

        collector.init(&config).await?;
        info!(
            collector = %name,
            interval_ms = config.interval.as_millis() as u64,
            "Registered collector"
        );

        self.names.push(name);
        self.pending.push(Registered {
            collector,
            interval: config.interval,
        });
        Ok(())
    }

    /// Names of the registered collectors, in registration order
    pub fn collector_names(&self) -> &[String] {
        &self.names
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Take the shared output receiver. Only the first call gets it.
    pub fn run_stats(&mut self) -> Option<mpsc::Receiver<Vec<RunStats>>> {
        self.out_rx.take()
    }

    /// Launch one task per registered collector
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.state != EngineState::Idle {
            return Err(EngineError::AlreadyStarted);
        }
        let Some(out) = self.out_tx.as_ref() else {
            return Err(EngineError::AlreadyStarted);
        };

        for registered in self.pending.drain(..) {
            let task = CollectorLoop {
                name: registered.collector.name().to_string(),
                collector: registered.collector,
                interval: registered.interval,
                out: out.clone(),
                metrics: self.metrics.clone(),
                logger: self.logger.clone(),
            };
            let shutdown = self.shutdown_tx.subscribe();
            self.handles.push(tokio::spawn(task.run(shutdown)));
        }

        self.state = EngineState::Running;
        info!(collectors = self.handles.len(), "Collector engine started");
        Ok(())
    }

    /// Signal every collector loop, wait for all of them to exit, then close
    /// the output channel. Calling it again is a no-op.
    pub async fn stop(&mut self) {
        if self.state == EngineState::Stopped {
            return;
        }

        // No receivers simply means nothing was started
        let _ = self.shutdown_tx.send(());

        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "Collector task ended abnormally");
            }
        }

        // Registered but never started
        for mut registered in self.pending.drain(..) {
            if let Err(e) = registered.collector.stop().await {
                warn!(
                    collector = registered.collector.name(),
                    error = %e,
                    "Failed to stop collector"
                );
            }
        }

        self.out_tx.take();
        self.state = EngineState::Stopped;
        info!("Collector engine stopped");
    }
}

/// Per-collector scheduling loop
struct CollectorLoop {
    name: String,
    collector: Box<dyn Collector>,
    interval: Duration,
    out: mpsc::Sender<Vec<RunStats>>,
    metrics: MeterMetrics,
    logger: StructuredLogger,
}

impl CollectorLoop {
    async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut updates = self.collector.updates();
        info!(
            collector = %self.name,
            interval_ms = self.interval.as_millis() as u64,
            push = updates.is_some(),
            "Starting collector loop"
        );

        let mut running = self.collect_once(&mut shutdown).await;

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while running {
            tokio::select! {
                _ = ticker.tick() => {
                    running = self.collect_once(&mut shutdown).await;
                }
                Some(stats) = recv_push(&mut updates) => {
                    debug!(collector = %self.name, "Received pushed run stats");
                    running = self.emit(vec![stats], &mut shutdown).await;
                }
                _ = shutdown.recv() => {
                    running = false;
                }
            }
        }

        info!(collector = %self.name, "Stopping collector loop");
        // Unblocks a collector task waiting on a full push channel
        drop(updates);
        if let Err(e) = self.collector.stop().await {
            warn!(collector = %self.name, error = %e, "Failed to stop collector");
        }
    }

    /// Run one collect. Failures are logged and never end the loop.
    async fn collect_once(&self, shutdown: &mut broadcast::Receiver<()>) -> bool {
        let started = Instant::now();
        let result = self.collector.collect().await;
        self.metrics
            .observe_collection_latency(&self.name, started.elapsed().as_secs_f64());

        match result {
            Ok(batch) if batch.is_empty() => {
                debug!(collector = %self.name, "Collector returned no run stats");
                true
            }
            Ok(batch) => self.emit(batch, shutdown).await,
            Err(e) => {
                self.metrics.inc_collection_errors(&self.name);
                self.logger
                    .log_collection_failed(&self.name, &format!("{:#}", e));
                true
            }
        }
    }

    /// Hand a batch to the shared channel. Returns false when the loop
    /// should end: shutdown was signalled or the consumer is gone.
    async fn emit(&self, batch: Vec<RunStats>, shutdown: &mut broadcast::Receiver<()>) -> bool {
        let size = batch.len();
        tokio::select! {
            sent = self.out.send(batch) => match sent {
                Ok(()) => {
                    self.metrics.inc_batches_emitted(&self.name);
                    debug!(collector = %self.name, size, "Emitted run stats");
                    true
                }
                Err(_) => {
                    debug!(collector = %self.name, "Run stats consumer closed");
                    false
                }
            },
            _ = shutdown.recv() => false,
        }
    }
}

async fn recv_push(updates: &mut Option<mpsc::Receiver<RunStats>>) -> Option<RunStats> {
    match updates {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
