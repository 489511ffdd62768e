//! Container discovery and lifecycle tracking
//!
//! Watches the cgroup hierarchy for container directories appearing and
//! disappearing, and keeps the last known run stats of every container so
//! a terminated sample can be produced once its cgroup is gone.

use super::cgroup::{short_id, CgroupReader};
use crate::models::{unix_nanos_now, RunStats};
use crate::node::Node;
use anyhow::{Context, Result};
use dashmap::DashMap;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Registry of active containers on the node
#[derive(Debug, Default)]
pub struct ContainerRegistry {
    /// Map of container_id -> last known run stats
    containers: DashMap<String, RunStats>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or refresh a container
    pub fn register(&self, container_id: &str, stats: RunStats) {
        self.containers.insert(container_id.to_string(), stats);
    }

    /// Remove a container, returning its last known run stats
    pub fn unregister(&self, container_id: &str) -> Option<RunStats> {
        debug!(container = short_id(container_id), "Unregistering container");
        self.containers.remove(container_id).map(|(_, v)| v)
    }

    pub fn contains(&self, container_id: &str) -> bool {
        self.containers.contains_key(container_id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.containers.iter().map(|r| r.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}

/// Watches the cgroup hierarchy and pushes container lifecycle samples
pub struct ContainerWatcher {
    reader: Arc<CgroupReader>,
    node: Arc<Node>,
    registry: Arc<ContainerRegistry>,
    updates_tx: mpsc::Sender<RunStats>,
}

impl ContainerWatcher {
    pub fn new(
        reader: Arc<CgroupReader>,
        node: Arc<Node>,
        registry: Arc<ContainerRegistry>,
        updates_tx: mpsc::Sender<RunStats>,
    ) -> Self {
        Self {
            reader,
            node,
            registry,
            updates_tx,
        }
    }

    /// Start watching. Must be called inside a tokio runtime.
    pub fn start(self) -> Result<WatcherHandle> {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                if let Ok(event) = res {
                    let _ = event_tx.send(event);
                }
            },
            notify::Config::default(),
        )
        .context("Failed to create filesystem watcher")?;

        let path = self.reader.hierarchy_root();
        watcher
            .watch(&path, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", path.display()))?;
        info!(path = %path.display(), "Watching cgroup hierarchy");

        let (stop_tx, mut stop_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    event = event_rx.recv() => event,
                    _ = &mut stop_rx => break,
                };
                let Some(event) = event else {
                    debug!("Watcher channel closed");
                    break;
                };

                // A full update channel must not hold up shutdown
                tokio::select! {
                    _ = self.process_event(&event) => {}
                    _ = &mut stop_rx => break,
                }
            }
        });

        Ok(WatcherHandle {
            watcher,
            stop_tx,
            task,
        })
    }

    async fn process_event(&self, event: &Event) {
        for path in &event.paths {
            let Some(cgroup) = self.reader.container_from_path(path) else {
                continue;
            };

            let stats = match event.kind {
                EventKind::Create(_) => {
                    if self.registry.contains(&cgroup.id) || !path.is_dir() {
                        continue;
                    }
                    let stats = self.reader.read_stats(&cgroup, &self.node).await;
                    self.registry.register(&cgroup.id, stats.clone());
                    debug!(container = short_id(&cgroup.id), "Container started");
                    stats
                }
                EventKind::Remove(_) => match self.registry.unregister(&cgroup.id) {
                    Some(stats) => {
                        debug!(container = short_id(&cgroup.id), "Container stopped");
                        stats.with_end(unix_nanos_now())
                    }
                    None => continue,
                },
                _ => continue,
            };

            if self.updates_tx.send(stats).await.is_err() {
                debug!("Container update receiver dropped");
            }
        }
    }
}

/// Handle to a running watcher
pub struct WatcherHandle {
    watcher: RecommendedWatcher,
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    /// Stop watching and wait for the event task to exit
    pub async fn shutdown(self) {
        let WatcherHandle {
            watcher,
            stop_tx,
            task,
        } = self;

        drop(watcher);
        let _ = stop_tx.send(());
        if let Err(e) = task.await {
            warn!(error = %e, "Container watcher task ended abnormally");
        }
    }
}
