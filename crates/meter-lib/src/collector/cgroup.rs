//! Container collection from the cgroup filesystem
//!
//! Supports the unified v2 hierarchy and the legacy v1 hierarchy:
//! - v2: `cpu.max` for the CPU quota, `memory.max` for the memory limit
//! - v1: `cpu.cfs_quota_us` / `cpu.cfs_period_us` and `memory.limit_in_bytes`
//!
//! Container cgroups are recognised by a 64 character hex ID in the
//! directory name (docker, containerd, CRI-O and podman layouts).

use super::discovery::{ContainerRegistry, ContainerWatcher, WatcherHandle};
use super::{Collector, CollectorConfig};
use crate::models::{unix_nanos_now, Resource, RunStats};
use crate::node::Node;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tokio::fs;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup";

const ID_PREFIXES: &[&str] = &["docker-", "crio-", "cri-containerd-", "libpod-"];

/// Cgroup version detected on the system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupVersion {
    V1,
    V2,
    Unknown,
}

/// Detect which cgroup version is available under `cgroup_root`
pub async fn detect_cgroup_version(cgroup_root: &Path) -> CgroupVersion {
    if fs::metadata(cgroup_root.join("cgroup.controllers")).await.is_ok() {
        return CgroupVersion::V2;
    }

    let v1_memory = cgroup_root.join("memory");
    let v1_cpu = cgroup_root.join("cpu");
    if fs::metadata(&v1_memory).await.is_ok() && fs::metadata(&v1_cpu).await.is_ok() {
        return CgroupVersion::V1;
    }

    CgroupVersion::Unknown
}

/// Container ID from a cgroup directory name, e.g.
/// `docker-<id>.scope`, `crio-<id>` or a bare `<id>`
pub fn extract_container_id(name: &str) -> Option<String> {
    let name = name.strip_suffix(".scope").unwrap_or(name);
    let id = ID_PREFIXES
        .iter()
        .find_map(|p| name.strip_prefix(p))
        .unwrap_or(name);

    if id.len() == 64 && id.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(id.to_string())
    } else {
        None
    }
}

/// First 12 characters of a container ID
pub fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

/// CPU limit in cores from a v2 `cpu.max` (`"<quota> <period>"`).
/// `None` when unlimited.
pub fn parse_cpu_max(content: &str) -> Option<f64> {
    let mut parts = content.split_whitespace();
    let quota = parts.next()?;
    let period = parts.next().unwrap_or("100000");
    parse_cfs_quota(quota, period)
}

/// CPU limit in cores from v1 CFS quota and period. A quota of `-1` or
/// `max` is unlimited.
pub fn parse_cfs_quota(quota: &str, period: &str) -> Option<f64> {
    let quota: i64 = quota.trim().parse().ok()?;
    let period: i64 = period.trim().parse().ok()?;
    if quota <= 0 || period <= 0 {
        return None;
    }
    Some(quota as f64 / period as f64)
}

/// Memory limit in bytes from a v2 `memory.max`. `None` when unlimited.
pub fn parse_memory_max(content: &str) -> Option<u64> {
    content.trim().parse().ok()
}

/// Memory limit in bytes from v1 `memory.limit_in_bytes`. v1 reports
/// "unlimited" as a huge page-aligned value, so anything at or above the
/// node's memory counts as unlimited.
pub fn parse_memory_limit_v1(content: &str, node_memory: u64) -> Option<u64> {
    let limit: u64 = content.trim().parse().ok()?;
    if node_memory > 0 && limit >= node_memory {
        return None;
    }
    Some(limit)
}

/// A container cgroup, relative to the hierarchy root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerCgroup {
    pub id: String,
    pub path: PathBuf,
}

/// Reads container cgroups for one hierarchy
#[derive(Debug, Clone)]
pub struct CgroupReader {
    root: PathBuf,
    version: CgroupVersion,
}

impl CgroupReader {
    pub fn new(root: impl Into<PathBuf>, version: CgroupVersion) -> Self {
        Self {
            root: root.into(),
            version,
        }
    }

    pub fn version(&self) -> CgroupVersion {
        self.version
    }

    /// Directory holding the container cgroups. For v1 this is the memory
    /// controller.
    pub fn hierarchy_root(&self) -> PathBuf {
        match self.version {
            CgroupVersion::V1 => self.root.join("memory"),
            _ => self.root.clone(),
        }
    }

    /// Interpret an absolute path as a container cgroup
    pub fn container_from_path(&self, path: &Path) -> Option<ContainerCgroup> {
        let relative = path.strip_prefix(self.hierarchy_root()).ok()?;
        let name = relative.file_name()?.to_string_lossy();
        let id = extract_container_id(&name)?;
        Some(ContainerCgroup {
            id,
            path: relative.to_path_buf(),
        })
    }

    /// Walk the hierarchy and list every container cgroup
    pub async fn scan(&self) -> Result<Vec<ContainerCgroup>> {
        let base = self.hierarchy_root();
        let mut containers = Vec::new();
        let mut pending = vec![base.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir)
                .await
                .with_context(|| format!("Failed to read {}", dir.display()))?;

            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await?.is_dir() {
                    continue;
                }
                let path = entry.path();
                if let Some(container) = self.container_from_path(&path) {
                    containers.push(container);
                }
                pending.push(path);
            }
        }

        Ok(containers)
    }

    /// Read limits and start time of a container cgroup
    pub async fn read_stats(&self, cgroup: &ContainerCgroup, node: &Node) -> RunStats {
        let (cores, memory) = match self.version {
            CgroupVersion::V1 => {
                let cpu_dir = self.root.join("cpu").join(&cgroup.path);
                let quota = read_trimmed(&cpu_dir.join("cpu.cfs_quota_us")).await;
                let period = read_trimmed(&cpu_dir.join("cpu.cfs_period_us")).await;
                let cores = quota
                    .zip(period)
                    .and_then(|(q, p)| parse_cfs_quota(&q, &p));

                let mem_dir = self.root.join("memory").join(&cgroup.path);
                let memory = read_trimmed(&mem_dir.join("memory.limit_in_bytes"))
                    .await
                    .and_then(|c| parse_memory_limit_v1(&c, node.memory));
                (cores, memory)
            }
            _ => {
                let dir = self.root.join(&cgroup.path);
                let cores = read_trimmed(&dir.join("cpu.max"))
                    .await
                    .and_then(|c| parse_cpu_max(&c));
                let memory = read_trimmed(&dir.join("memory.max"))
                    .await
                    .and_then(|c| parse_memory_max(&c));
                (cores, memory)
            }
        };

        let cpu = cores
            .map(|c| (c * node.mhz_per_core()).round() as u64)
            .unwrap_or(0);
        let start = self.start_time(cgroup).await;

        RunStats::new(Resource::Container, start)
            .with_allocation(cpu, memory.unwrap_or(0))
            .with_meta("container", short_id(&cgroup.id))
    }

    pub async fn exists(&self, cgroup: &ContainerCgroup) -> bool {
        fs::metadata(self.hierarchy_root().join(&cgroup.path))
            .await
            .is_ok()
    }

    /// Creation time of the cgroup directory, falling back to its mtime
    async fn start_time(&self, cgroup: &ContainerCgroup) -> u64 {
        let dir = self.hierarchy_root().join(&cgroup.path);
        let Ok(meta) = fs::metadata(&dir).await else {
            return unix_nanos_now();
        };

        meta.created()
            .or_else(|_| meta.modified())
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_else(unix_nanos_now)
    }
}

async fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .await
        .ok()
        .map(|s| s.trim().to_string())
}

/// Collects running containers from the cgroup hierarchy.
///
/// Options: `root` (default `/sys/fs/cgroup`) and `watch` (default true),
/// which pushes a sample when a container starts and a terminated sample
/// when it goes away.
pub struct CgroupCollector {
    reader: Option<Arc<CgroupReader>>,
    node: Option<Arc<Node>>,
    registry: Arc<ContainerRegistry>,
    updates: Option<mpsc::Receiver<RunStats>>,
    watcher: Option<WatcherHandle>,
}

impl Default for CgroupCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl CgroupCollector {
    pub const NAME: &'static str = "cgroup";

    pub fn new() -> Self {
        Self {
            reader: None,
            node: None,
            registry: Arc::new(ContainerRegistry::new()),
            updates: None,
            watcher: None,
        }
    }

    /// Containers seen so far
    pub fn registry(&self) -> Arc<ContainerRegistry> {
        self.registry.clone()
    }

    /// Refresh the registry from a scan and terminate containers missing
    /// from it. A cgroup removed after the scan is skipped so the watcher's
    /// terminated sample stays the only one.
    pub(crate) async fn reconcile(&self, cgroups: &[ContainerCgroup]) -> Result<Vec<RunStats>> {
        let (Some(reader), Some(node)) = (self.reader.as_ref(), self.node.as_ref()) else {
            bail!("cgroup collector used before init");
        };

        let mut batch = Vec::with_capacity(cgroups.len());
        let mut seen = Vec::with_capacity(cgroups.len());

        for cgroup in cgroups {
            if !reader.exists(cgroup).await {
                continue;
            }
            let stats = reader.read_stats(cgroup, node).await;
            self.registry.register(&cgroup.id, stats.clone());
            seen.push(cgroup.id.clone());
            batch.push(stats);
        }

        // Containers gone since the last scan that the watcher did not report
        let now = unix_nanos_now();
        for id in self.registry.ids() {
            if seen.contains(&id) {
                continue;
            }
            if let Some(stats) = self.registry.unregister(&id) {
                debug!(container = short_id(&id), "Container vanished between scans");
                batch.push(stats.with_end(now));
            }
        }

        Ok(batch)
    }
}

#[async_trait]
impl Collector for CgroupCollector {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn init(&mut self, config: &CollectorConfig) -> Result<()> {
        let root = PathBuf::from(config.option_str("root").unwrap_or(DEFAULT_CGROUP_ROOT));
        let version = detect_cgroup_version(&root).await;
        if version == CgroupVersion::Unknown {
            bail!("no cgroup hierarchy found under {}", root.display());
        }
        info!(root = %root.display(), version = ?version, "Detected cgroup hierarchy");

        let reader = Arc::new(CgroupReader::new(root, version));
        if config.option_bool("watch", true)? {
            let (tx, rx) = mpsc::channel(64);
            let watcher = ContainerWatcher::new(
                reader.clone(),
                config.node.clone(),
                self.registry.clone(),
                tx,
            );
            self.watcher = Some(watcher.start()?);
            self.updates = Some(rx);
        }

        self.reader = Some(reader);
        self.node = Some(config.node.clone());
        Ok(())
    }

    async fn collect(&self) -> Result<Vec<RunStats>> {
        let Some(reader) = self.reader.as_ref() else {
            bail!("cgroup collector used before init");
        };

        let cgroups = reader.scan().await?;
        self.reconcile(&cgroups).await
    }
    fn updates(&mut self) -> Option<mpsc::Receiver<RunStats>> {
        self.updates.take()
    }

    async fn stop(&mut self) -> Result<()> {
        // Unclaimed when the engine never started
        self.updates.take();
        if let Some(watcher) = self.watcher.take() {
            watcher.shutdown().await;
        }
        Ok(())
    }
}
