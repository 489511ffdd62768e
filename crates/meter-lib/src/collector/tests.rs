//! Integration tests for run stat collection
//!
//! These tests use a mock cgroup filesystem and mock collectors to exercise
//! parsing, discovery and engine scheduling without a container runtime.

#[cfg(test)]
mod mock_cgroup_tests {
    use crate::collector::{
        detect_cgroup_version, CgroupCollector, CgroupReader, CgroupVersion, Collector,
        CollectorConfig, Engine,
    };
    use crate::models::Resource;
    use crate::node::Node;
    use crate::observability::{MeterMetrics, StructuredLogger};
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::fs;

    const ID_A: &str = "aaaaaaaaaaaa1111111111111111111111111111111111111111111111111111";
    const ID_B: &str = "bbbbbbbbbbbb2222222222222222222222222222222222222222222222222222";

    fn node() -> Arc<Node> {
        Arc::new(Node {
            name: "test-node".to_string(),
            cpu_shares: 4000,
            cpu_count: 4,
            memory: 8_000_000_000,
            ..Default::default()
        })
    }

    async fn write_v2_container(dir: &Path, cpu_max: &str, memory_max: &str) {
        fs::create_dir_all(dir).await.unwrap();
        fs::write(dir.join("cpu.max"), cpu_max).await.unwrap();
        fs::write(dir.join("memory.max"), memory_max).await.unwrap();
    }

    /// Helper to create a mock cgroup v2 filesystem
    async fn create_mock_cgroup_v2(temp_dir: &TempDir) -> PathBuf {
        let root = temp_dir.path().to_path_buf();
        fs::write(root.join("cgroup.controllers"), "cpu memory io\n")
            .await
            .unwrap();

        write_v2_container(
            &root.join("system.slice").join(format!("docker-{}.scope", ID_A)),
            "200000 100000\n",
            "536870912\n",
        )
        .await;
        write_v2_container(
            &root
                .join("kubepods.slice")
                .join("kubepods-pod1.slice")
                .join(format!("crio-{}.scope", ID_B)),
            "max 100000\n",
            "max\n",
        )
        .await;
        fs::create_dir_all(root.join("user.slice")).await.unwrap();

        root
    }

    /// Helper to create a mock cgroup v1 filesystem
    async fn create_mock_cgroup_v1(temp_dir: &TempDir) -> PathBuf {
        let root = temp_dir.path().to_path_buf();

        let cpu_a = root.join("cpu").join("docker").join(ID_A);
        let mem_a = root.join("memory").join("docker").join(ID_A);
        fs::create_dir_all(&cpu_a).await.unwrap();
        fs::create_dir_all(&mem_a).await.unwrap();
        fs::write(cpu_a.join("cpu.cfs_quota_us"), "50000\n").await.unwrap();
        fs::write(cpu_a.join("cpu.cfs_period_us"), "100000\n").await.unwrap();
        fs::write(mem_a.join("memory.limit_in_bytes"), "1073741824\n")
            .await
            .unwrap();

        let cpu_b = root.join("cpu").join("docker").join(ID_B);
        let mem_b = root.join("memory").join("docker").join(ID_B);
        fs::create_dir_all(&cpu_b).await.unwrap();
        fs::create_dir_all(&mem_b).await.unwrap();
        fs::write(cpu_b.join("cpu.cfs_quota_us"), "-1\n").await.unwrap();
        fs::write(cpu_b.join("cpu.cfs_period_us"), "100000\n").await.unwrap();
        fs::write(mem_b.join("memory.limit_in_bytes"), "9223372036854771712\n")
            .await
            .unwrap();

        root
    }

    async fn init_collector(root: &Path, watch: bool) -> CgroupCollector {
        let config = CollectorConfig::new(node(), Duration::from_secs(10))
            .with_option("root", root.to_string_lossy().to_string())
            .with_option("watch", watch);

        let mut collector = CgroupCollector::new();
        collector.init(&config).await.unwrap();
        collector
    }

    #[tokio::test]
    async fn test_detect_cgroup_versions() {
        let v2 = TempDir::new().unwrap();
        let v2_root = create_mock_cgroup_v2(&v2).await;
        assert_eq!(detect_cgroup_version(&v2_root).await, CgroupVersion::V2);

        let v1 = TempDir::new().unwrap();
        let v1_root = create_mock_cgroup_v1(&v1).await;
        assert_eq!(detect_cgroup_version(&v1_root).await, CgroupVersion::V1);

        assert_eq!(
            detect_cgroup_version(Path::new("/nonexistent/path")).await,
            CgroupVersion::Unknown
        );
    }

    #[tokio::test]
    async fn test_cgroup_v2_collect_limits() {
        let temp_dir = TempDir::new().unwrap();
        let root = create_mock_cgroup_v2(&temp_dir).await;
        let collector = init_collector(&root, false).await;

        let mut stats = collector.collect().await.unwrap();
        stats.sort_by(|a, b| a.meta.get("container").cmp(&b.meta.get("container")));
        assert_eq!(stats.len(), 2);

        let a = &stats[0];
        assert_eq!(a.resource, Resource::Container);
        assert_eq!(a.meta.get("container"), Some("aaaaaaaaaaaa"));
        // 2 cores at 1000 MHz per core
        assert_eq!(a.cpu, 2000);
        assert_eq!(a.memory, 536_870_912);
        assert!(a.start > 0);
        assert!(a.is_running());

        // Unlimited container is charged as the whole node downstream
        let b = &stats[1];
        assert_eq!(b.meta.get("container"), Some("bbbbbbbbbbbb"));
        assert_eq!(b.cpu, 0);
        assert_eq!(b.memory, 0);

        assert_eq!(collector.registry().len(), 2);
    }

    #[tokio::test]
    async fn test_cgroup_v1_collect_limits() {
        let temp_dir = TempDir::new().unwrap();
        let root = create_mock_cgroup_v1(&temp_dir).await;
        let collector = init_collector(&root, false).await;

        let mut stats = collector.collect().await.unwrap();
        stats.sort_by(|a, b| a.meta.get("container").cmp(&b.meta.get("container")));
        assert_eq!(stats.len(), 2);

        assert_eq!(stats[0].cpu, 500);
        assert_eq!(stats[0].memory, 1_073_741_824);
        // -1 quota and the v1 "unlimited" sentinel
        assert_eq!(stats[1].cpu, 0);
        assert_eq!(stats[1].memory, 0);
    }

    #[tokio::test]
    async fn test_vanished_container_is_terminated() {
        let temp_dir = TempDir::new().unwrap();
        let root = create_mock_cgroup_v2(&temp_dir).await;
        let collector = init_collector(&root, false).await;

        assert_eq!(collector.collect().await.unwrap().len(), 2);

        fs::remove_dir_all(root.join("system.slice"))
            .await
            .unwrap();

        let stats = collector.collect().await.unwrap();
        assert_eq!(stats.len(), 2);
        let gone: Vec<_> = stats.iter().filter(|s| !s.is_running()).collect();
        assert_eq!(gone.len(), 1);
        assert_eq!(gone[0].meta.get("container"), Some("aaaaaaaaaaaa"));

        // Reported once
        let stats = collector.collect().await.unwrap();
        assert_eq!(stats.len(), 1);
        assert!(stats[0].is_running());
    }

    #[tokio::test]
    async fn test_container_removed_after_scan_is_not_reregistered() {
        let temp_dir = TempDir::new().unwrap();
        let root = create_mock_cgroup_v2(&temp_dir).await;
        let collector = init_collector(&root, false).await;
        let registry = collector.registry();

        let stale = CgroupReader::new(&root, CgroupVersion::V2).scan().await.unwrap();
        assert_eq!(collector.reconcile(&stale).await.unwrap().len(), 2);

        // Removed after the scan, and the watcher already reported it
        fs::remove_dir_all(root.join("system.slice"))
            .await
            .unwrap();
        assert!(registry.unregister(ID_A).is_some());

        let stats = collector.reconcile(&stale).await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].meta.get("container"), Some("bbbbbbbbbbbb"));
        assert!(!registry.contains(ID_A));

        // No second terminated sample on the next scan
        let stats = collector.collect().await.unwrap();
        assert_eq!(stats.len(), 1);
        assert!(stats[0].is_running());
    }

    #[tokio::test]
    async fn test_stop_before_start_with_busy_watcher() {
        let temp_dir = TempDir::new().unwrap();
        let root = create_mock_cgroup_v2(&temp_dir).await;
        let config = CollectorConfig::new(node(), Duration::from_secs(10))
            .with_option("root", root.to_string_lossy().to_string());

        let mut engine = Engine::new(MeterMetrics::new(), StructuredLogger::new("test-node"));
        engine
            .register(Box::new(CgroupCollector::new()), config)
            .await
            .unwrap();

        // More lifecycle events than the update channel holds
        for i in 0..80 {
            let id = format!("{:064x}", i + 1);
            fs::create_dir_all(root.join("system.slice").join(format!("docker-{}.scope", id)))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(500)).await;

        tokio::time::timeout(Duration::from_secs(5), engine.stop())
            .await
            .expect("stop returns with a full update channel");
    }

    #[tokio::test]
    async fn test_init_fails_without_hierarchy() {
        let temp_dir = TempDir::new().unwrap();
        let config = CollectorConfig::new(node(), Duration::from_secs(10))
            .with_option("root", temp_dir.path().to_string_lossy().to_string())
            .with_option("watch", false);

        let mut collector = CgroupCollector::new();
        assert!(collector.init(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_collect_before_init_fails() {
        assert!(CgroupCollector::new().collect().await.is_err());
    }

    #[tokio::test]
    async fn test_watcher_pushes_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let root = create_mock_cgroup_v2(&temp_dir).await;
        let mut collector = init_collector(&root, true).await;
        let mut updates = collector.updates().expect("watch enabled");
        assert!(collector.updates().is_none());

        let id = "cccccccccccc3333333333333333333333333333333333333333333333333333";
        let dir = root.join("system.slice").join(format!("docker-{}.scope", id));
        write_v2_container(&dir, "100000 100000\n", "1048576\n").await;

        let started = tokio::time::timeout(Duration::from_secs(5), updates.recv())
            .await
            .expect("start event")
            .expect("channel open");
        assert_eq!(started.meta.get("container"), Some("cccccccccccc"));
        assert!(started.is_running());

        fs::remove_dir_all(&dir).await.unwrap();

        let stopped = tokio::time::timeout(Duration::from_secs(5), updates.recv())
            .await
            .expect("stop event")
            .expect("channel open");
        assert_eq!(stopped.meta.get("container"), Some("cccccccccccc"));
        assert!(!stopped.is_running());

        tokio::time::timeout(Duration::from_secs(5), collector.stop())
            .await
            .expect("watcher shuts down")
            .unwrap();
    }
}

#[cfg(test)]
mod parse_tests {
    use crate::collector::{
        extract_container_id, parse_cfs_quota, parse_cpu_max, parse_memory_limit_v1,
        parse_memory_max, short_id,
    };

    const ID: &str = "abc123def456789012345678901234567890123456789012345678901234abcd";

    #[test]
    fn test_extract_container_id_layouts() {
        assert_eq!(extract_container_id(ID), Some(ID.to_string()));
        assert_eq!(
            extract_container_id(&format!("docker-{}.scope", ID)),
            Some(ID.to_string())
        );
        assert_eq!(
            extract_container_id(&format!("crio-{}.scope", ID)),
            Some(ID.to_string())
        );
        assert_eq!(
            extract_container_id(&format!("cri-containerd-{}.scope", ID)),
            Some(ID.to_string())
        );
        assert_eq!(extract_container_id("user.slice"), None);
        assert_eq!(extract_container_id("crio-abc123.scope"), None);
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id(ID), "abc123def456");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_parse_cpu_limits() {
        assert_eq!(parse_cpu_max("200000 100000"), Some(2.0));
        assert_eq!(parse_cpu_max("50000 100000\n"), Some(0.5));
        assert_eq!(parse_cpu_max("max 100000"), None);
        assert_eq!(parse_cpu_max(""), None);

        assert_eq!(parse_cfs_quota("150000", "100000"), Some(1.5));
        assert_eq!(parse_cfs_quota("-1", "100000"), None);
        assert_eq!(parse_cfs_quota("100000", "0"), None);
    }

    #[test]
    fn test_parse_memory_limits() {
        assert_eq!(parse_memory_max("536870912\n"), Some(536_870_912));
        assert_eq!(parse_memory_max("max"), None);

        assert_eq!(parse_memory_limit_v1("1073741824", 8_000_000_000), Some(1_073_741_824));
        assert_eq!(parse_memory_limit_v1("9223372036854771712", 8_000_000_000), None);
    }
}

#[cfg(test)]
mod engine_tests {
    use crate::collector::{
        create_collector, Collector, CollectorConfig, CollectorSpec, Engine, EngineState,
        NodeCollector,
    };
    use crate::error::{ConfigError, EngineError};
    use crate::models::{Meta, Resource, RunStats};
    use crate::node::Node;
    use crate::observability::{MeterMetrics, StructuredLogger};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    /// Mock collector for testing
    struct MockCollector {
        name: String,
        fail: bool,
        init_called: Arc<AtomicBool>,
        stopped: Arc<AtomicBool>,
        collects: Arc<AtomicUsize>,
        push: Option<mpsc::Receiver<RunStats>>,
    }

    impl MockCollector {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                fail: false,
                init_called: Arc::new(AtomicBool::new(false)),
                stopped: Arc::new(AtomicBool::new(false)),
                collects: Arc::new(AtomicUsize::new(0)),
                push: None,
            }
        }

        fn failing(name: &str) -> Self {
            Self {
                fail: true,
                ..Self::new(name)
            }
        }
    }

    #[async_trait]
    impl Collector for MockCollector {
        fn name(&self) -> &str {
            &self.name
        }

        async fn init(&mut self, _config: &CollectorConfig) -> Result<()> {
            self.init_called.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn collect(&self) -> Result<Vec<RunStats>> {
            self.collects.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("runtime socket unavailable"));
            }
            Ok(vec![RunStats::new(Resource::Container, 1).with_meta("source", "poll")])
        }

        fn updates(&mut self) -> Option<mpsc::Receiver<RunStats>> {
            self.push.take()
        }

        async fn stop(&mut self) -> Result<()> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn node() -> Arc<Node> {
        Arc::new(Node {
            name: "test-node".to_string(),
            boot_time: 42,
            cpu_shares: 4000,
            memory: 8_000_000_000,
            meta: [("Region", "us-west-2"), ("InstanceType", "m5.large")]
                .into_iter()
                .collect::<Meta>(),
            ..Default::default()
        })
    }

    fn engine() -> Engine {
        Engine::new(MeterMetrics::new(), StructuredLogger::new("test-node"))
    }

    fn config(interval: Duration) -> CollectorConfig {
        CollectorConfig::new(node(), interval)
    }

    #[tokio::test]
    async fn test_zero_interval_is_rejected() {
        let mut engine = engine();
        let collector = MockCollector::new("mock");
        let init_called = collector.init_called.clone();

        let err = engine
            .register(Box::new(collector), config(Duration::ZERO))
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::InvalidInterval { .. })
        ));
        assert!(!init_called.load(Ordering::SeqCst));
        assert!(engine.collector_names().is_empty());
    }

    #[test]
    fn test_negative_interval_is_rejected() {
        let spec = CollectorSpec {
            interval: "-1s".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            spec.resolve(node()),
            Err(ConfigError::InvalidInterval { .. })
        ));

        let spec = CollectorSpec {
            interval: "0s".to_string(),
            ..Default::default()
        };
        assert!(spec.resolve(node()).is_err());

        let resolved = CollectorSpec::default().resolve(node()).unwrap();
        assert_eq!(resolved.interval, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_duplicate_and_late_registration() {
        let mut engine = engine();
        engine
            .register(Box::new(MockCollector::new("mock")), config(Duration::from_secs(60)))
            .await
            .unwrap();

        let err = engine
            .register(Box::new(MockCollector::new("mock")), config(Duration::from_secs(60)))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::Duplicate(name)) if name == "mock"
        ));

        engine.start().unwrap();
        let err = engine
            .register(Box::new(MockCollector::new("other")), config(Duration::from_secs(60)))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::AlreadyStarted)
        ));
        assert!(matches!(engine.start(), Err(EngineError::AlreadyStarted)));

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_immediate_collect_on_start() {
        let mut engine = engine();
        let collector = MockCollector::new("mock");
        let collects = collector.collects.clone();
        engine
            .register(Box::new(collector), config(Duration::from_secs(3600)))
            .await
            .unwrap();

        let mut rx = engine.run_stats().unwrap();
        assert!(engine.run_stats().is_none());
        engine.start().unwrap();
        assert_eq!(engine.state(), EngineState::Running);

        let batch = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("immediate batch")
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].meta.get("source"), Some("poll"));
        assert_eq!(collects.load(Ordering::SeqCst), 1);

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_pushed_stats_are_emitted() {
        let (push_tx, push_rx) = mpsc::channel(4);
        let mut collector = MockCollector::new("mock");
        collector.push = Some(push_rx);

        let mut engine = engine();
        engine
            .register(Box::new(collector), config(Duration::from_secs(3600)))
            .await
            .unwrap();
        let mut rx = engine.run_stats().unwrap();
        engine.start().unwrap();

        // Immediate collect first
        timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();

        push_tx
            .send(RunStats::new(Resource::Container, 7).with_meta("source", "push"))
            .await
            .unwrap();
        let batch = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("pushed batch")
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].meta.get("source"), Some("push"));
        assert_eq!(batch[0].start, 7);

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_failing_collector_keeps_running() {
        let mut engine = engine();
        let failing = MockCollector::failing("broken");
        let collects = failing.collects.clone();
        engine
            .register(Box::new(failing), config(Duration::from_millis(20)))
            .await
            .unwrap();
        let healthy = MockCollector::new("healthy");
        engine
            .register(Box::new(healthy), config(Duration::from_secs(3600)))
            .await
            .unwrap();

        let mut rx = engine.run_stats().unwrap();
        engine.start().unwrap();

        // The healthy collector is not held up by the failing one
        let batch = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(batch[0].meta.get("source"), Some("poll"));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(collects.load(Ordering::SeqCst) >= 2);

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_closes_output() {
        let mut engine = engine();
        let collector = MockCollector::new("mock");
        let stopped = collector.stopped.clone();
        engine
            .register(Box::new(collector), config(Duration::from_millis(10)))
            .await
            .unwrap();
        let mut rx = engine.run_stats().unwrap();
        engine.start().unwrap();

        timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();

        engine.stop().await;
        engine.stop().await;
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(stopped.load(Ordering::SeqCst));

        // Drain whatever was buffered, then the channel reports closed
        let drained = timeout(Duration::from_secs(2), async {
            while rx.recv().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok());
    }

    #[tokio::test]
    async fn test_stop_with_stalled_consumer() {
        let mut engine = engine();
        engine
            .register(Box::new(MockCollector::new("mock")), config(Duration::from_millis(1)))
            .await
            .unwrap();
        let _rx = engine.run_stats().unwrap();
        engine.start().unwrap();

        // Let the output channel fill up while nobody reads it
        tokio::time::sleep(Duration::from_millis(200)).await;

        timeout(Duration::from_secs(2), engine.stop())
            .await
            .expect("stop must not wait on the consumer");
    }

    #[tokio::test]
    async fn test_stop_before_start_stops_collectors() {
        let mut engine = engine();
        let collector = MockCollector::new("mock");
        let stopped = collector.stopped.clone();
        engine
            .register(Box::new(collector), config(Duration::from_secs(1)))
            .await
            .unwrap();

        engine.stop().await;
        assert!(stopped.load(Ordering::SeqCst));
        assert!(engine.start().is_err());
    }

    #[tokio::test]
    async fn test_node_collector_reports_boot_time() {
        let mut collector = create_collector("node").unwrap();
        let config = config(Duration::from_secs(10)).with_option("meta", "Region,Missing");
        collector.init(&config).await.unwrap();

        let stats = collector.collect().await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].resource, Resource::Node);
        assert_eq!(stats[0].start, 42);
        assert!(stats[0].is_running());
        assert_eq!(stats[0].meta.get("node"), Some("test-node"));
        assert_eq!(stats[0].meta.get("Region"), Some("us-west-2"));
        assert!(!stats[0].meta.contains_key("InstanceType"));
        assert!(!stats[0].meta.contains_key("Missing"));
    }

    #[test]
    fn test_collector_registry() {
        assert_eq!(create_collector("node").unwrap().name(), NodeCollector::NAME);
        assert_eq!(create_collector("container").unwrap().name(), "cgroup");
        assert_eq!(create_collector("cgroup").unwrap().name(), "cgroup");
        assert!(matches!(
            create_collector("docker"),
            Err(ConfigError::UnknownCollector(name)) if name == "docker"
        ));
    }

    #[test]
    fn test_collector_options() {
        let config = config(Duration::from_secs(1))
            .with_option("watch", "false")
            .with_option("flag", true)
            .with_option("bad", 3)
            .with_option("keys", serde_json::json!(["a", "b"]));

        assert!(!config.option_bool("watch", true).unwrap());
        assert!(config.option_bool("flag", false).unwrap());
        assert!(config.option_bool("missing", true).unwrap());
        assert!(config.option_bool("bad", true).is_err());
        assert_eq!(config.option_list("keys"), vec!["a", "b"]);
        assert!(config.option_list("missing").is_empty());
    }
}
