use super::Sink;
use crate::error::{PublishError, SinkFailure};
use crate::tsdb::Series;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Publishes to every registered sink in registration order.
///
/// One sink failing never keeps the others from receiving the batch; all
/// failures are collected into a single [`PublishError`].
pub struct MultiSink {
    sinks: Vec<Box<dyn Sink>>,
    name: String,
    warned_empty: AtomicBool,
}

impl Default for MultiSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiSink {
    pub fn new() -> Self {
        Self {
            sinks: Vec::new(),
            name: "multi[]".to_string(),
            warned_empty: AtomicBool::new(false),
        }
    }

    /// Add a sink. Registration happens before publishing starts.
    pub fn register(&mut self, sink: Box<dyn Sink>) {
        self.sinks.push(sink);
        self.name = format!("multi[{}]", self.names().join(","));
    }

    pub fn names(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Publish to every sink and report each one that failed
    pub async fn publish_all(&self, series: &[Series]) -> Result<(), PublishError> {
        if self.sinks.is_empty() {
            if !self.warned_empty.swap(true, Ordering::Relaxed) {
                warn!("No sinks registered, cost series are discarded");
            }
            return Ok(());
        }

        let mut failures = Vec::new();
        for sink in &self.sinks {
            match sink.publish(series).await {
                Ok(()) => debug!(sink = sink.name(), series = series.len(), "Published series"),
                Err(error) => failures.push(SinkFailure {
                    sink: sink.name().to_string(),
                    error,
                }),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(PublishError { failures })
        }
    }
}

#[async_trait]
impl Sink for MultiSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, series: &[Series]) -> Result<()> {
        Ok(self.publish_all(series).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Meta;
    use crate::tsdb::{DataPoint, DataPoints};
    use anyhow::bail;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct CountingSink {
        name: &'static str,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    impl CountingSink {
        fn new(name: &'static str, fail: bool) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    name,
                    fail,
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl Sink for CountingSink {
        fn name(&self) -> &str {
            self.name
        }

        async fn publish(&self, _series: &[Series]) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                bail!("endpoint unreachable");
            }
            Ok(())
        }
    }

    fn batch() -> Vec<Series> {
        let data: DataPoints = vec![DataPoint::new(1, 0.5)].into();
        vec![Series::new("metering.cost.total", Meta::new(), data)]
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_block_others() {
        let (failing, failing_calls) = CountingSink::new("broken", true);
        let (working, working_calls) = CountingSink::new("stdout", false);

        let mut multi = MultiSink::new();
        multi.register(Box::new(failing));
        multi.register(Box::new(working));
        assert_eq!(multi.name(), "multi[broken,stdout]");

        let err = multi.publish_all(&batch()).await.unwrap_err();
        assert_eq!(err.sinks(), vec!["broken"]);
        assert!(err.to_string().contains("broken: endpoint unreachable"));
        assert_eq!(failing_calls.load(Ordering::SeqCst), 1);
        assert_eq!(working_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_every_failure_is_reported() {
        let (a, _) = CountingSink::new("a", true);
        let (b, _) = CountingSink::new("b", true);
        let mut multi = MultiSink::new();
        multi.register(Box::new(a));
        multi.register(Box::new(b));

        let err = multi.publish(&batch()).await.unwrap_err();
        let publish = err.downcast_ref::<PublishError>().unwrap();
        assert_eq!(publish.sinks(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_empty_multi_sink_succeeds() {
        let multi = MultiSink::new();
        assert!(multi.is_empty());
        assert_eq!(multi.name(), "multi[]");
        assert!(multi.publish_all(&batch()).await.is_ok());
        assert!(multi.publish_all(&batch()).await.is_ok());
    }
}
