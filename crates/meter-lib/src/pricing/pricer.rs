use super::{PriceProvider, PriceReport};
use crate::error::PricingError;
use crate::models::{unix_nanos_now, Meta};
use crate::node::Node;
use crate::observability::MeterMetrics;
use crate::tsdb::DataPoints;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct PriceCache {
    /// Sorted, deduplicated, strictly increasing timestamps
    history: DataPoints,
    /// End of the most recently fetched range
    last_fetched: u64,
}

impl PriceCache {
    fn serve(&self, start: u64, end: u64) -> Result<DataPoints, PricingError> {
        let data = self.history.get(start, end).clip(start, end);
        if data.is_empty() {
            return Err(PricingError::NoData { start, end });
        }
        Ok(data)
    }

    fn merge(&mut self, fetched: DataPoints, end: u64) {
        self.history.insert(fetched);
        self.history.sort();
        self.history.dedup();
        self.history.latest_per_timestamp();
        self.last_fetched = self.last_fetched.max(end);
    }
}

/// Caching front for a [`PriceProvider`].
///
/// Holds one growing price history for the node. Reads share the lock; the
/// provider is called without holding it and results are merged under the
/// write lock. Two callers missing at once may both fetch; the merge
/// deduplicates.
pub struct Pricer {
    provider: Arc<dyn PriceProvider>,
    filter: Meta,
    boot_time: u64,
    refetch_interval: u64,
    cache: RwLock<PriceCache>,
    metrics: MeterMetrics,
}

impl Pricer {
    /// Create a pricer seeded with the history from node boot until now
    pub async fn new(
        provider: Arc<dyn PriceProvider>,
        node: &Node,
        refetch_interval: Duration,
        metrics: MeterMetrics,
    ) -> Result<Self, PricingError> {
        let pricer = Self {
            provider,
            filter: node.meta.clone(),
            boot_time: node.boot_time,
            refetch_interval: refetch_interval.as_nanos() as u64,
            cache: RwLock::new(PriceCache::default()),
            metrics,
        };

        let now = unix_nanos_now();
        let seed = pricer.fetch(pricer.boot_time.min(now), now).await?;
        let mut cache = pricer.cache.write().await;
        cache.merge(seed, now);
        pricer.metrics.set_price_cached_points(cache.history.len());
        info!(
            provider = pricer.provider.name(),
            points = cache.history.len(),
            "Seeded price history"
        );
        drop(cache);

        Ok(pricer)
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Price series for `[start, end]`, clipped and terminated at `end`.
    /// `start` is clamped to node boot time.
    pub async fn history(&self, start: u64, end: u64) -> Result<DataPoints, PricingError> {
        let start = start.max(self.boot_time);
        if start > end {
            return Err(PricingError::NoData { start, end });
        }

        let fetch_from = {
            let cache = self.cache.read().await;
            let last_ts = cache.history.last().map(|p| p.timestamp);
            let fresh = end <= cache.last_fetched.saturating_add(self.refetch_interval);
            let covered = last_ts.is_some_and(|ts| end <= ts);
            if fresh || covered {
                self.metrics.inc_price_cache_hits();
                return cache.serve(start, end);
            }
            last_ts.unwrap_or(start)
        };

        self.metrics.inc_price_cache_misses();
        debug!(from = fetch_from, to = end, "Price cache miss, fetching tail");
        let fetched = self.fetch(fetch_from, end).await?;

        let mut cache = self.cache.write().await;
        cache.merge(fetched, end);
        self.metrics.set_price_cached_points(cache.history.len());
        cache.serve(start, end)
    }

    /// Price summary for `[start, end]`
    pub async fn report(&self, start: u64, end: u64) -> Result<PriceReport, PricingError> {
        let history = self.history(start, end).await?;
        PriceReport::from_history(history).ok_or(PricingError::NoData { start, end })
    }

    /// Number of cached price points
    pub async fn cached_points(&self) -> usize {
        self.cache.read().await.history.len()
    }

    /// End of the most recently fetched range
    pub async fn last_fetched(&self) -> u64 {
        self.cache.read().await.last_fetched
    }

    async fn fetch(&self, start: u64, end: u64) -> Result<DataPoints, PricingError> {
        let started = Instant::now();
        let result = self.provider.history(start, end, &self.filter).await;
        self.metrics
            .observe_price_fetch_latency(started.elapsed().as_secs_f64());

        result.map_err(|e| {
            self.metrics.inc_price_fetch_errors();
            PricingError::Provider(e)
        })
    }
}
