use super::PriceProvider;
use crate::models::Meta;
use crate::tsdb::{DataPoint, DataPoints};
use anyhow::Result;
use async_trait::async_trait;

/// Constant hourly price, for hosts without a catalog entry
#[derive(Debug, Clone)]
pub struct FixedPriceProvider {
    price: f64,
}

impl FixedPriceProvider {
    pub const NAME: &'static str = "fixed";

    pub fn new(price: f64) -> Self {
        Self { price }
    }

    pub fn price(&self) -> f64 {
        self.price
    }
}

#[async_trait]
impl PriceProvider for FixedPriceProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn history(&self, start: u64, end: u64, _filter: &Meta) -> Result<DataPoints> {
        Ok(vec![DataPoint::new(start, self.price), DataPoint::new(end, self.price)].into())
    }
}
