use crate::tsdb::DataPoints;
use serde::{Deserialize, Serialize};

/// Summary of a price history window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceReport {
    /// Integrated cost over the window, in price-hours
    pub total: f64,
    pub min: f64,
    pub max: f64,
    pub average: f64,
    pub history: DataPoints,
}

impl PriceReport {
    /// Summarize a price series. Returns `None` for an empty series.
    pub fn from_history(history: DataPoints) -> Option<Self> {
        let min = history.min()?;
        let max = history.max()?;

        Some(Self {
            total: history.sum_per_hour(),
            min,
            max,
            average: history.sum() / history.len() as f64,
            history,
        })
    }
}
