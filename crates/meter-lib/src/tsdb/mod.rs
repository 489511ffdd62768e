//! In-memory time series primitives
//!
//! [`DataPoints`] is a step function over nanosecond timestamps. It backs
//! both the price history cache and the cost series handed to sinks.

mod datapoint;
mod series;


pub use datapoint::{DataPoint, DataPoints};
pub use series::Series;
