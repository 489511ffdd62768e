use super::Sink;
use crate::tsdb::Series;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::io::Write;
use std::sync::Mutex;

/// Writes each series as one JSON line
pub struct StdoutSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

impl StdoutSink {
    pub const NAME: &'static str = "stdout";

    pub fn new() -> Self {
        Self::with_writer(std::io::stdout())
    }

    /// Write to `out` instead of standard output
    pub fn with_writer(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
        }
    }
}

#[async_trait]
impl Sink for StdoutSink {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn publish(&self, series: &[Series]) -> Result<()> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| anyhow!("stdout sink writer poisoned"))?;

        for s in series {
            serde_json::to_writer(&mut *out, s).context("Failed to encode series")?;
            writeln!(out).context("Failed to write series")?;
        }
        out.flush().context("Failed to flush series")?;
        Ok(())
    }
}
