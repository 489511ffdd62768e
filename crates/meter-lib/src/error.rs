//! Typed errors surfaced by the metering pipeline
//!
//! Collaborator failures (collectors, providers, sinks) travel as
//! `anyhow::Error`; the enums here are the ones callers match on.

use std::fmt;
use thiserror::Error;

/// Configuration and registration errors. These are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid interval {value:?}: {reason}")]
    InvalidInterval { value: String, reason: String },

    #[error("unsupported collector: {0}")]
    UnknownCollector(String),

    #[error("unsupported sink: {0}")]
    UnknownSink(String),

    #[error("unsupported price provider: {0}")]
    UnknownProvider(String),

    #[error("invalid metadata pair {0:?}, expected key=value")]
    InvalidMeta(String),

    #[error("cost weights must be non-negative and sum to 1 (cpu={cpu}, memory={memory})")]
    InvalidWeights { cpu: f64, memory: f64 },

    #[error("invalid option {key}: {reason}")]
    InvalidOption { key: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid_interval(value: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidInterval {
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_option(key: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidOption {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Collector engine lifecycle errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("collector {0} is already registered")]
    Duplicate(String),

    #[error("collectors cannot be registered once the engine has started")]
    AlreadyStarted,
}

/// Price lookup errors
#[derive(Debug, Error)]
pub enum PricingError {
    #[error("no price data between {start} and {end}")]
    NoData { start: u64, end: u64 },

    #[error(transparent)]
    Provider(#[from] anyhow::Error),
}

/// A single sink's publish failure
#[derive(Debug)]
pub struct SinkFailure {
    pub sink: String,
    pub error: anyhow::Error,
}

impl fmt::Display for SinkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:#}", self.sink, self.error)
    }
}

/// Aggregate of every sink that failed during one publish
#[derive(Debug, Error)]
#[error("{} sink(s) failed to publish: {}", .failures.len(), join_failures(.failures))]
pub struct PublishError {
    pub failures: Vec<SinkFailure>,
}

impl PublishError {
    /// Names of the sinks that failed
    pub fn sinks(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.sink.as_str()).collect()
    }
}

fn join_failures(failures: &[SinkFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_error_lists_every_sink() {
        let err = PublishError {
            failures: vec![
                SinkFailure {
                    sink: "datadog".to_string(),
                    error: anyhow::anyhow!("connection refused"),
                },
                SinkFailure {
                    sink: "stdout".to_string(),
                    error: anyhow::anyhow!("broken pipe"),
                },
            ],
        };

        let msg = err.to_string();
        assert!(msg.starts_with("2 sink(s) failed"));
        assert!(msg.contains("datadog: connection refused"));
        assert!(msg.contains("stdout: broken pipe"));
        assert_eq!(err.sinks(), vec!["datadog", "stdout"]);
    }

    #[test]
    fn test_provider_error_is_transparent() {
        let err = PricingError::from(anyhow::anyhow!("throttled by upstream"));
        assert_eq!(err.to_string(), "throttled by upstream");
    }
}
