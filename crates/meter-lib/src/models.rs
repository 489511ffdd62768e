//! Core data models for the metering pipeline

use crate::error::ConfigError;
use crate::filter::{self, Filter, Query};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Current wall clock time in nanoseconds since the Unix epoch
pub fn unix_nanos_now() -> u64 {
    chrono::Utc::now()
        .timestamp_nanos_opt()
        .map(|ns| ns.max(0) as u64)
        .unwrap_or_default()
}

/// Parse a duration such as `10s`, `1m30s`, `250ms` or `1.5h`.
///
/// Units are `ns`, `us`, `ms`, `s`, `m` and `h`. A bare `0` is accepted;
/// negative durations are rejected.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let raw = input.trim();
    let mut rest = raw.strip_prefix('+').unwrap_or(raw);

    if rest.starts_with('-') {
        return Err(ConfigError::invalid_interval(input, "negative duration"));
    }
    if rest.is_empty() {
        return Err(ConfigError::invalid_interval(input, "empty duration"));
    }
    if rest == "0" {
        return Ok(Duration::ZERO);
    }

    let mut nanos = 0f64;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(num_len);
        let value: f64 = number
            .parse()
            .map_err(|_| ConfigError::invalid_interval(input, "expected a number"))?;

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let scale = match unit {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => return Err(ConfigError::invalid_interval(input, "missing unit")),
            other => {
                return Err(ConfigError::invalid_interval(
                    input,
                    format!("unknown unit {:?}", other),
                ))
            }
        };

        nanos += value * scale;
        rest = tail;
    }

    if !nanos.is_finite() || nanos > u64::MAX as f64 {
        return Err(ConfigError::invalid_interval(input, "duration out of range"));
    }
    Ok(Duration::from_nanos(nanos.round() as u64))
}

/// Free-form key/value metadata attached to nodes, samples and series.
///
/// Keys are kept ordered so the serialized form is stable and can be used
/// as part of a series identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Meta(BTreeMap<String, String>);

impl Meta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `key=value,key2=value2` list. Empty segments are skipped.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let mut meta = Meta::new();
        for pair in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| ConfigError::InvalidMeta(pair.to_string()))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(ConfigError::InvalidMeta(pair.to_string()));
            }
            meta.insert(key, value.trim());
        }
        Ok(meta)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Copy every pair from `other`, overwriting existing keys
    pub fn merge(&mut self, other: &Meta) {
        for (k, v) in other.iter() {
            self.insert(k, v);
        }
    }

    /// Return a copy with `other` merged on top
    pub fn merged(&self, other: &Meta) -> Meta {
        let mut out = self.clone();
        out.merge(other);
        out
    }

    /// Check every filter for `name` against this metadata. A missing key
    /// never matches.
    pub fn matches_key(&self, name: &str, filters: &[Filter]) -> bool {
        match self.get(name) {
            Some(value) => filters.iter().all(|f| filter::match_string(value, f)),
            None => false,
        }
    }
}

impl fmt::Display for Meta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Meta {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Meta(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Kind of resource a [`RunStats`] sample describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Node,
    Container,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Node => "node",
            Resource::Container => "container",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized observation of a resource's runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub resource: Resource,
    /// CPU allocated to the resource in MHz; 0 when unspecified
    pub cpu: u64,
    /// Memory allocated to the resource in bytes; 0 when unspecified
    pub memory: u64,
    /// Start of the run in nanoseconds since the epoch
    pub start: u64,
    /// End of the run; absent while the resource is still running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<u64>,
    #[serde(default)]
    pub meta: Meta,
}

impl RunStats {
    pub fn new(resource: Resource, start: u64) -> Self {
        Self {
            resource,
            cpu: 0,
            memory: 0,
            start,
            end: None,
            meta: Meta::new(),
        }
    }

    pub fn with_allocation(mut self, cpu: u64, memory: u64) -> Self {
        self.cpu = cpu;
        self.memory = memory;
        self
    }

    pub fn with_end(mut self, end: u64) -> Self {
        self.end = Some(end);
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key, value);
        self
    }

    /// True while no end time has been recorded
    pub fn is_running(&self) -> bool {
        !matches!(self.end, Some(end) if end > 0)
    }

    /// End of the sample window, using `now` for running resources
    pub fn end_or(&self, now: u64) -> u64 {
        match self.end {
            Some(end) if end > 0 => end,
            _ => now,
        }
    }

    /// Check the sample against a filter query
    pub fn matches(&self, query: &Query) -> bool {
        query
            .iter()
            .all(|(field, filters)| self.matches_field(field, filters))
    }

    fn matches_field(&self, name: &str, filters: &[Filter]) -> bool {
        match name {
            "resource" => filters
                .iter()
                .all(|f| filter::match_string(self.resource.as_str(), f)),
            "cpu" => filters.iter().all(|f| filter::match_int(self.cpu as i64, f)),
            "memory" => filters
                .iter()
                .all(|f| filter::match_int(self.memory as i64, f)),
            "start" => filters.iter().all(|f| filter::match_time(self.start, f)),
            "end" => match self.end {
                Some(end) if end > 0 => filters.iter().all(|f| filter::match_time(end, f)),
                _ => false,
            },
            _ => self.meta.matches_key(name, filters),
        }
    }
}
