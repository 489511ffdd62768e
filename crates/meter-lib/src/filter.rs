//! Attribute filter language
//!
//! Filters are written as `[op]v1,v2,...` where `op` is `!` (not equal) or
//! one of `lt:`, `le:`, `gt:`, `ge:`. Without a prefix the filter is a plain
//! equality check. Distinct fields are ANDed, comma separated values are ORed,
//! and `!` requires the value to differ from every listed value.

use chrono::DateTime;
use std::collections::BTreeMap;

/// Comparison operator of a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl Op {
    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "lt" => Some(Op::Less),
            "le" => Some(Op::LessEqual),
            "gt" => Some(Op::Greater),
            "ge" => Some(Op::GreaterEqual),
            _ => None,
        }
    }
}

/// One parsed filter expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub op: Op,
    pub values: Vec<String>,
}

impl Filter {
    pub fn parse(raw: &str) -> Self {
        let (op, rest) = if let Some(rest) = raw.strip_prefix('!') {
            (Op::NotEqual, rest)
        } else {
            let prefixed = raw
                .split_once(':')
                .and_then(|(p, rest)| Op::from_prefix(p).map(|op| (op, rest)));
            match prefixed {
                Some((op, rest)) => (op, rest),
                None => (Op::Equal, raw),
            }
        };

        let values = rest
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
            .collect();

        Self { op, values }
    }
}

/// Field name to filters, as parsed from query string pairs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query(BTreeMap<String, Vec<Filter>>);

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut query = Query::new();
        for (field, value) in pairs {
            query.push(field.as_ref(), Filter::parse(value.as_ref()));
        }
        query
    }

    pub fn push(&mut self, field: &str, filter: Filter) {
        self.0.entry(field.to_string()).or_default().push(filter);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Filter])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

/// String match. Only equality operators apply to strings.
pub fn match_string(value: &str, filter: &Filter) -> bool {
    match filter.op {
        Op::Equal => filter.values.iter().any(|v| v == value),
        Op::NotEqual => filter.values.iter().all(|v| v != value),
        _ => false,
    }
}

/// Integer match over every operator
pub fn match_int(value: i64, filter: &Filter) -> bool {
    let parsed = filter.values.iter().filter_map(|v| v.parse::<i64>().ok());
    match_ordered(value, filter.op, parsed)
}

/// Timestamp match. `value` is in nanoseconds; filter values are RFC3339 and
/// compared at second precision.
pub fn match_time(value: u64, filter: &Filter) -> bool {
    let secs = (value / 1_000_000_000) as i64;
    let parsed = filter
        .values
        .iter()
        .filter_map(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|t| t.timestamp());
    match_ordered(secs, filter.op, parsed)
}

fn match_ordered<T: Ord + Copy>(value: T, op: Op, candidates: impl Iterator<Item = T>) -> bool {
    let candidates: Vec<T> = candidates.collect();
    if candidates.is_empty() {
        return false;
    }

    match op {
        Op::Equal => candidates.iter().any(|c| value == *c),
        Op::NotEqual => candidates.iter().all(|c| value != *c),
        Op::Less => candidates.iter().any(|c| value < *c),
        Op::LessEqual => candidates.iter().any(|c| value <= *c),
        Op::Greater => candidates.iter().any(|c| value > *c),
        Op::GreaterEqual => candidates.iter().any(|c| value >= *c),
    }
}
