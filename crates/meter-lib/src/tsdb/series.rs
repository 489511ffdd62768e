use super::DataPoints;
use crate::models::Meta;
use serde::{Deserialize, Serialize};

/// A named, tagged sequence of samples ready for publishing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    #[serde(default)]
    pub meta: Meta,
    pub data: DataPoints,
}

impl Series {
    pub fn new(name: impl Into<String>, meta: Meta, data: DataPoints) -> Self {
        Self {
            name: name.into(),
            meta,
            data,
        }
    }

    /// Identity used for publishing: `name{k=v,...}`
    pub fn id(&self) -> String {
        format!("{}{{{}}}", self.name, self.meta)
    }

    pub fn start(&self) -> Option<u64> {
        self.data.first().map(|p| p.timestamp)
    }

    pub fn end(&self) -> Option<u64> {
        self.data.last().map(|p| p.timestamp)
    }
}
