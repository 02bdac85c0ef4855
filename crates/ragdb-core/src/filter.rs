//! Metadata predicates shared by both indexes and the retriever.
//!
//! Range bounds compare as strings. Callers zero-pad numbers and use
//! RFC 3339 timestamps so lexicographic order matches the intended order;
//! every backend applies the same rule.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::types::Meta;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum MetadataFilter {
    Eq { key: String, value: String },
    Range { key: String, gte: Option<String>, lte: Option<String> },
}

impl MetadataFilter {
    pub fn eq(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Eq { key: key.into(), value: value.into() }
    }

    pub fn range(key: impl Into<String>, gte: Option<&str>, lte: Option<&str>) -> Self {
        Self::Range {
            key: key.into(),
            gte: gte.map(str::to_string),
            lte: lte.map(str::to_string),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Eq { key, .. } | Self::Range { key, .. } => key,
        }
    }

    /// A missing key never matches.
    pub fn matches(&self, meta: &Meta) -> bool {
        match self {
            Self::Eq { key, value } => meta.get(key).is_some_and(|v| v == value),
            Self::Range { key, gte, lte } => meta.get(key).is_some_and(|v| {
                gte.as_deref().map_or(true, |lo| v.as_str() >= lo)
                    && lte.as_deref().map_or(true, |hi| v.as_str() <= hi)
            }),
        }
    }
}

impl fmt::Display for MetadataFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq { key, value } => write!(f, "{key}={value}"),
            Self::Range { key, gte, lte } => match (gte, lte) {
                (Some(lo), Some(hi)) => write!(f, "{key}>={lo},{key}<={hi}"),
                (Some(lo), None) => write!(f, "{key}>={lo}"),
                (None, Some(hi)) => write!(f, "{key}<={hi}"),
                (None, None) => write!(f, "{key}>="),
            },
        }
    }
}

/// Parses `key=value`, `key>=value` and `key<=value`.
impl FromStr for MetadataFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || Error::InvalidConfig(format!("bad filter '{s}': expected key=value, key>=value or key<=value"));
        if let Some((key, value)) = s.split_once(">=") {
            return non_empty(key).map(|k| Self::range(k, Some(value), None)).ok_or_else(bad);
        }
        if let Some((key, value)) = s.split_once("<=") {
            return non_empty(key).map(|k| Self::range(k, None, Some(value))).ok_or_else(bad);
        }
        if let Some((key, value)) = s.split_once('=') {
            return non_empty(key).map(|k| Self::eq(k, value)).ok_or_else(bad);
        }
        Err(bad())
    }
}

fn non_empty(key: &str) -> Option<&str> {
    let key = key.trim();
    (!key.is_empty()).then_some(key)
}

/// Filters for one retrieval.
///
/// `index` predicates are pushed into both index searches and applied before
/// scoring. `post` predicates are checked on fused results only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filters {
    #[serde(default)]
    pub index: Vec<MetadataFilter>,
    #[serde(default)]
    pub post: Vec<MetadataFilter>,
}

impl Filters {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn index(filters: Vec<MetadataFilter>) -> Self {
        Self { index: filters, post: Vec::new() }
    }

    pub fn with_post(mut self, filter: MetadataFilter) -> Self {
        self.post.push(filter);
        self
    }

    pub fn matches_index(&self, meta: &Meta) -> bool {
        all_match(&self.index, meta)
    }

    pub fn matches_post(&self, meta: &Meta) -> bool {
        all_match(&self.post, meta)
    }
}

pub fn all_match(filters: &[MetadataFilter], meta: &Meta) -> bool {
    filters.iter().all(|f| f.matches(meta))
}
