//! Canonical paper record shared by every source adapter.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Preprint service a paper was fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Source {
    #[serde(rename = "arXiv")]
    Arxiv,
    #[serde(rename = "bioRxiv")]
    Biorxiv,
    #[serde(rename = "ChemRxiv")]
    Chemrxiv,
}

impl Source {
    /// Every supported source, in display order.
    pub const ALL: [Source; 3] = [Source::Arxiv, Source::Biorxiv, Source::Chemrxiv];

    /// Display name used in stats and summaries.
    pub fn name(&self) -> &'static str {
        match self {
            Source::Arxiv => "arXiv",
            Source::Biorxiv => "bioRxiv",
            Source::Chemrxiv => "ChemRxiv",
        }
    }

    /// Lowercase prefix used in paper identities.
    pub fn prefix(&self) -> &'static str {
        match self {
            Source::Arxiv => "arxiv",
            Source::Biorxiv => "biorxiv",
            Source::Chemrxiv => "chemrxiv",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Source {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "arxiv" => Ok(Source::Arxiv),
            "biorxiv" => Ok(Source::Biorxiv),
            "chemrxiv" => Ok(Source::Chemrxiv),
            other => Err(AppError::validation(format!("unknown source '{other}'"))),
        }
    }
}

/// Stable identity of a paper: `{source prefix}:{native id}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaperId(String);

impl PaperId {
    /// Build an identity from a source and its native id.
    pub fn new(source: Source, native_id: &str) -> Self {
        Self(format!("{}:{}", source.prefix(), native_id.trim()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PaperId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let (prefix, native) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| AppError::validation(format!("paper id '{s}' has no source prefix")))?;
        let source: Source = prefix.parse()?;
        if native.trim().is_empty() {
            return Err(AppError::validation(format!("paper id '{s}' has no native id")));
        }
        Ok(PaperId::new(source, native))
    }
}

/// User-assigned relevance tag.
///
/// Serialized as `true` / `false` / `null`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Option<bool>", into = "Option<bool>")]
pub enum Relevance {
    Relevant,
    Irrelevant,
    #[default]
    Untagged,
}

impl Relevance {
    pub fn as_flag(self) -> Option<bool> {
        match self {
            Relevance::Relevant => Some(true),
            Relevance::Irrelevant => Some(false),
            Relevance::Untagged => None,
        }
    }

    /// Filter/status name: `relevant`, `irrelevant` or `untagged`.
    pub fn status(self) -> &'static str {
        match self {
            Relevance::Relevant => "relevant",
            Relevance::Irrelevant => "irrelevant",
            Relevance::Untagged => "untagged",
        }
    }
}

// Ordered by status name so filter sets iterate deterministically.
impl PartialOrd for Relevance {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Relevance {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.status().cmp(other.status())
    }
}

impl From<Option<bool>> for Relevance {
    fn from(flag: Option<bool>) -> Self {
        match flag {
            Some(true) => Relevance::Relevant,
            Some(false) => Relevance::Irrelevant,
            None => Relevance::Untagged,
        }
    }
}

impl From<Relevance> for Option<bool> {
    fn from(relevance: Relevance) -> Self {
        relevance.as_flag()
    }
}

impl FromStr for Relevance {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "relevant" | "true" | "1" => Ok(Relevance::Relevant),
            "irrelevant" | "false" | "0" => Ok(Relevance::Irrelevant),
            "untagged" | "null" | "none" => Ok(Relevance::Untagged),
            other => Err(AppError::validation(format!(
                "unknown relevance status '{other}'"
            ))),
        }
    }
}

/// Inclusive calendar date range for fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Build a range, rejecting `start > end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(AppError::invalid_range(start, end));
        }
        Ok(Self { start, end })
    }
}

/// A paper normalized from any source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    pub id: PaperId,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    /// Author names in publication order
    pub authors: Vec<String>,
    pub published_date: NaiveDate,
    pub source: Source,
    pub categories: Vec<String>,
    pub url: String,
    #[serde(default)]
    pub pdf_url: Option<String>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub is_relevant: Relevance,
}

impl Paper {
    /// Whether any adapter-derived field differs from `other`.
    ///
    /// `fetched_at` and `is_relevant` are not metadata.
    pub fn metadata_differs(&self, other: &Paper) -> bool {
        self.title != other.title
            || self.abstract_text != other.abstract_text
            || self.authors != other.authors
            || self.published_date != other.published_date
            || self.categories != other.categories
            || self.url != other.url
            || self.pdf_url != other.pdf_url
            || self.doi != other.doi
            || self.version != other.version
    }
}
