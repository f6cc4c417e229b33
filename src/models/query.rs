//! Request and response shapes of the update and read paths.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{Paper, PaperId, Relevance, Source};

/// Field set a keyword search looks at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchScope {
    #[default]
    Title,
    Abstract,
    Authors,
    /// Title, abstract, authors and categories
    All,
}

impl FromStr for SearchScope {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "title" => Ok(SearchScope::Title),
            "abstract" => Ok(SearchScope::Abstract),
            "authors" => Ok(SearchScope::Authors),
            "all" => Ok(SearchScope::All),
            other => Err(AppError::validation(format!(
                "search scope must be title, abstract, authors or all, got '{other}'"
            ))),
        }
    }
}

/// Filter shared by `query` and `stats`.
///
/// Dimensions combine with AND; values inside one dimension with OR.
/// An empty set means no restriction on that dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaperFilter {
    pub sources: BTreeSet<Source>,
    pub categories: BTreeSet<String>,
    pub relevance: BTreeSet<Relevance>,
    pub date_start: Option<NaiveDate>,
    pub date_end: Option<NaiveDate>,
    pub search: Option<String>,
    pub scope: SearchScope,
}

impl PaperFilter {
    /// Reject inverted date bounds.
    pub fn validate(&self) -> Result<()> {
        if let (Some(start), Some(end)) = (self.date_start, self.date_end) {
            if start > end {
                return Err(AppError::invalid_range(start, end));
            }
        }
        Ok(())
    }

    /// Non-empty, lowercased search needle.
    pub fn needle(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }
}

/// Wire shape of a query or stats request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub source: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub relevance_status: Vec<String>,
    #[serde(default)]
    pub date_start: Option<NaiveDate>,
    #[serde(default)]
    pub date_end: Option<NaiveDate>,
    #[serde(default)]
    pub search_query: Option<String>,
    #[serde(default)]
    pub search_scope: Option<String>,
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub page_size: Option<usize>,
}

impl QueryRequest {
    /// Parse the loosely typed request into a filter.
    pub fn to_filter(&self) -> Result<PaperFilter> {
        let sources = self
            .source
            .iter()
            .map(|s| s.parse::<Source>())
            .collect::<Result<BTreeSet<_>>>()?;
        let relevance = self
            .relevance_status
            .iter()
            .map(|s| s.parse::<Relevance>())
            .collect::<Result<BTreeSet<_>>>()?;
        let scope = match self.search_scope.as_deref() {
            Some(scope) => scope.parse()?,
            None => SearchScope::default(),
        };
        let categories = self
            .categories
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .map(String::from)
            .collect();

        let filter = PaperFilter {
            sources,
            categories,
            relevance,
            date_start: self.date_start,
            date_end: self.date_end,
            search: self.search_query.clone(),
            scope,
        };
        filter.validate()?;
        Ok(filter)
    }
}

/// One page of filtered papers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperPage {
    pub papers: Vec<Paper>,
    /// Matching papers before pagination
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
}

/// Aggregate counts over a filtered set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperStats {
    pub total: usize,
    pub relevant: usize,
    pub irrelevant: usize,
    pub untagged: usize,
    pub by_source: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
}

/// Wire shape of an update request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub sources: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

/// Result of an update run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSummary {
    pub message: String,
    pub new_papers: usize,
    pub total_papers: usize,
    pub updated_sources: Vec<String>,
}

/// Wire shape of a relevance update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevanceUpdate {
    pub paper_id: PaperId,
    pub is_relevant: Relevance,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_to_filter() {
        let request = QueryRequest {
            source: vec!["arxiv".into(), "bioRxiv".into()],
            categories: vec!["cs.AI".into(), " ".into()],
            relevance_status: vec!["untagged".into()],
            search_query: Some("Docking".into()),
            search_scope: Some("all".into()),
            ..Default::default()
        };
        let filter = request.to_filter().unwrap();
        assert_eq!(filter.sources.len(), 2);
        assert_eq!(filter.categories.len(), 1);
        assert!(filter.relevance.contains(&Relevance::Untagged));
        assert_eq!(filter.scope, SearchScope::All);
        assert_eq!(filter.needle().as_deref(), Some("docking"));
    }

    #[test]
    fn test_request_rejects_inverted_dates() {
        let request = QueryRequest {
            date_start: NaiveDate::from_ymd_opt(2024, 3, 1),
            date_end: NaiveDate::from_ymd_opt(2024, 2, 1),
            ..Default::default()
        };
        assert!(matches!(
            request.to_filter(),
            Err(AppError::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_request_rejects_unknown_scope() {
        let request = QueryRequest {
            search_scope: Some("doi".into()),
            ..Default::default()
        };
        assert!(request.to_filter().is_err());
    }

    #[test]
    fn test_relevance_update_wire_shape() {
        let update: RelevanceUpdate =
            serde_json::from_str(r#"{"paper_id":"arxiv:2401.11111","is_relevant":false}"#)
                .unwrap();
        assert_eq!(update.is_relevant, Relevance::Irrelevant);
        assert_eq!(update.paper_id.as_str(), "arxiv:2401.11111");
    }
}
