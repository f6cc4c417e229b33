//! Storage abstractions for paper persistence.
//!
//! The primary store is SQLite; a JSON mirror of every record is written
//! after committed batches as a portable backup.
//!
//! ## Directory Structure
//!
//! ```text
//! {data_dir}/
//! ├── papers.db             # Primary store (SQLite)
//! └── papers.json           # Mirror: pretty-printed array of papers
//! ```

mod mirror;
mod sqlite;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;
use crate::models::{Paper, PaperId, Relevance, Source};

// Re-export for convenience
pub use mirror::JsonMirror;
pub use sqlite::SqliteStore;

/// Predicates a store can apply itself: sources and an inclusive date window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanScope {
    /// Empty means every source
    pub sources: BTreeSet<Source>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl ScanScope {
    pub fn admits(&self, paper: &Paper) -> bool {
        (self.sources.is_empty() || self.sources.contains(&paper.source))
            && self.start.is_none_or(|start| paper.published_date >= start)
            && self.end.is_none_or(|end| paper.published_date <= end)
    }
}

/// Trait for paper storage backends.
#[async_trait]
pub trait PaperStore: Send + Sync {
    /// Look up one paper by identity.
    async fn get(&self, id: &PaperId) -> Result<Option<Paper>>;

    /// Insert a paper, or overwrite the metadata of an existing one.
    ///
    /// The stored relevance tag is never touched; new rows start untagged.
    async fn upsert_metadata(&self, paper: &Paper) -> Result<()>;

    /// Set the relevance tag; `NotFound` if no such paper.
    async fn set_relevance(&self, id: &PaperId, relevance: Relevance) -> Result<()>;

    /// Every stored paper, newest first.
    async fn scan(&self) -> Result<Vec<Paper>>;

    /// Stored papers within `scope`, newest first.
    async fn scan_scoped(&self, scope: &ScanScope) -> Result<Vec<Paper>> {
        let papers = self.scan().await?;
        Ok(papers.into_iter().filter(|p| scope.admits(p)).collect())
    }

    /// Number of stored papers.
    async fn count(&self) -> Result<usize>;
}
