// src/models/mod.rs

//! Domain models for the paper tracker.
//!
//! Records, configuration and the request/response shapes of the
//! update and read paths.

mod config;
mod paper;
mod query;

// Re-export all public types
pub use config::{
    CatalogueEntry, CategoryInfo, Config, HttpConfig, QueryConfig, SourceCatalogue,
    SourceSettings, StorageConfig, UpdateConfig,
};
pub use paper::{DateRange, Paper, PaperId, Relevance, Source};
pub use query::{
    PaperFilter, PaperPage, PaperStats, QueryRequest, RelevanceUpdate, SearchScope,
    UpdateRequest, UpdateSummary,
};
