//! Pipeline entry points for tracker operations.
//!
//! - `Reconciler`: merge fetched papers into the store
//! - `UpdateOrchestrator`: fetch from sources and reconcile
//! - `QueryEngine`: filtered pages and stats
//! - `RelevanceService`: user tagging
//! - `transfer`: JSON export/import

pub mod query;
pub mod reconcile;
pub mod relevance;
pub mod transfer;
pub mod update;

pub use query::{CategoryMatcher, QueryEngine};
pub use reconcile::{ReconcileSummary, Reconciler};
pub use relevance::RelevanceService;
pub use transfer::{ImportSummary, export, import};
pub use update::{SourceOutcome, UpdateOrchestrator, resolve_range};
