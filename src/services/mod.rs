//! Source adapters for the paper tracker.
//!
//! Each preprint service sits behind [`PaperSource`]:
//! - arXiv Atom API (`ArxivSource`)
//! - bioRxiv details API (`BiorxivSource`)
//! - ChemRxiv public API (`ChemrxivSource`)

mod arxiv;
mod biorxiv;
mod chemrxiv;

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::stream::BoxStream;

use crate::error::Result;
use crate::models::{CategoryInfo, Config, DateRange, Paper, Source};

pub use arxiv::ArxivSource;
pub use biorxiv::BiorxivSource;
pub use chemrxiv::ChemrxivSource;

/// Lazy, finite stream of normalized papers.
///
/// Pages are requested as the stream is polled. A terminal `Err` means the
/// source gave up; papers yielded before it stay valid.
pub type PaperStream<'a> = BoxStream<'a, Result<Paper>>;

/// A preprint service that can be searched by category and date.
pub trait PaperSource: Send + Sync {
    /// Which service this adapter talks to.
    fn source(&self) -> Source;

    /// Fetch papers in `categories` published within `range`.
    ///
    /// An empty category set means every known category of the source.
    /// An inverted range is rejected before any request is sent.
    fn fetch<'a>(
        &'a self,
        categories: &BTreeSet<String>,
        range: DateRange,
    ) -> Result<PaperStream<'a>>;
}

/// Build one adapter per supported source.
pub fn build_sources(config: &Config) -> Result<Vec<Arc<dyn PaperSource>>> {
    Ok(vec![
        Arc::new(ArxivSource::new(config)?),
        Arc::new(BiorxivSource::new(config)?),
        Arc::new(ChemrxivSource::new(config)?),
    ])
}

/// Map requested category strings onto a closed taxonomy.
///
/// Result follows taxonomy order. Unknown strings are logged and dropped.
/// An empty request selects the whole taxonomy.
pub(crate) fn select_categories<'a>(
    source: Source,
    taxonomy: &'a [CategoryInfo],
    requested: &BTreeSet<String>,
) -> Vec<&'a CategoryInfo> {
    if requested.is_empty() {
        return taxonomy.iter().collect();
    }

    for raw in requested {
        if !taxonomy.iter().any(|c| c.accepts(raw)) {
            log::warn!("[{}] Unknown category '{}', skipping", source, raw);
        }
    }
    taxonomy
        .iter()
        .filter(|c| requested.iter().any(|raw| c.accepts(raw)))
        .collect()
}

/// Re-check a range that may have been built field by field.
pub(crate) fn checked_range(range: DateRange) -> Result<DateRange> {
    DateRange::new(range.start, range.end)
}
