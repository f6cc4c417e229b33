//! Update orchestration: fetch from every requested source and reconcile.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use futures::StreamExt;
use futures::future::join_all;

use crate::error::{AppError, Result};
use crate::models::{Config, DateRange, Paper, Source, UpdateRequest, UpdateSummary};
use crate::pipeline::{ReconcileSummary, Reconciler};
use crate::services::PaperSource;
use crate::storage::{JsonMirror, PaperStore};

/// What one source contributed to an update.
#[derive(Debug)]
pub struct SourceOutcome {
    pub source: Source,
    pub summary: ReconcileSummary,
    /// Set when the fetch gave up before exhausting the source
    pub error: Option<AppError>,
}

/// Drives adapters and feeds their streams through reconciliation.
pub struct UpdateOrchestrator {
    config: Arc<Config>,
    sources: Vec<Arc<dyn PaperSource>>,
    store: Arc<dyn PaperStore>,
    reconciler: Reconciler,
}

impl UpdateOrchestrator {
    pub fn new(
        config: Arc<Config>,
        sources: Vec<Arc<dyn PaperSource>>,
        store: Arc<dyn PaperStore>,
        mirror: Option<JsonMirror>,
    ) -> Self {
        let reconciler = Reconciler::new(Arc::clone(&store), mirror);
        Self {
            config,
            sources,
            store,
            reconciler,
        }
    }

    /// Run one update.
    ///
    /// Request errors (bad range, no usable source) are returned before any
    /// request is sent. A failing source never aborts the others.
    pub async fn update(&self, request: &UpdateRequest) -> Result<UpdateSummary> {
        let today = Utc::now().date_naive();
        let range = resolve_range(request, today, self.config.update.days_back)?;
        let selected = parse_sources(&request.sources)?;

        log::info!(
            "Updating {} from {} to {}",
            selected
                .iter()
                .map(Source::name)
                .collect::<Vec<_>>()
                .join(", "),
            range.start,
            range.end
        );

        let jobs = self
            .sources
            .iter()
            .filter(|adapter| selected.contains(&adapter.source()))
            .filter_map(|adapter| {
                let categories = self.scope_categories(adapter.source(), &request.categories)?;
                Some(self.run_source(adapter.as_ref(), categories, range))
            });
        let outcomes = join_all(jobs).await;

        let mut new_papers = 0;
        let mut updated_sources = Vec::new();
        for outcome in outcomes {
            new_papers += outcome.summary.inserted;
            match &outcome.error {
                None => {
                    log::info!(
                        "[{}] {} new, {} updated, {} unchanged, {} failed",
                        outcome.source,
                        outcome.summary.inserted,
                        outcome.summary.updated,
                        outcome.summary.skipped,
                        outcome.summary.failed
                    );
                    updated_sources.push(outcome.source.name().to_string());
                }
                Some(e) => log::error!("[{}] Update failed: {}", outcome.source, e),
            }
        }

        let total_papers = self.store.count().await?;
        let message = if updated_sources.is_empty() {
            "No sources were updated".to_string()
        } else {
            format!(
                "Successfully updated papers from {}",
                updated_sources.join(", ")
            )
        };

        Ok(UpdateSummary {
            message,
            new_papers,
            total_papers,
            updated_sources,
        })
    }

    /// Categories of `request` that belong to `source`.
    ///
    /// `None` means the request named categories but none of them apply
    /// here, so the source is left out of the update.
    fn scope_categories(&self, source: Source, requested: &[String]) -> Option<BTreeSet<String>> {
        let requested: Vec<&str> = requested
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .collect();
        if requested.is_empty() {
            return Some(BTreeSet::new());
        }

        let claimed_by =
            |raw: &str, source: Source| self.config.find_category(source, raw).is_some();
        let scoped: BTreeSet<String> = requested
            .into_iter()
            .filter(|&raw| match source {
                Source::Biorxiv | Source::Chemrxiv => claimed_by(raw, source),
                // arXiv's taxonomy is open: it takes whatever the others do not claim
                Source::Arxiv => {
                    !claimed_by(raw, Source::Biorxiv) && !claimed_by(raw, Source::Chemrxiv)
                }
            })
            .map(String::from)
            .collect();

        if scoped.is_empty() {
            log::info!("[{}] No requested category applies, skipping", source);
            return None;
        }
        Some(scoped)
    }

    async fn run_source(
        &self,
        adapter: &dyn PaperSource,
        categories: BTreeSet<String>,
        range: DateRange,
    ) -> SourceOutcome {
        let source = adapter.source();
        let mut outcome = SourceOutcome {
            source,
            summary: ReconcileSummary::default(),
            error: None,
        };

        let mut stream = match adapter.fetch(&categories, range) {
            Ok(stream) => stream,
            Err(e) => {
                outcome.error = Some(e);
                return outcome;
            }
        };

        let batch_size = self.config.update.batch_size.max(1);
        let mut batch: Vec<Paper> = Vec::with_capacity(batch_size);
        while let Some(item) = stream.next().await {
            match item {
                Ok(paper) => {
                    batch.push(paper);
                    if batch.len() >= batch_size {
                        let full = std::mem::take(&mut batch);
                        outcome.summary += self.reconciler.reconcile(full).await;
                    }
                }
                Err(e) => {
                    outcome.error = Some(e);
                    break;
                }
            }
        }

        if outcome.error.is_some() && !self.config.update.keep_partial {
            if !batch.is_empty() {
                log::warn!("[{}] Discarding {} partially fetched papers", source, batch.len());
            }
        } else if !batch.is_empty() {
            outcome.summary += self.reconciler.reconcile(batch).await;
        }
        outcome
    }
}

/// Fill in default dates and reject inverted ranges.
pub fn resolve_range(
    request: &UpdateRequest,
    today: NaiveDate,
    days_back: i64,
) -> Result<DateRange> {
    let end = request.end_date.unwrap_or(today);
    let start = request
        .start_date
        .unwrap_or_else(|| end - Duration::days(days_back.max(0)));
    DateRange::new(start, end)
}

/// Parse source names case-insensitively; unknown names are skipped.
fn parse_sources(names: &[String]) -> Result<BTreeSet<Source>> {
    let mut selected = BTreeSet::new();
    for name in names {
        match name.parse::<Source>() {
            Ok(source) => {
                selected.insert(source);
            }
            Err(_) => log::warn!("Unsupported source '{}', skipping", name),
        }
    }
    if selected.is_empty() {
        return Err(AppError::validation("No valid sources provided"));
    }
    Ok(selected)
}
