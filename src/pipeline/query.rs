//! Filtered, paginated reads and aggregate counts.

use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::{
    CategoryInfo, Config, Paper, PaperFilter, PaperPage, PaperStats, QueryRequest, Relevance,
    SearchScope, Source,
};
use crate::storage::{PaperStore, ScanScope};

/// Lowercase, with underscores read as spaces.
fn fold(raw: &str) -> String {
    raw.trim().to_lowercase().replace('_', " ")
}

/// `term` equals `category` or is one of its ancestors (`q-bio` / `q-bio.BM`).
fn hierarchical_match(term: &str, category: &str) -> bool {
    category == term
        || category
            .strip_prefix(term)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// One requested category term, resolved against the taxonomies.
#[derive(Debug, Clone)]
enum CategoryTerm {
    /// Key of a configured taxonomy: matches only records of that source,
    /// through the key, its display name or any alias.
    Keyed { source: Source, names: Vec<String> },
    /// Anything else: plain text match against any record.
    Free(String),
}

impl CategoryTerm {
    fn keyed(source: Source, info: &CategoryInfo) -> Self {
        let names = std::iter::once(&info.key)
            .chain(std::iter::once(&info.name))
            .chain(info.aliases.iter())
            .map(|n| fold(n))
            .collect();
        CategoryTerm::Keyed { source, names }
    }

    fn matches(&self, paper: &Paper) -> bool {
        match self {
            CategoryTerm::Keyed { source, names } => {
                paper.source == *source
                    && paper.categories.iter().any(|c| {
                        let c = fold(c);
                        names.iter().any(|n| hierarchical_match(n, &c))
                    })
            }
            CategoryTerm::Free(term) => paper
                .categories
                .iter()
                .any(|c| hierarchical_match(term, &fold(c))),
        }
    }
}

/// Category filter compiled against the configured taxonomies.
#[derive(Debug, Clone, Default)]
pub struct CategoryMatcher {
    terms: Vec<CategoryTerm>,
}

impl CategoryMatcher {
    /// Resolve each requested string; a key known to several sources
    /// expands to one term per source.
    pub fn new<'a>(config: &Config, requested: impl IntoIterator<Item = &'a String>) -> Self {
        let mut terms = Vec::new();
        for raw in requested {
            let wanted = fold(raw);
            let keyed: Vec<CategoryTerm> = Source::ALL
                .iter()
                .flat_map(|&source| {
                    config
                        .taxonomy(source)
                        .iter()
                        .filter(|c| fold(&c.key) == wanted)
                        .map(move |c| CategoryTerm::keyed(source, c))
                })
                .collect();
            if keyed.is_empty() {
                terms.push(CategoryTerm::Free(wanted));
            } else {
                terms.extend(keyed);
            }
        }
        Self { terms }
    }

    /// No restriction when nothing was requested.
    pub fn matches(&self, paper: &Paper) -> bool {
        self.terms.is_empty() || self.terms.iter().any(|t| t.matches(paper))
    }
}

/// Read side over a paper store.
#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<dyn PaperStore>,
    config: Arc<Config>,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn PaperStore>, config: Arc<Config>) -> Self {
        Self { store, config }
    }

    /// One page of papers matching `filter`, newest first.
    pub async fn query(
        &self,
        filter: &PaperFilter,
        page: Option<usize>,
        page_size: Option<usize>,
    ) -> Result<PaperPage> {
        let page = page.unwrap_or(1);
        if page == 0 {
            return Err(AppError::validation("page must be >= 1"));
        }
        let page_size = match page_size {
            Some(0) => return Err(AppError::validation("page_size must be >= 1")),
            Some(size) => size.min(self.config.query.max_page_size),
            None => self.config.query.default_page_size,
        };

        let matching = self.filtered(filter).await?;
        let total = matching.len();
        let total_pages = total.div_ceil(page_size).max(1);
        let papers = matching
            .into_iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .collect();

        Ok(PaperPage {
            papers,
            total,
            page,
            page_size,
            total_pages,
        })
    }

    /// Aggregate counts over the set `query` would page through.
    pub async fn stats(&self, filter: &PaperFilter) -> Result<PaperStats> {
        let matching = self.filtered(filter).await?;

        let mut stats = PaperStats {
            total: matching.len(),
            ..Default::default()
        };
        for source in Source::ALL {
            stats.by_source.insert(source.name().to_string(), 0);
        }

        let mut key_terms = Vec::new();
        for source in Source::ALL {
            for info in self.config.taxonomy(source) {
                stats.by_category.entry(info.key.clone()).or_insert(0);
                key_terms.push((info.key.clone(), CategoryTerm::keyed(source, info)));
            }
        }

        for paper in &matching {
            match paper.is_relevant {
                Relevance::Relevant => stats.relevant += 1,
                Relevance::Irrelevant => stats.irrelevant += 1,
                Relevance::Untagged => stats.untagged += 1,
            }
            *stats
                .by_source
                .entry(paper.source.name().to_string())
                .or_insert(0) += 1;
            for (key, term) in &key_terms {
                if term.matches(paper) {
                    *stats.by_category.entry(key.clone()).or_insert(0) += 1;
                }
            }
        }

        Ok(stats)
    }

    /// Parse a wire request and run [`query`](Self::query).
    pub async fn query_request(&self, request: &QueryRequest) -> Result<PaperPage> {
        let filter = request.to_filter()?;
        self.query(&filter, request.page, request.page_size).await
    }

    /// Parse a wire request and run [`stats`](Self::stats).
    pub async fn stats_request(&self, request: &QueryRequest) -> Result<PaperStats> {
        self.stats(&request.to_filter()?).await
    }

    async fn filtered(&self, filter: &PaperFilter) -> Result<Vec<Paper>> {
        filter.validate()?;
        let categories = CategoryMatcher::new(&self.config, &filter.categories);
        let needle = filter.needle();

        let scope = ScanScope {
            sources: filter.sources.clone(),
            start: filter.date_start,
            end: filter.date_end,
        };

        let mut papers: Vec<Paper> = self
            .store
            .scan_scoped(&scope)
            .await?
            .into_iter()
            .filter(|p| filter.relevance.is_empty() || filter.relevance.contains(&p.is_relevant))
            .filter(|p| categories.matches(p))
            .filter(|p| {
                needle
                    .as_deref()
                    .is_none_or(|needle| search_matches(p, filter.scope, needle))
            })
            .collect();

        papers.sort_by(|a, b| {
            b.published_date
                .cmp(&a.published_date)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(papers)
    }
}

/// Case-insensitive substring search over the fields of `scope`.
fn search_matches(paper: &Paper, scope: SearchScope, needle: &str) -> bool {
    let contains = |text: &str| text.to_lowercase().contains(needle);
    match scope {
        SearchScope::Title => contains(&paper.title),
        SearchScope::Abstract => contains(&paper.abstract_text),
        SearchScope::Authors => paper.authors.iter().any(|a| contains(a)),
        SearchScope::All => {
            contains(&paper.title)
                || contains(&paper.abstract_text)
                || paper.authors.iter().any(|a| contains(a))
                || paper.categories.iter().any(|c| contains(c))
        }
    }
}
