// src/services/biorxiv.rs

//! bioRxiv adapter.
//!
//! Walks `details/biorxiv/{start}/{end}/{cursor}` once per category,
//! advancing the cursor by the page count reported in `messages[0]`.

use std::collections::{BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{CategoryInfo, Config, DateRange, Paper, PaperId, Source};
use crate::services::{PaperSource, PaperStream, checked_range, select_categories};
use crate::utils::http::{AttemptBudget, PoliteClient};
use crate::utils::{non_empty, normalize_ws, parse_date};

/// Only original research postings are ingested.
const NEW_RESULTS: &str = "new results";

/// Adapter for the bioRxiv details API.
pub struct BiorxivSource {
    client: PoliteClient,
    api_url: String,
    taxonomy: Vec<CategoryInfo>,
}

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    #[serde(default)]
    messages: Vec<DetailsMessage>,
    #[serde(default)]
    collection: Vec<DetailsItem>,
}

#[derive(Debug, Deserialize)]
struct DetailsMessage {
    #[serde(default)]
    status: String,
    // The API reports these as numbers or numeric strings.
    #[serde(default)]
    count: Option<Value>,
    #[serde(default)]
    total: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DetailsItem {
    doi: Option<String>,
    title: Option<String>,
    authors: Option<String>,
    date: Option<String>,
    version: Option<Value>,
    #[serde(rename = "type")]
    kind: Option<String>,
    category: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
}

impl DetailsItem {
    fn is_new_results(&self) -> bool {
        self.kind
            .as_deref()
            .is_some_and(|kind| kind.trim().eq_ignore_ascii_case(NEW_RESULTS))
    }

    fn into_paper(self, fallback_category: &str, fetched_at: DateTime<Utc>) -> Result<Paper> {
        let doi = non_empty(self.doi.as_deref())
            .ok_or_else(|| AppError::malformed(Source::Biorxiv, "record without doi"))?;
        let title = normalize_ws(self.title.as_deref().unwrap_or_default());
        if title.is_empty() {
            return Err(AppError::malformed(
                Source::Biorxiv,
                format!("{doi}: missing title"),
            ));
        }
        let raw_date = self.date.unwrap_or_default();
        let published_date = parse_date(&raw_date).ok_or_else(|| {
            AppError::malformed(
                Source::Biorxiv,
                format!("{doi}: unparseable date '{raw_date}'"),
            )
        })?;

        let category = non_empty(self.category.as_deref())
            .unwrap_or_else(|| fallback_category.to_string());

        Ok(Paper {
            id: PaperId::new(Source::Biorxiv, &doi),
            title,
            abstract_text: normalize_ws(self.abstract_text.as_deref().unwrap_or_default()),
            authors: parse_authors(self.authors.as_deref().unwrap_or_default()),
            published_date,
            source: Source::Biorxiv,
            categories: vec![category],
            url: format!("https://www.biorxiv.org/content/{doi}"),
            pdf_url: Some(format!("https://www.biorxiv.org/content/{doi}.full.pdf")),
            version: self.version.as_ref().and_then(value_to_string),
            doi: Some(doi),
            fetched_at,
            is_relevant: Default::default(),
        })
    }
}

/// One normalized page and whether its category walk is finished.
struct DetailsPage {
    papers: Vec<Paper>,
    exhausted: bool,
    count: usize,
}

struct Walk {
    /// (category key, API parameter) still to walk; front is current
    pending: VecDeque<(String, String)>,
    cursor: usize,
    range: DateRange,
    budget: AttemptBudget,
}

impl BiorxivSource {
    /// Create an adapter from the `[biorxiv]` and `[http]` sections.
    pub fn new(config: &Config) -> Result<Self> {
        let settings = config.source(Source::Biorxiv);
        Url::parse(settings.api_url)?;
        Ok(Self {
            client: PoliteClient::new(Source::Biorxiv, &config.http)?,
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            taxonomy: settings.categories.to_vec(),
        })
    }

    fn page_url(&self, param: &str, range: DateRange, cursor: usize) -> Result<Url> {
        let mut url = Url::parse(&format!(
            "{}/{}/{}/{}",
            self.api_url,
            range.start.format("%Y-%m-%d"),
            range.end.format("%Y-%m-%d"),
            cursor
        ))?;
        url.query_pairs_mut().append_pair("category", param);
        Ok(url)
    }

    async fn fetch_page(
        &self,
        key: &str,
        param: &str,
        range: DateRange,
        cursor: usize,
        budget: &mut AttemptBudget,
    ) -> Result<DetailsPage> {
        let url = self.page_url(param, range, cursor)?;
        let response: DetailsResponse = self.client.get_json(&url, budget).await?;

        let Some(message) = response.messages.first() else {
            log::warn!("[bioRxiv] {}: response without messages", key);
            return Ok(DetailsPage {
                papers: Vec::new(),
                exhausted: true,
                count: 0,
            });
        };
        if !message.status.eq_ignore_ascii_case("ok") {
            // "no posts found" is how the API reports an empty window.
            log::info!("[bioRxiv] {}: {}", key, message.status);
            return Ok(DetailsPage {
                papers: Vec::new(),
                exhausted: true,
                count: 0,
            });
        }

        let count = message
            .count
            .as_ref()
            .and_then(value_to_usize)
            .unwrap_or(response.collection.len());
        let total = message
            .total
            .as_ref()
            .and_then(value_to_usize)
            .unwrap_or(cursor + count);
        let exhausted = count == 0 || cursor + count >= total;
        log::debug!(
            "[bioRxiv] {}: cursor {} got {} of {}",
            key,
            cursor,
            count,
            total
        );

        let fetched_at = Utc::now();
        let papers = response
            .collection
            .into_iter()
            .filter(DetailsItem::is_new_results)
            .filter_map(|item| match item.into_paper(key, fetched_at) {
                Ok(paper) => Some(paper),
                Err(e) => {
                    log::warn!("[bioRxiv] Skipping record: {}", e);
                    None
                }
            })
            .collect();

        Ok(DetailsPage {
            papers,
            exhausted,
            count,
        })
    }

    async fn step(&self, mut walk: Walk) -> (Vec<Result<Paper>>, Option<Walk>) {
        let Some((key, param)) = walk.pending.front().cloned() else {
            return (Vec::new(), None);
        };

        match self
            .fetch_page(&key, &param, walk.range, walk.cursor, &mut walk.budget)
            .await
        {
            Ok(page) => {
                if page.exhausted {
                    walk.pending.pop_front();
                    walk.cursor = 0;
                } else {
                    walk.cursor += page.count;
                }
                let next = (!walk.pending.is_empty()).then_some(walk);
                (page.papers.into_iter().map(Ok).collect(), next)
            }
            Err(e) => (vec![Err(e)], None),
        }
    }
}

impl PaperSource for BiorxivSource {
    fn source(&self) -> Source {
        Source::Biorxiv
    }

    fn fetch<'a>(
        &'a self,
        categories: &BTreeSet<String>,
        range: DateRange,
    ) -> Result<PaperStream<'a>> {
        let range = checked_range(range)?;
        let pending: VecDeque<_> = select_categories(Source::Biorxiv, &self.taxonomy, categories)
            .into_iter()
            .map(|info| (info.key.clone(), info.remote_key().replace(' ', "_")))
            .collect();
        if pending.is_empty() {
            return Ok(stream::empty().boxed());
        }

        let walk = Walk {
            pending,
            cursor: 0,
            range,
            budget: self.client.budget(),
        };
        let pages = stream::unfold(Some(walk), move |state| async move {
            let walk = state?;
            Some(self.step(walk).await)
        });
        Ok(pages.flat_map(stream::iter).boxed())
    }
}

/// `"Doe, Jane; Roe, R."` -> `["Jane Doe", "R. Roe"]`
fn parse_authors(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|author| !author.is_empty())
        .map(|author| match author.split_once(',') {
            Some((last, first)) => normalize_ws(&format!("{} {}", first.trim(), last.trim())),
            None => normalize_ws(author),
        })
        .collect()
}

fn value_to_usize(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => non_empty(Some(s.as_str())),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
