// src/services/arxiv.rs

//! arXiv adapter.
//!
//! Queries the Atom API by category and submission date and pages through
//! `opensearch:totalResults`.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use regex::Regex;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{Config, DateRange, Paper, PaperId, Source};
use crate::services::{PaperSource, PaperStream, checked_range};
use crate::utils::http::{AttemptBudget, PoliteClient};
use crate::utils::{non_empty, normalize_ws, parse_date};

static VERSIONED_ID: OnceLock<Option<Regex>> = OnceLock::new();

/// Adapter for the arXiv Atom API.
pub struct ArxivSource {
    client: PoliteClient,
    api_url: Url,
    page_size: usize,
    default_categories: Vec<String>,
}

impl ArxivSource {
    /// Create an adapter from the `[arxiv]` and `[http]` sections.
    pub fn new(config: &Config) -> Result<Self> {
        let settings = config.source(Source::Arxiv);
        Ok(Self {
            client: PoliteClient::new(Source::Arxiv, &config.http)?,
            api_url: Url::parse(settings.api_url)?,
            page_size: settings.page_size,
            default_categories: settings.categories.iter().map(|c| c.key.clone()).collect(),
        })
    }

    /// `(cat:A OR cat:B) AND submittedDate:[YYYYMMDD0000 TO YYYYMMDD2359]`
    fn search_query(categories: &[String], range: DateRange) -> String {
        let cats = categories
            .iter()
            .map(|c| format!("cat:{c}"))
            .collect::<Vec<_>>()
            .join(" OR ");
        let cats = if categories.len() > 1 {
            format!("({cats})")
        } else {
            cats
        };
        format!(
            "{cats} AND submittedDate:[{}0000 TO {}2359]",
            range.start.format("%Y%m%d"),
            range.end.format("%Y%m%d")
        )
    }

    fn page_url(&self, query: &str, start: usize) -> Url {
        let mut url = self.api_url.clone();
        url.query_pairs_mut()
            .append_pair("search_query", query)
            .append_pair("start", &start.to_string())
            .append_pair("max_results", &self.page_size.to_string())
            .append_pair("sortBy", "submittedDate")
            .append_pair("sortOrder", "descending");
        url
    }

    /// Fetch and normalize one page; returns papers, raw entry count and total.
    async fn fetch_page(
        &self,
        query: &str,
        start: usize,
        budget: &mut AttemptBudget,
    ) -> Result<(Vec<Paper>, usize, Option<usize>)> {
        let url = self.page_url(query, start);
        let body = self.client.get_text(&url, budget).await?;
        let page = parse_feed(&body).map_err(|e| {
            AppError::fetch_failed(Source::Arxiv, budget.used(), format!("bad Atom feed: {e}"))
        })?;

        let fetched_at = Utc::now();
        let seen = page.entries.len();
        let papers = page
            .entries
            .into_iter()
            .filter_map(|entry| match entry.into_paper(fetched_at) {
                Ok(paper) => Some(paper),
                Err(e) => {
                    log::warn!("[arXiv] Skipping entry: {}", e);
                    None
                }
            })
            .collect();
        Ok((papers, seen, page.total))
    }
}

struct Walk {
    query: String,
    offset: usize,
    budget: AttemptBudget,
}

impl PaperSource for ArxivSource {
    fn source(&self) -> Source {
        Source::Arxiv
    }

    fn fetch<'a>(
        &'a self,
        categories: &BTreeSet<String>,
        range: DateRange,
    ) -> Result<PaperStream<'a>> {
        let range = checked_range(range)?;
        // arXiv's taxonomy is open; requested categories are forwarded as-is.
        let categories: Vec<String> = if categories.is_empty() {
            self.default_categories.clone()
        } else {
            categories.iter().cloned().collect()
        };
        if categories.is_empty() {
            return Ok(stream::empty().boxed());
        }

        let walk = Walk {
            query: Self::search_query(&categories, range),
            offset: 0,
            budget: self.client.budget(),
        };
        log::info!("[arXiv] Searching: {}", walk.query);

        let pages = stream::unfold(Some(walk), move |state| async move {
            let mut walk = state?;
            match self.fetch_page(&walk.query, walk.offset, &mut walk.budget).await {
                Ok((papers, seen, total)) => {
                    walk.offset += seen;
                    let total = total.unwrap_or(walk.offset);
                    log::debug!(
                        "[arXiv] {}/{} entries fetched, {} failed requests",
                        walk.offset,
                        total,
                        walk.budget.failed()
                    );
                    let next = (seen > 0 && walk.offset < total).then_some(walk);
                    Some((papers.into_iter().map(Ok).collect::<Vec<_>>(), next))
                }
                Err(e) => Some((vec![Err(e)], None)),
            }
        });
        Ok(pages.flat_map(stream::iter).boxed())
    }
}

/// Parsed Atom response.
#[derive(Debug, Default)]
pub(crate) struct FeedPage {
    pub total: Option<usize>,
    pub entries: Vec<AtomEntry>,
}

/// One `<entry>` before normalization.
#[derive(Debug, Default)]
pub(crate) struct AtomEntry {
    id: String,
    title: String,
    summary: String,
    published: String,
    authors: Vec<String>,
    primary_category: Option<String>,
    categories: Vec<String>,
    abs_url: Option<String>,
    pdf_url: Option<String>,
    doi: Option<String>,
}

impl AtomEntry {
    fn read_attributes(&mut self, e: &BytesStart<'_>) {
        match e.local_name().as_ref() {
            b"category" => {
                if let Some(term) = attr(e, b"term") {
                    if !self.categories.contains(&term) {
                        self.categories.push(term);
                    }
                }
            }
            b"primary_category" => self.primary_category = attr(e, b"term"),
            b"link" => {
                let href = attr(e, b"href");
                let is_pdf = attr(e, b"title").as_deref() == Some("pdf")
                    || attr(e, b"type").as_deref() == Some("application/pdf");
                if is_pdf {
                    self.pdf_url = href;
                } else if attr(e, b"rel").as_deref() == Some("alternate") {
                    self.abs_url = href;
                }
            }
            _ => {}
        }
    }

    fn set_text(&mut self, tag: &[u8], value: String, in_author: bool) {
        match tag {
            b"id" => self.id = value,
            b"title" => self.title = value,
            b"summary" => self.summary = value,
            b"published" => self.published = value,
            b"name" if in_author && !value.is_empty() => self.authors.push(value),
            b"doi" => self.doi = non_empty(Some(&value)),
            _ => {}
        }
    }

    fn into_paper(self, fetched_at: DateTime<Utc>) -> Result<Paper> {
        let raw_id = self
            .id
            .rsplit_once("/abs/")
            .map(|(_, rest)| rest.trim())
            .filter(|rest| !rest.is_empty())
            .ok_or_else(|| {
                AppError::malformed(Source::Arxiv, format!("entry id '{}' is not an abs url", self.id))
            })?;
        let (native_id, version) = split_version(raw_id);
        if self.title.is_empty() {
            return Err(AppError::malformed(
                Source::Arxiv,
                format!("{native_id}: missing title"),
            ));
        }
        let published_date = parse_date(&self.published).ok_or_else(|| {
            AppError::malformed(
                Source::Arxiv,
                format!("{native_id}: unparseable published date '{}'", self.published),
            )
        })?;

        let mut categories = self.categories;
        if let Some(primary) = self.primary_category {
            categories.retain(|c| c != &primary);
            categories.insert(0, primary);
        }

        Ok(Paper {
            id: PaperId::new(Source::Arxiv, &native_id),
            title: self.title,
            abstract_text: self.summary,
            authors: self.authors,
            published_date,
            source: Source::Arxiv,
            categories,
            url: self
                .abs_url
                .unwrap_or_else(|| format!("https://arxiv.org/abs/{native_id}")),
            pdf_url: Some(
                self.pdf_url
                    .unwrap_or_else(|| format!("https://arxiv.org/pdf/{native_id}")),
            ),
            doi: self.doi,
            version,
            fetched_at,
            is_relevant: Default::default(),
        })
    }
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `2401.11111v2` -> (`2401.11111`, `Some("v2")`)
fn split_version(raw: &str) -> (String, Option<String>) {
    let re = VERSIONED_ID.get_or_init(|| Regex::new(r"^(.+?)(v\d+)$").ok());
    match re.as_ref().and_then(|re| re.captures(raw)) {
        Some(caps) => (caps[1].to_string(), Some(caps[2].to_string())),
        None => (raw.to_string(), None),
    }
}

/// Parse an arXiv Atom response.
pub(crate) fn parse_feed(body: &str) -> Result<FeedPage> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut page = FeedPage::default();
    let mut entry: Option<AtomEntry> = None;
    let mut in_author = false;
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(e) => {
                text.clear();
                match e.local_name().as_ref() {
                    b"entry" => entry = Some(AtomEntry::default()),
                    b"author" => in_author = true,
                    _ => {
                        if let Some(entry) = entry.as_mut() {
                            entry.read_attributes(&e);
                        }
                    }
                }
            }
            Event::Empty(e) => {
                if let Some(entry) = entry.as_mut() {
                    entry.read_attributes(&e);
                }
            }
            Event::Text(t) => {
                text.push_str(&t.unescape().map_err(quick_xml::Error::from)?);
            }
            Event::End(e) => {
                let value = normalize_ws(&text);
                text.clear();
                match e.local_name().as_ref() {
                    b"entry" => page.entries.extend(entry.take()),
                    b"author" => in_author = false,
                    b"totalResults" => page.total = value.parse().ok(),
                    tag => {
                        if let Some(entry) = entry.as_mut() {
                            entry.set_text(tag, value, in_author);
                        }
                    }
                }
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(page)
}
