// src/services/chemrxiv.rs

//! ChemRxiv adapter.
//!
//! Walks the public `items` endpoint once per category id with
//! `limit`/`skip` paging until `totalCount` is reached.

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

const ARTICLE_URL: &str = "https://chemrxiv.org/engage/chemrxiv/article-details";

/// Adapter for the ChemRxiv public API.
pub struct ChemrxivSource {
    client: PoliteClient,
    api_url: Url,
    page_size: usize,
    taxonomy: Vec<CategoryInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemsResponse {
    #[serde(default)]
    total_count: usize,
    #[serde(default)]
    item_hits: Vec<ItemHit>,
}

#[derive(Debug, Deserialize)]
struct ItemHit {
    #[serde(default)]
    item: Item,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Item {
    id: Option<String>,
    doi: Option<String>,
    title: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    authors: Vec<ItemAuthor>,
    categories: Vec<ItemCategory>,
    published_date: Option<String>,
    asset: Option<ItemAsset>,
    version: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ItemAuthor {
    first_name: Option<String>,
    last_name: Option<String>,
}

impl ItemAuthor {
    fn display_name(&self) -> Option<String> {
        let first = self.first_name.as_deref().unwrap_or_default();
        let last = self.last_name.as_deref().unwrap_or_default();
        non_empty(Some(normalize_ws(&format!("{first} {last}")).as_str()))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ItemCategory {
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ItemAsset {
    original: Option<AssetFile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AssetFile {
    url: Option<String>,
}

impl Item {
    fn into_paper(self, fetched_at: DateTime<Utc>) -> Result<Paper> {
        let doi = non_empty(self.doi.as_deref());
        let native_id = non_empty(self.id.as_deref())
            .or_else(|| doi.clone())
            .ok_or_else(|| AppError::malformed(Source::Chemrxiv, "item without id or doi"))?;
        let title = normalize_ws(self.title.as_deref().unwrap_or_default());
        if title.is_empty() {
            return Err(AppError::malformed(
                Source::Chemrxiv,
                format!("{native_id}: missing title"),
            ));
        }
        let raw_date = self.published_date.unwrap_or_default();
        let published_date = parse_date(&raw_date).ok_or_else(|| {
            AppError::malformed(
                Source::Chemrxiv,
                format!("{native_id}: unparseable publishedDate '{raw_date}'"),
            )
        })?;

        let mut categories: Vec<String> = Vec::new();
        for name in self.categories.iter().filter_map(|c| non_empty(c.name.as_deref())) {
            if !categories.contains(&name) {
                categories.push(name);
            }
        }

        Ok(Paper {
            id: PaperId::new(Source::Chemrxiv, &native_id),
            title,
            abstract_text: normalize_ws(self.abstract_text.as_deref().unwrap_or_default()),
            authors: self.authors.iter().filter_map(ItemAuthor::display_name).collect(),
            published_date,
            source: Source::Chemrxiv,
            categories,
            url: format!("{ARTICLE_URL}/{native_id}"),
            pdf_url: self
                .asset
                .and_then(|asset| asset.original)
                .and_then(|file| non_empty(file.url.as_deref())),
            doi,
            version: self.version.as_ref().and_then(|v| match v {
                Value::String(s) => non_empty(Some(s.as_str())),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            }),
            fetched_at,
            is_relevant: Default::default(),
        })
    }
}

struct Walk {
    /// (category key, remote category id) still to walk; front is current
    pending: VecDeque<(String, String)>,
    skip: usize,
    range: DateRange,
    budget: AttemptBudget,
}

impl ChemrxivSource {
    /// Create an adapter from the `[chemrxiv]` and `[http]` sections.
    pub fn new(config: &Config) -> Result<Self> {
        let settings = config.source(Source::Chemrxiv);
        Ok(Self {
            client: PoliteClient::new(Source::Chemrxiv, &config.http)?,
            api_url: Url::parse(settings.api_url)?,
            page_size: settings.page_size,
            taxonomy: settings.categories.to_vec(),
        })
    }

    fn page_url(&self, category_id: &str, range: DateRange, skip: usize) -> Url {
        let mut url = self.api_url.clone();
        url.query_pairs_mut()
            .append_pair("limit", &self.page_size.to_string())
            .append_pair("skip", &skip.to_string())
            .append_pair("sort", "PUBLISHED_DATE_DESC")
            .append_pair("searchDateFrom", &range.start.format("%Y-%m-%d").to_string())
            .append_pair("searchDateTo", &range.end.format("%Y-%m-%d").to_string())
            .append_pair("categoryIds", category_id);
        url
    }

    async fn step(&self, mut walk: Walk) -> (Vec<Result<Paper>>, Option<Walk>) {
        let Some((key, category_id)) = walk.pending.front().cloned() else {
            return (Vec::new(), None);
        };

        let url = self.page_url(&category_id, walk.range, walk.skip);
        let response: ItemsResponse = match self.client.get_json(&url, &mut walk.budget).await {
            Ok(response) => response,
            Err(e) => return (vec![Err(e)], None),
        };

        let count = response.item_hits.len();
        log::debug!(
            "[ChemRxiv] {}: skip {} got {} of {}",
            key,
            walk.skip,
            count,
            response.total_count
        );
        if count == 0 || walk.skip + count >= response.total_count {
            walk.pending.pop_front();
            walk.skip = 0;
        } else {
            walk.skip += count;
        }

        let fetched_at = Utc::now();
        let papers = response
            .item_hits
            .into_iter()
            .filter_map(|hit| match hit.item.into_paper(fetched_at) {
                Ok(paper) => Some(Ok(paper)),
                Err(e) => {
                    log::warn!("[ChemRxiv] Skipping item: {}", e);
                    None
                }
            })
            .collect();
        let next = (!walk.pending.is_empty()).then_some(walk);
        (papers, next)
    }
}

impl PaperSource for ChemrxivSource {
    fn source(&self) -> Source {
        Source::Chemrxiv
    }

    fn fetch<'a>(
        &'a self,
        categories: &BTreeSet<String>,
        range: DateRange,
    ) -> Result<PaperStream<'a>> {
        let range = checked_range(range)?;
        let pending: VecDeque<_> = select_categories(Source::Chemrxiv, &self.taxonomy, categories)
            .into_iter()
            .map(|info| (info.key.clone(), info.remote_key().to_string()))
            .collect();
        if pending.is_empty() {
            return Ok(stream::empty().boxed());
        }

        let walk = Walk {
            pending,
            skip: 0,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::http::testing::fast_config;
    use chrono::NaiveDate;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn hit(id: &str) -> Value {
        json!({
            "item": {
                "id": id,
                "doi": format!("10.26434/chemrxiv-{id}"),
                "title": " Machine-learned  potentials ",
                "abstract": "Abstract\ntext.",
                "authors": [
                    {"firstName": "Marie", "lastName": "Curie"},
                    {"firstName": "", "lastName": "Pauling"}
                ],
                "categories": [
                    {"id": "605c72ef153207001f6470ce", "name": "Theoretical and Computational Chemistry"},
                    {"id": "x", "name": "Machine Learning"}
                ],
                "publishedDate": "2024-01-20T08:15:00.000Z",
                "asset": {"original": {"url": format!("https://chemrxiv.org/{id}.pdf")}},
                "version": "1"
            }
        })
    }

    fn page(total: usize, hits: Vec<Value>) -> String {
        json!({"totalCount": total, "itemHits": hits}).to_string()
    }

    fn january() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        )
        .unwrap()
    }

    fn source_for(base: &str, page_size: usize) -> ChemrxivSource {
        let mut config = Config::default();
        config.http = fast_config();
        config.chemrxiv.api_url = format!("{base}/items");
        config.chemrxiv.page_size = page_size;
        ChemrxivSource::new(&config).unwrap()
    }

    #[test]
    fn test_item_normalization() {
        let hit: ItemHit = serde_json::from_value(hit("65a1b2")).unwrap();
        let paper = hit.item.into_paper(Utc::now()).unwrap();
        assert_eq!(paper.id.as_str(), "chemrxiv:65a1b2");
        assert_eq!(paper.title, "Machine-learned potentials");
        assert_eq!(paper.abstract_text, "Abstract text.");
        assert_eq!(paper.authors, vec!["Marie Curie", "Pauling"]);
        assert_eq!(
            paper.categories,
            vec!["Theoretical and Computational Chemistry", "Machine Learning"]
        );
        assert_eq!(
            paper.published_date,
            NaiveDate::from_ymd_opt(2024, 1, 20).unwrap()
        );
        assert_eq!(paper.url, format!("{ARTICLE_URL}/65a1b2"));
        assert_eq!(paper.pdf_url.as_deref(), Some("https://chemrxiv.org/65a1b2.pdf"));
        assert_eq!(paper.doi.as_deref(), Some("10.26434/chemrxiv-65a1b2"));
    }

    #[test]
    fn test_item_without_identity_is_malformed() {
        let item = Item {
            title: Some("Orphan".into()),
            published_date: Some("2024-01-01".into()),
            ..Default::default()
        };
        assert!(matches!(
            item.into_paper(Utc::now()),
            Err(AppError::MalformedRecord { .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_pages_with_skip() {
        let mut server = Server::new_async().await;
        let first = server
            .mock("GET", "/items")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("skip".to_string(), "0".to_string()),
                Matcher::UrlEncoded("limit".to_string(), "2".to_string()),
                Matcher::UrlEncoded(
                    "categoryIds".to_string(),
                    "605c72ef153207001f6470ce".to_string(),
                ),
                Matcher::UrlEncoded("searchDateFrom".to_string(), "2024-01-01".to_string()),
                Matcher::UrlEncoded("searchDateTo".to_string(), "2024-01-31".to_string()),
                Matcher::UrlEncoded("sort".to_string(), "PUBLISHED_DATE_DESC".to_string()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(page(3, vec![hit("a"), hit("b")]))
            .expect(1)
            .create_async()
            .await;
        let second = server
            .mock("GET", "/items")
            .match_query(Matcher::UrlEncoded("skip".to_string(), "2".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(page(3, vec![hit("c")]))
            .expect(1)
            .create_async()
            .await;
        let source = source_for(&server.url(), 2);
        let categories = BTreeSet::from(["theoretical_computational".to_string()]);

        let results: Vec<_> = source.fetch(&categories, january()).unwrap().collect().await;
        let ids: Vec<_> = results
            .iter()
            .map(|r| r.as_ref().unwrap().id.to_string())
            .collect();
        assert_eq!(ids, vec!["chemrxiv:a", "chemrxiv:b", "chemrxiv:c"]);
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_result_is_success() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/items")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(page(0, vec![]))
            .expect(1)
            .create_async()
            .await;
        let source = source_for(&server.url(), 50);
        let categories = BTreeSet::from(["biological_medicinal".to_string()]);

        let results: Vec<_> = source.fetch(&categories, january()).unwrap().collect().await;
        assert!(results.is_empty());
        mock.assert_async().await;
    }
}
