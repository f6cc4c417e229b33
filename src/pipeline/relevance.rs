//! User relevance tagging.

use std::sync::Arc;

use crate::error::Result;
use crate::models::{PaperId, Relevance, RelevanceUpdate};
use crate::storage::{JsonMirror, PaperStore};

/// Applies relevance tags and keeps the mirror in step.
#[derive(Clone)]
pub struct RelevanceService {
    store: Arc<dyn PaperStore>,
    mirror: Option<JsonMirror>,
}

impl RelevanceService {
    pub fn new(store: Arc<dyn PaperStore>, mirror: Option<JsonMirror>) -> Self {
        Self { store, mirror }
    }

    /// Tag one paper. `NotFound` if the identity is unknown.
    pub async fn set_relevance(&self, id: &PaperId, relevance: Relevance) -> Result<()> {
        self.store.set_relevance(id, relevance).await?;
        log::info!("Marked {} as {}", id, relevance.status());

        if let Some(mirror) = &self.mirror {
            mirror.refresh_logged(self.store.as_ref()).await;
        }
        Ok(())
    }

    /// Apply a wire-shaped update.
    pub async fn apply(&self, update: &RelevanceUpdate) -> Result<()> {
        self.set_relevance(&update.paper_id, update.is_relevant).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::{Paper, Source};
    use crate::storage::SqliteStore;
    use chrono::{NaiveDate, Utc};
    use tempfile::TempDir;

    fn paper() -> Paper {
        Paper {
            id: PaperId::new(Source::Arxiv, "2401.11111"),
            title: "Docking".to_string(),
            abstract_text: "Abstract.".to_string(),
            authors: vec![],
            published_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            source: Source::Arxiv,
            categories: vec!["cs.AI".to_string()],
            url: "https://arxiv.org/abs/2401.11111".to_string(),
            pdf_url: None,
            doi: None,
            version: None,
            fetched_at: Utc::now(),
            is_relevant: Relevance::Untagged,
        }
    }

    #[tokio::test]
    async fn test_tag_refreshes_mirror() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        store.upsert_metadata(&paper()).await.unwrap();
        let mirror = JsonMirror::new(dir.path().join("papers.json"));
        let service = RelevanceService::new(store.clone(), Some(mirror.clone()));

        let update: RelevanceUpdate =
            serde_json::from_str(r#"{"paper_id":"arxiv:2401.11111","is_relevant":true}"#)
                .unwrap();
        service.apply(&update).await.unwrap();

        let stored = store.get(&paper().id).await.unwrap().unwrap();
        assert_eq!(stored.is_relevant, Relevance::Relevant);
        let mirrored = JsonMirror::load(mirror.path()).await.unwrap();
        assert_eq!(mirrored[0].is_relevant, Relevance::Relevant);

        service
            .set_relevance(&paper().id, Relevance::Untagged)
            .await
            .unwrap();
        let stored = store.get(&paper().id).await.unwrap().unwrap();
        assert_eq!(stored.is_relevant, Relevance::Untagged);
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let service = RelevanceService::new(store, None);
        let err = service
            .set_relevance(&PaperId::new(Source::Chemrxiv, "nope"), Relevance::Relevant)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
