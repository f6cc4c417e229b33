//! Export the store to a JSON file and import one back.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::Relevance;
use crate::pipeline::{ReconcileSummary, Reconciler};
use crate::storage::{JsonMirror, PaperStore};

/// Outcome of an import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub read: usize,
    pub reconciled: ReconcileSummary,
    /// Tags from the file applied to untagged stored papers
    pub tags_applied: usize,
}

/// Write every stored paper to `path`. Returns the number written.
pub async fn export(store: &dyn PaperStore, path: impl AsRef<Path>) -> Result<usize> {
    let written = JsonMirror::new(path.as_ref()).refresh(store).await?;
    log::info!("Exported {} papers to {}", written, path.as_ref().display());
    Ok(written)
}

/// Load a JSON array of papers through reconciliation.
///
/// Metadata follows the usual insert/update/skip rules. A tag carried by the
/// file is applied only where the stored paper is still untagged.
pub async fn import(
    path: impl AsRef<Path>,
    store: Arc<dyn PaperStore>,
    mirror: Option<JsonMirror>,
    batch_size: usize,
) -> Result<ImportSummary> {
    let papers = JsonMirror::load(path.as_ref()).await?;
    let reconciler = Reconciler::new(Arc::clone(&store), mirror.clone());

    let mut summary = ImportSummary {
        read: papers.len(),
        ..Default::default()
    };
    for chunk in papers.chunks(batch_size.max(1)) {
        summary.reconciled += reconciler.reconcile(chunk.to_vec()).await;
    }

    for paper in papers.iter().filter(|p| p.is_relevant != Relevance::Untagged) {
        let Some(stored) = store.get(&paper.id).await? else {
            continue;
        };
        if stored.is_relevant == Relevance::Untagged {
            store.set_relevance(&paper.id, paper.is_relevant).await?;
            summary.tags_applied += 1;
        }
    }

    if summary.tags_applied > 0 {
        if let Some(mirror) = &mirror {
            mirror.refresh_logged(store.as_ref()).await;
        }
    }

    log::info!(
        "Imported {} papers from {}: {} new, {} updated, {} tags applied",
        summary.read,
        path.as_ref().display(),
        summary.reconciled.inserted,
        summary.reconciled.updated,
        summary.tags_applied
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Paper, PaperId, Source};
    use crate::storage::SqliteStore;
    use chrono::{NaiveDate, Utc};
    use tempfile::TempDir;

    fn paper(native: &str, relevance: Relevance) -> Paper {
        Paper {
            id: PaperId::new(Source::Biorxiv, native),
            title: format!("Paper {native}"),
            abstract_text: "Abstract.".to_string(),
            authors: vec!["Rosalind Franklin".to_string()],
            published_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            source: Source::Biorxiv,
            categories: vec!["biophysics".to_string()],
            url: format!("https://www.biorxiv.org/content/{native}"),
            pdf_url: None,
            doi: Some(native.to_string()),
            version: Some("1".to_string()),
            fetched_at: Utc::now(),
            is_relevant: relevance,
        }
    }

    #[tokio::test]
    async fn test_import_applies_tags_only_to_untagged() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());

        let kept = paper("10.1101/kept", Relevance::Untagged);
        store.upsert_metadata(&kept).await.unwrap();
        store
            .set_relevance(&kept.id, Relevance::Irrelevant)
            .await
            .unwrap();

        let file = dir.path().join("import.json");
        JsonMirror::new(&file)
            .write(&[
                paper("10.1101/kept", Relevance::Relevant),
                paper("10.1101/new", Relevance::Relevant),
                paper("10.1101/plain", Relevance::Untagged),
            ])
            .await
            .unwrap();

        let summary = import(&file, store.clone(), None, 2).await.unwrap();
        assert_eq!(summary.read, 3);
        assert_eq!(summary.reconciled.inserted, 2);
        assert_eq!(summary.reconciled.skipped, 1);
        assert_eq!(summary.tags_applied, 1);

        let kept = store.get(&kept.id).await.unwrap().unwrap();
        assert_eq!(kept.is_relevant, Relevance::Irrelevant);
        let new = store
            .get(&PaperId::new(Source::Biorxiv, "10.1101/new"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(new.is_relevant, Relevance::Relevant);
    }

    #[tokio::test]
    async fn test_export_then_import_into_empty_store() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(SqliteStore::open_in_memory().unwrap());
        let tagged = paper("10.1101/a", Relevance::Untagged);
        source.upsert_metadata(&tagged).await.unwrap();
        source
            .set_relevance(&tagged.id, Relevance::Relevant)
            .await
            .unwrap();

        let file = dir.path().join("export.json");
        assert_eq!(export(source.as_ref(), &file).await.unwrap(), 1);

        let target = Arc::new(SqliteStore::open_in_memory().unwrap());
        let summary = import(&file, target.clone(), None, 100).await.unwrap();
        assert_eq!(summary.reconciled.inserted, 1);
        let copied = target.get(&tagged.id).await.unwrap().unwrap();
        assert_eq!(copied.is_relevant, Relevance::Relevant);
    }
}
