//! JSON mirror of the paper store.
//!
//! A pretty-printed array of every stored paper, rewritten after committed
//! writes. It is a portable backup and the input format of `import`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::Paper;
use crate::storage::PaperStore;

/// Mirror file writer.
///
/// Clones share one write lock, so concurrent refreshes never interleave on
/// the temp file and the last one to finish holds the newest snapshot.
#[derive(Debug, Clone)]
pub struct JsonMirror {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl JsonMirror {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `papers` atomically (write to temp, then rename).
    pub async fn write(&self, papers: &[Paper]) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.write_locked(papers).await
    }

    async fn write_locked(&self, papers: &[Paper]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(papers)?;

        let tmp = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Rewrite the mirror from the full store contents.
    pub async fn refresh(&self, store: &dyn PaperStore) -> Result<usize> {
        // Scan under the lock so a later refresh never writes an older snapshot.
        let _guard = self.lock.lock().await;
        let papers = store.scan().await?;
        self.write_locked(&papers).await?;
        log::debug!(
            "Mirrored {} papers to {}",
            papers.len(),
            self.path.display()
        );
        Ok(papers.len())
    }

    /// Like [`refresh`](Self::refresh), but failures are only logged.
    pub async fn refresh_logged(&self, store: &dyn PaperStore) {
        if let Err(e) = self.refresh(store).await {
            log::warn!("Mirror refresh of {} failed: {}", self.path.display(), e);
        }
    }

    /// Read a mirror file (or any JSON array of papers).
    pub async fn load(path: impl AsRef<Path>) -> Result<Vec<Paper>> {
        let path = path.as_ref();
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::validation(format!(
                    "mirror file {} does not exist",
                    path.display()
                )));
            }
            Err(e) => return Err(AppError::Io(e)),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PaperId, Relevance, Source};
    use crate::storage::SqliteStore;
    use chrono::{NaiveDate, Utc};
    use tempfile::TempDir;

    fn paper(native: &str) -> Paper {
        Paper {
            id: PaperId::new(Source::Chemrxiv, native),
            title: "Solvation".to_string(),
            abstract_text: "Free energies.".to_string(),
            authors: vec!["Marie Curie".to_string()],
            published_date: NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
            source: Source::Chemrxiv,
            categories: vec!["Theoretical and Computational Chemistry".to_string()],
            url: format!("https://chemrxiv.org/engage/chemrxiv/article-details/{native}"),
            pdf_url: None,
            doi: Some("10.26434/chemrxiv-2024-abc".to_string()),
            version: Some("1".to_string()),
            fetched_at: Utc::now(),
            is_relevant: Relevance::Untagged,
        }
    }

    #[tokio::test]
    async fn test_write_then_load() {
        let dir = TempDir::new().unwrap();
        let mirror = JsonMirror::new(dir.path().join("out").join("papers.json"));
        mirror.write(&[paper("abc")]).await.unwrap();

        let loaded = JsonMirror::load(mirror.path()).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id.as_str(), "chemrxiv:abc");
        assert!(!mirror.path().with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_refresh_reflects_store_tags() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open_in_memory().unwrap();
        let record = paper("abc");
        store.upsert_metadata(&record).await.unwrap();
        store
            .set_relevance(&record.id, Relevance::Relevant)
            .await
            .unwrap();

        let mirror = JsonMirror::new(dir.path().join("papers.json"));
        assert_eq!(mirror.refresh(&store).await.unwrap(), 1);

        let raw = std::fs::read_to_string(mirror.path()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json[0]["is_relevant"], true);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_refreshes_all_succeed() {
        let dir = TempDir::new().unwrap();
        let store = std::sync::Arc::new(SqliteStore::open_in_memory().unwrap());
        let mirror = JsonMirror::new(dir.path().join("papers.json"));

        for round in 0..10 {
            for n in 0..20 {
                let record = paper(&format!("r{round}-{n}"));
                store.upsert_metadata(&record).await.unwrap();
            }
            let refreshes = (0..4).map(|_| {
                let mirror = mirror.clone();
                let store = std::sync::Arc::clone(&store);
                tokio::spawn(async move { mirror.refresh(store.as_ref()).await })
            });
            for outcome in futures::future::join_all(refreshes).await {
                assert!(outcome.unwrap().is_ok());
            }

            let mirrored = JsonMirror::load(mirror.path()).await.unwrap();
            assert_eq!(mirrored.len(), store.count().await.unwrap());
        }
        assert!(!mirror.path().with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = JsonMirror::load(dir.path().join("absent.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
