//! SQLite storage implementation.
//!
//! One connection behind a mutex; every call runs on the blocking pool.
//! Schema versions are tracked in `PRAGMA user_version`.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

use crate::error::{AppError, Result};
use crate::models::{Paper, PaperId, Relevance, Source};
use crate::storage::{PaperStore, ScanScope};

const DATE_FORMAT: &str = "%Y-%m-%d";

struct Migration {
    version: u32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: "
        CREATE TABLE IF NOT EXISTS papers (
            paper_id        TEXT PRIMARY KEY,
            source          TEXT NOT NULL,
            title           TEXT NOT NULL,
            abstract        TEXT NOT NULL,
            authors         TEXT NOT NULL,
            published_date  TEXT NOT NULL,
            categories      TEXT NOT NULL,
            url             TEXT NOT NULL,
            pdf_url         TEXT,
            doi             TEXT,
            version         TEXT,
            fetched_at      TEXT NOT NULL,
            is_relevant     INTEGER,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_papers_source ON papers(source);
        CREATE INDEX IF NOT EXISTS idx_papers_published ON papers(published_date);
    ",
}];

const SELECT_COLUMNS: &str = "paper_id, source, title, abstract, authors, published_date, \
     categories, url, pdf_url, doi, version, fetched_at, is_relevant";

const UPSERT: &str = "
    INSERT INTO papers (
        paper_id, source, title, abstract, authors, published_date, categories,
        url, pdf_url, doi, version, fetched_at, is_relevant, created_at, updated_at
    )
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, NULL, ?13, ?13)
    ON CONFLICT(paper_id) DO UPDATE SET
        source = excluded.source,
        title = excluded.title,
        abstract = excluded.abstract,
        authors = excluded.authors,
        published_date = excluded.published_date,
        categories = excluded.categories,
        url = excluded.url,
        pdf_url = excluded.pdf_url,
        doi = excluded.doi,
        version = excluded.version,
        fetched_at = excluded.fetched_at,
        updated_at = excluded.updated_at
";

/// Latest schema version known by this binary.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// SQLite-backed paper store.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file and apply pending migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self::bootstrap(conn)?;
        log::info!("Opened paper store at {}", path.display());
        Ok(store)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(mut conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        apply_migrations(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| AppError::storage("connection mutex poisoned"))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| AppError::storage(format!("blocking task failed: {e}")))?
    }
}

fn apply_migrations(conn: &mut Connection) -> Result<()> {
    let current: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let latest = latest_version();
    if current > latest {
        return Err(AppError::storage(format!(
            "database schema version {current} is newer than supported {latest}"
        )));
    }
    if current == latest {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        tx.execute_batch(migration.sql)?;
        tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))?;
    }
    tx.commit()?;
    log::info!("Paper store migrated from schema {} to {}", current, latest);
    Ok(())
}

/// Raw column values of one `papers` row.
struct PaperRow {
    paper_id: String,
    source: String,
    title: String,
    abstract_text: String,
    authors: String,
    published_date: String,
    categories: String,
    url: String,
    pdf_url: Option<String>,
    doi: Option<String>,
    version: Option<String>,
    fetched_at: String,
    is_relevant: Option<bool>,
}

impl PaperRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            paper_id: row.get(0)?,
            source: row.get(1)?,
            title: row.get(2)?,
            abstract_text: row.get(3)?,
            authors: row.get(4)?,
            published_date: row.get(5)?,
            categories: row.get(6)?,
            url: row.get(7)?,
            pdf_url: row.get(8)?,
            doi: row.get(9)?,
            version: row.get(10)?,
            fetched_at: row.get(11)?,
            is_relevant: row.get(12)?,
        })
    }

    fn into_paper(self) -> Result<Paper> {
        let corrupt = |field: &str, detail: String| {
            AppError::storage(format!("row {} has bad {field}: {detail}", self.paper_id))
        };
        let id: PaperId = self.paper_id.parse()?;
        let source: Source = self.source.parse()?;
        let published_date = NaiveDate::parse_from_str(&self.published_date, DATE_FORMAT)
            .map_err(|e| corrupt("published_date", e.to_string()))?;
        let fetched_at = DateTime::parse_from_rfc3339(&self.fetched_at)
            .map_err(|e| corrupt("fetched_at", e.to_string()))?
            .with_timezone(&Utc);
        let authors: Vec<String> = serde_json::from_str(&self.authors)?;
        let categories: Vec<String> = serde_json::from_str(&self.categories)?;

        Ok(Paper {
            id,
            title: self.title,
            abstract_text: self.abstract_text,
            authors,
            published_date,
            source,
            categories,
            url: self.url,
            pdf_url: self.pdf_url,
            doi: self.doi,
            version: self.version,
            fetched_at,
            is_relevant: Relevance::from(self.is_relevant),
        })
    }
}

fn write_metadata(conn: &Connection, paper: &Paper) -> Result<()> {
    let authors = serde_json::to_string(&paper.authors)?;
    let categories = serde_json::to_string(&paper.categories)?;
    conn.execute(
        UPSERT,
        params![
            paper.id.as_str(),
            paper.source.name(),
            paper.title,
            paper.abstract_text,
            authors,
            paper.published_date.format(DATE_FORMAT).to_string(),
            categories,
            paper.url,
            paper.pdf_url,
            paper.doi,
            paper.version,
            paper.fetched_at.to_rfc3339(),
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Rows within `scope`, newest first. Rows that no longer decode are skipped.
fn select_scoped(conn: &Connection, scope: &ScanScope) -> Result<Vec<Paper>> {
    let mut clauses = Vec::new();
    let mut values: Vec<String> = Vec::new();
    if !scope.sources.is_empty() {
        let marks = vec!["?"; scope.sources.len()].join(", ");
        clauses.push(format!("source IN ({marks})"));
        values.extend(scope.sources.iter().map(|source| source.name().to_string()));
    }
    if let Some(start) = scope.start {
        clauses.push("published_date >= ?".to_string());
        values.push(start.format(DATE_FORMAT).to_string());
    }
    if let Some(end) = scope.end {
        clauses.push("published_date <= ?".to_string());
        values.push(end.format(DATE_FORMAT).to_string());
    }
    let filter = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM papers {filter} \
         ORDER BY published_date DESC, paper_id ASC"
    ))?;
    let rows = stmt.query_map(params_from_iter(values.iter()), PaperRow::from_row)?;

    let mut papers = Vec::new();
    for row in rows {
        match row.map_err(AppError::from).and_then(PaperRow::into_paper) {
            Ok(paper) => papers.push(paper),
            Err(e) => log::warn!("Skipping unreadable paper row: {}", e),
        }
    }
    Ok(papers)
}

#[async_trait]
impl PaperStore for SqliteStore {
    async fn get(&self, id: &PaperId) -> Result<Option<Paper>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {SELECT_COLUMNS} FROM papers WHERE paper_id = ?1"),
                    params![id],
                    PaperRow::from_row,
                )
                .optional()?;
            row.map(PaperRow::into_paper).transpose()
        })
        .await
    }

    async fn upsert_metadata(&self, paper: &Paper) -> Result<()> {
        let paper = paper.clone();
        self.with_conn(move |conn| {
            write_metadata(conn, &paper).map_err(|e| AppError::store_write(&paper.id, e))
        })
        .await
    }

    async fn set_relevance(&self, id: &PaperId, relevance: Relevance) -> Result<()> {
        let id = id.clone();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE papers SET is_relevant = ?2, updated_at = ?3 WHERE paper_id = ?1",
                params![id.as_str(), relevance.as_flag(), Utc::now().to_rfc3339()],
            )?;
            if changed == 0 {
                return Err(AppError::not_found(&id));
            }
            Ok(())
        })
        .await
    }

    async fn scan(&self) -> Result<Vec<Paper>> {
        self.scan_scoped(&ScanScope::default()).await
    }

    async fn scan_scoped(&self, scope: &ScanScope) -> Result<Vec<Paper>> {
        let scope = scope.clone();
        self.with_conn(move |conn| select_scoped(conn, &scope)).await
    }

    async fn count(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM papers", [], |row| row.get(0))?;
            Ok(usize::try_from(count).unwrap_or_default())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn paper(native: &str, day: u32) -> Paper {
        Paper {
            id: PaperId::new(Source::Arxiv, native),
            title: format!("Paper {native}"),
            abstract_text: "Abstract.".to_string(),
            authors: vec!["Ada Lovelace".to_string(), "Alan Turing".to_string()],
            published_date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            source: Source::Arxiv,
            categories: vec!["cs.AI".to_string()],
            url: format!("https://arxiv.org/abs/{native}"),
            pdf_url: None,
            doi: None,
            version: Some("v1".to_string()),
            fetched_at: Utc::now(),
            is_relevant: Relevance::Untagged,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_get_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let original = paper("2401.11111", 15);
        store.upsert_metadata(&original).await.unwrap();

        let loaded = store.get(&original.id).await.unwrap().unwrap();
        assert!(!loaded.metadata_differs(&original));
        assert_eq!(loaded.is_relevant, Relevance::Untagged);
        assert!(
            store
                .get(&PaperId::new(Source::Arxiv, "missing"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_upsert_keeps_relevance() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut record = paper("2401.11111", 15);
        store.upsert_metadata(&record).await.unwrap();
        store
            .set_relevance(&record.id, Relevance::Relevant)
            .await
            .unwrap();

        record.title = "Corrected title".to_string();
        record.is_relevant = Relevance::Irrelevant;
        store.upsert_metadata(&record).await.unwrap();

        let loaded = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "Corrected title");
        assert_eq!(loaded.is_relevant, Relevance::Relevant);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_set_relevance_unknown_id() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store
            .set_relevance(&PaperId::new(Source::Biorxiv, "10.1101/x"), Relevance::Relevant)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_scan_orders_by_date_then_id() {
        let store = SqliteStore::open_in_memory().unwrap();
        for record in [paper("b", 10), paper("a", 10), paper("c", 20)] {
            store.upsert_metadata(&record).await.unwrap();
        }
        let ids: Vec<_> = store
            .scan()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id.to_string())
            .collect();
        assert_eq!(ids, vec!["arxiv:c", "arxiv:a", "arxiv:b"]);
    }

    #[tokio::test]
    async fn test_scoped_scan_filters_in_sql() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut bio = paper("10.1101/x", 12);
        bio.id = PaperId::new(Source::Biorxiv, "10.1101/x");
        bio.source = Source::Biorxiv;
        for record in [paper("a", 5), paper("b", 15), paper("c", 25), bio] {
            store.upsert_metadata(&record).await.unwrap();
        }

        let scope = ScanScope {
            sources: BTreeSet::from([Source::Arxiv]),
            start: NaiveDate::from_ymd_opt(2024, 1, 10),
            end: NaiveDate::from_ymd_opt(2024, 1, 25),
        };
        let ids: Vec<_> = store
            .scan_scoped(&scope)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id.to_string())
            .collect();
        assert_eq!(ids, vec!["arxiv:c", "arxiv:b"]);

        let everything = store.scan_scoped(&ScanScope::default()).await.unwrap();
        assert_eq!(everything.len(), 4);
    }

    #[tokio::test]
    async fn test_scan_skips_undecodable_rows() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_metadata(&paper("good", 3)).await.unwrap();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO papers (paper_id, source, title, abstract, authors, published_date, \
                 categories, url, fetched_at, created_at, updated_at) \
                 VALUES ('arxiv:bad', 'arXiv', 't', 'a', 'not json', '2024-01-04', '[]', 'u', \
                 '2024-01-04T00:00:00Z', 'x', 'x')",
                [],
            )
            .unwrap();
        }

        let papers = store.scan().await.unwrap();
        assert_eq!(papers.len(), 1);
        assert_eq!(papers[0].id.as_str(), "arxiv:good");
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_file_store_persists_and_migrates_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("papers.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.upsert_metadata(&paper("2401.1", 1)).await.unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.count().await.unwrap(), 1);

        let conn = Connection::open(&path).unwrap();
        let version: u32 = conn
            .query_row("PRAGMA user_version;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, latest_version());
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("papers.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch("PRAGMA user_version = 999;").unwrap();
        drop(conn);

        assert!(matches!(
            SqliteStore::open(&path),
            Err(AppError::Storage(_))
        ));
    }
}
