//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::Source;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP politeness and retry settings shared by all adapters
    #[serde(default)]
    pub http: HttpConfig,

    /// arXiv Atom API settings
    #[serde(default)]
    pub arxiv: SourceConfig<ArxivDefaults>,

    /// bioRxiv details API settings
    #[serde(default)]
    pub biorxiv: SourceConfig<BiorxivDefaults>,

    /// ChemRxiv public API settings
    #[serde(default)]
    pub chemrxiv: SourceConfig<ChemrxivDefaults>,

    /// Primary store and JSON mirror locations
    #[serde(default)]
    pub storage: StorageConfig,

    /// Update orchestration settings
    #[serde(default)]
    pub update: UpdateConfig,

    /// Query pagination settings
    #[serde(default)]
    pub query: QueryConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.http.user_agent.trim().is_empty() {
            return Err(AppError::validation("http.user_agent is empty"));
        }
        if self.http.timeout_secs == 0 {
            return Err(AppError::validation("http.timeout_secs must be > 0"));
        }
        if self.http.max_attempts == 0 {
            return Err(AppError::validation("http.max_attempts must be > 0"));
        }
        if self.http.backoff_max_ms < self.http.backoff_base_ms {
            return Err(AppError::validation(
                "http.backoff_max_ms must be >= http.backoff_base_ms",
            ));
        }
        for source in Source::ALL {
            let section = self.source(source);
            if section.api_url.trim().is_empty() {
                return Err(AppError::validation(format!(
                    "{}.api_url is empty",
                    source.prefix()
                )));
            }
            if section.page_size == 0 {
                return Err(AppError::validation(format!(
                    "{}.page_size must be > 0",
                    source.prefix()
                )));
            }
            if section.categories.is_empty() {
                return Err(AppError::validation(format!(
                    "No categories defined for {}",
                    source
                )));
            }
        }
        if self
            .chemrxiv
            .categories
            .iter()
            .any(|c| c.remote_id.as_deref().is_none_or(|id| id.trim().is_empty()))
        {
            return Err(AppError::validation(
                "every chemrxiv category needs a remote_id",
            ));
        }
        if self.update.batch_size == 0 {
            return Err(AppError::validation("update.batch_size must be > 0"));
        }
        if self.query.default_page_size == 0
            || self.query.default_page_size > self.query.max_page_size
        {
            return Err(AppError::validation(
                "query.default_page_size must be within 1..=query.max_page_size",
            ));
        }
        Ok(())
    }

    /// Common settings of one source section.
    pub fn source(&self, source: Source) -> SourceSettings<'_> {
        match source {
            Source::Arxiv => self.arxiv.settings(),
            Source::Biorxiv => self.biorxiv.settings(),
            Source::Chemrxiv => self.chemrxiv.settings(),
        }
    }

    /// Known taxonomy of a source.
    pub fn taxonomy(&self, source: Source) -> &[CategoryInfo] {
        self.source(source).categories
    }

    /// Taxonomy entry of `source` named by `raw` (key, display name or alias).
    pub fn find_category(&self, source: Source, raw: &str) -> Option<&CategoryInfo> {
        self.taxonomy(source).iter().find(|c| c.accepts(raw))
    }

    /// Sources with their category keys and display names.
    pub fn catalogue(&self) -> Vec<SourceCatalogue> {
        Source::ALL
            .iter()
            .map(|&source| SourceCatalogue {
                id: source.prefix().to_string(),
                name: source.name().to_string(),
                categories: self
                    .taxonomy(source)
                    .iter()
                    .map(|c| CatalogueEntry {
                        id: c.key.clone(),
                        name: c.name.clone(),
                    })
                    .collect(),
            })
            .collect()
    }
}

/// HTTP client, politeness and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Minimum delay between two requests of one client, in milliseconds
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,

    /// Retries of a single request after a transient failure
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// Ceiling on failed requests during one fetch invocation; successful pages are free
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// First backoff delay in milliseconds; doubles per retry
    #[serde(default = "defaults::backoff_base")]
    pub backoff_base_ms: u64,

    /// Upper bound for a single backoff delay
    #[serde(default = "defaults::backoff_max")]
    pub backoff_max_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            request_delay_ms: defaults::request_delay(),
            max_retries: defaults::max_retries(),
            max_attempts: defaults::max_attempts(),
            backoff_base_ms: defaults::backoff_base(),
            backoff_max_ms: defaults::backoff_max(),
        }
    }
}

/// One category of a source taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryInfo {
    /// Key used in requests and filters (e.g. `cs.AI`, `bioinformatics`)
    pub key: String,

    /// Human-readable name
    pub name: String,

    /// Identifier the remote API expects, when it differs from the key
    #[serde(default)]
    pub remote_id: Option<String>,

    /// Category names the source reports on records for this key
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl CategoryInfo {
    fn new(key: &str, name: &str) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            remote_id: None,
            aliases: Vec::new(),
        }
    }

    /// Whether `raw` names this category.
    ///
    /// Case-insensitive; underscores and spaces are interchangeable.
    pub fn accepts(&self, raw: &str) -> bool {
        let wanted = fold_category(raw);
        fold_category(&self.key) == wanted
            || fold_category(&self.name) == wanted
            || self.aliases.iter().any(|a| fold_category(a) == wanted)
    }

    /// Identifier sent to the remote API.
    pub fn remote_key(&self) -> &str {
        self.remote_id.as_deref().unwrap_or(&self.key)
    }
}

fn fold_category(raw: &str) -> String {
    raw.trim().to_lowercase().replace('_', " ")
}

/// Per-source defaults for [`SourceConfig`].
pub trait SourceDefaults {
    fn api_url() -> String;
    fn page_size() -> usize;
    fn categories() -> Vec<CategoryInfo>;
}

/// Endpoint, page size and taxonomy of one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct SourceConfig<D: SourceDefaults> {
    #[serde(default = "D::api_url")]
    pub api_url: String,

    #[serde(default = "D::page_size")]
    pub page_size: usize,

    #[serde(default = "D::categories")]
    pub categories: Vec<CategoryInfo>,

    #[serde(skip)]
    _defaults: std::marker::PhantomData<D>,
}

impl<D: SourceDefaults> SourceConfig<D> {
    pub fn settings(&self) -> SourceSettings<'_> {
        SourceSettings {
            api_url: &self.api_url,
            page_size: self.page_size,
            categories: &self.categories,
        }
    }
}

impl<D: SourceDefaults> Default for SourceConfig<D> {
    fn default() -> Self {
        Self {
            api_url: D::api_url(),
            page_size: D::page_size(),
            categories: D::categories(),
            _defaults: std::marker::PhantomData,
        }
    }
}

/// Borrowed view over any source section.
#[derive(Debug, Clone, Copy)]
pub struct SourceSettings<'a> {
    pub api_url: &'a str,
    pub page_size: usize,
    pub categories: &'a [CategoryInfo],
}

#[derive(Debug, Clone, Default)]
pub struct ArxivDefaults;

impl SourceDefaults for ArxivDefaults {
    fn api_url() -> String {
        "https://export.arxiv.org/api/query".into()
    }
    fn page_size() -> usize {
        100
    }
    fn categories() -> Vec<CategoryInfo> {
        vec![
            CategoryInfo::new("physics.chem-ph", "Physics - Chemical Physics"),
            CategoryInfo::new("cs.AI", "Computer Science - Artificial Intelligence"),
            CategoryInfo::new("cs.LG", "Computer Science - Machine Learning"),
            CategoryInfo::new("q-bio", "Quantitative Biology"),
        ]
    }
}

#[derive(Debug, Clone, Default)]
pub struct BiorxivDefaults;

impl SourceDefaults for BiorxivDefaults {
    fn api_url() -> String {
        "https://api.biorxiv.org/details/biorxiv".into()
    }
    // The API pages in fixed blocks of 100 and ignores this value.
    fn page_size() -> usize {
        100
    }
    fn categories() -> Vec<CategoryInfo> {
        vec![
            CategoryInfo::new("biochemistry", "Biochemistry"),
            CategoryInfo::new("bioinformatics", "Bioinformatics"),
            CategoryInfo::new("biophysics", "Biophysics"),
            CategoryInfo::new("synthetic biology", "Synthetic Biology"),
        ]
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChemrxivDefaults;

impl SourceDefaults for ChemrxivDefaults {
    fn api_url() -> String {
        "https://chemrxiv.org/engage/chemrxiv/public-api/v1/items".into()
    }
    fn page_size() -> usize {
        50
    }
    fn categories() -> Vec<CategoryInfo> {
        vec![
            CategoryInfo {
                key: "theoretical_computational".into(),
                name: "Theoretical and Computational Chemistry".into(),
                remote_id: Some("605c72ef153207001f6470ce".into()),
                aliases: vec![
                    "Theoretical and Computational Chemistry".into(),
                    "Theory - Computational".into(),
                    "Computational Chemistry and Modeling".into(),
                    "Chemoinformatics - Computational Chemistry".into(),
                ],
            },
            CategoryInfo {
                key: "biological_medicinal".into(),
                name: "Biological and Medicinal Chemistry".into(),
                remote_id: Some("605c72ef153207001f6470d0".into()),
                aliases: vec![
                    "Biological and Medicinal Chemistry".into(),
                    "Biochemistry".into(),
                    "Bioinformatics and Computational Biology".into(),
                ],
            },
        ]
    }
}

/// Primary store and mirror file names, relative to the data directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "defaults::database_file")]
    pub database_file: String,

    /// JSON mirror; empty disables it
    #[serde(default = "defaults::mirror_file")]
    pub mirror_file: String,
}

impl StorageConfig {
    pub fn database_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.database_file)
    }

    pub fn mirror_path(&self, data_dir: &Path) -> Option<PathBuf> {
        (!self.mirror_file.trim().is_empty()).then(|| data_dir.join(&self.mirror_file))
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_file: defaults::database_file(),
            mirror_file: defaults::mirror_file(),
        }
    }
}

/// Update orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Window used when the request carries no start date
    #[serde(default = "defaults::days_back")]
    pub days_back: i64,

    /// Candidates reconciled per store round-trip
    #[serde(default = "defaults::batch_size")]
    pub batch_size: usize,

    /// Keep records fetched before a source failed
    #[serde(default = "defaults::keep_partial")]
    pub keep_partial: bool,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            days_back: defaults::days_back(),
            batch_size: defaults::batch_size(),
            keep_partial: defaults::keep_partial(),
        }
    }
}

/// Query pagination settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "defaults::default_page_size")]
    pub default_page_size: usize,

    #[serde(default = "defaults::max_page_size")]
    pub max_page_size: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_page_size: defaults::default_page_size(),
            max_page_size: defaults::max_page_size(),
        }
    }
}

/// Source entry of the catalogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceCatalogue {
    pub id: String,
    pub name: String,
    pub categories: Vec<CatalogueEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogueEntry {
    pub id: String,
    pub name: String,
}

mod defaults {
    // HTTP defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; paper-tracker/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn request_delay() -> u64 {
        500
    }
    pub fn max_retries() -> u32 {
        3
    }
    pub fn max_attempts() -> u32 {
        60
    }
    pub fn backoff_base() -> u64 {
        1_000
    }
    pub fn backoff_max() -> u64 {
        16_000
    }

    // Storage defaults
    pub fn database_file() -> String {
        "papers.db".into()
    }
    pub fn mirror_file() -> String {
        "papers.json".into()
    }

    // Update defaults
    pub fn days_back() -> i64 {
        30
    }
    pub fn batch_size() -> usize {
        100
    }
    pub fn keep_partial() -> bool {
        true
    }

    // Query defaults
    pub fn default_page_size() -> usize {
        20
    }
    pub fn max_page_size() -> usize {
        100
    }
}
