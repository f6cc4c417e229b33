//! Paper Tracker CLI
//!
//! Local execution entry point. Results are printed as JSON on stdout.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use paper_tracker::{
    error::{AppError, Result},
    models::{Config, PaperId, QueryRequest, Relevance, UpdateRequest},
    pipeline::{self, QueryEngine, RelevanceService, UpdateOrchestrator},
    services,
    storage::{JsonMirror, PaperStore, SqliteStore},
};
use serde::Serialize;

/// Paper Tracker - preprint metadata aggregator
#[derive(Parser, Debug)]
#[command(
    name = "paper-tracker",
    version,
    about = "Aggregates arXiv, bioRxiv and ChemRxiv metadata into a tagged store"
)]
struct Cli {
    /// Directory holding config.toml, the database and the mirror
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,

    /// Configuration file (default: {data_dir}/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct FilterArgs {
    /// Restrict to sources (repeatable)
    #[arg(long = "source")]
    sources: Vec<String>,

    /// Restrict to categories (repeatable)
    #[arg(long = "category")]
    categories: Vec<String>,

    /// relevant, irrelevant or untagged (repeatable)
    #[arg(long = "relevance")]
    relevance: Vec<String>,

    /// Earliest published date (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,

    /// Latest published date (YYYY-MM-DD)
    #[arg(long)]
    to: Option<NaiveDate>,

    /// Case-insensitive substring to search for
    #[arg(long)]
    search: Option<String>,

    /// title, abstract, authors or all
    #[arg(long)]
    scope: Option<String>,
}

impl FilterArgs {
    fn into_request(self, page: Option<usize>, page_size: Option<usize>) -> QueryRequest {
        QueryRequest {
            source: self.sources,
            categories: self.categories,
            relevance_status: self.relevance,
            date_start: self.from,
            date_end: self.to,
            search_query: self.search,
            search_scope: self.scope,
            page,
            page_size,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch new papers from the given sources
    Update {
        /// arxiv, biorxiv or chemrxiv (repeatable; default: all)
        #[arg(long = "source")]
        sources: Vec<String>,

        /// Categories to fetch (repeatable; default: every known category)
        #[arg(long = "category")]
        categories: Vec<String>,

        /// First day to fetch (default: today minus update.days_back)
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Last day to fetch (default: today)
        #[arg(long)]
        end: Option<NaiveDate>,
    },

    /// List stored papers
    Query {
        #[command(flatten)]
        filter: FilterArgs,

        #[arg(long)]
        page: Option<usize>,

        #[arg(long)]
        page_size: Option<usize>,
    },

    /// Aggregate counts over stored papers
    Stats {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Set the relevance tag of one paper
    Tag {
        /// Paper identity, e.g. arxiv:2401.11111
        paper_id: PaperId,

        /// relevant, irrelevant or untagged
        status: Relevance,
    },

    /// Write every stored paper to a JSON file
    Export {
        /// Output file (default: the configured mirror)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Load papers from a JSON file
    Import { path: PathBuf },

    /// Validate the configuration
    Validate,

    /// Show sources, categories and store info
    Info,
}

#[derive(Serialize)]
struct Info {
    data_dir: PathBuf,
    database: PathBuf,
    mirror: Option<PathBuf>,
    papers: usize,
    sources: Vec<paper_tracker::models::SourceCatalogue>,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open_store(config: &Config, data_dir: &Path) -> Result<(Arc<dyn PaperStore>, Option<JsonMirror>)> {
    let store = SqliteStore::open(config.storage.database_path(data_dir))?;
    let mirror = config.storage.mirror_path(data_dir).map(JsonMirror::new);
    Ok((Arc::new(store), mirror))
}

/// Exit status: 2 when the request itself was rejected, 1 for runtime failures.
fn exit_code(error: &AppError) -> ExitCode {
    if error.is_request_error() {
        ExitCode::from(2)
    } else {
        ExitCode::FAILURE
    }
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            exit_code(&e)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.data_dir.join("config.toml"));
    let config = if config_path.exists() {
        Config::load(&config_path)?
    } else {
        log::debug!("No config at {}, using defaults", config_path.display());
        Config::default()
    };

    if let Command::Validate = cli.command {
        config.validate()?;
        log::info!("Config OK: {}", config_path.display());
        return Ok(());
    }

    config.validate()?;
    let config = Arc::new(config);
    let (store, mirror) = open_store(&config, &cli.data_dir)?;

    match cli.command {
        Command::Update {
            sources,
            categories,
            start,
            end,
        } => {
            let sources = if sources.is_empty() {
                vec!["arxiv".into(), "biorxiv".into(), "chemrxiv".into()]
            } else {
                sources
            };
            let request = UpdateRequest {
                sources,
                categories,
                start_date: start,
                end_date: end,
            };
            let adapters = services::build_sources(&config)?;
            let orchestrator =
                UpdateOrchestrator::new(Arc::clone(&config), adapters, store, mirror);
            print_json(&orchestrator.update(&request).await?)?;
        }

        Command::Query {
            filter,
            page,
            page_size,
        } => {
            let engine = QueryEngine::new(store, Arc::clone(&config));
            let request = filter.into_request(page, page_size);
            print_json(&engine.query_request(&request).await?)?;
        }

        Command::Stats { filter } => {
            let engine = QueryEngine::new(store, Arc::clone(&config));
            let request = filter.into_request(None, None);
            print_json(&engine.stats_request(&request).await?)?;
        }

        Command::Tag { paper_id, status } => {
            RelevanceService::new(store, mirror)
                .set_relevance(&paper_id, status)
                .await?;
        }

        Command::Export { output } => {
            let Some(path) = output.or_else(|| mirror.map(|m| m.path().to_path_buf())) else {
                return Err(AppError::config(
                    "No mirror configured; pass --output",
                ));
            };
            let written = pipeline::export(store.as_ref(), &path).await?;
            print_json(&serde_json::json!({ "exported": written, "path": path }))?;
        }

        Command::Import { path } => {
            let summary =
                pipeline::import(&path, store, mirror, config.update.batch_size).await?;
            print_json(&summary)?;
        }

        Command::Info => {
            let info = Info {
                database: config.storage.database_path(&cli.data_dir),
                mirror: config.storage.mirror_path(&cli.data_dir),
                data_dir: cli.data_dir,
                papers: store.count().await?,
                sources: config.catalogue(),
            };
            print_json(&info)?;
        }

        Command::Validate => {}
    }

    Ok(())
}
