//! # CLI Module
//!
//! Command-line interface for the comic cover matching service.
//!
//! ## Usage
//! ```bash
//! comic-matcher serve --host 0.0.0.0 --port 8080
//! comic-matcher match-local cover.jpg candidates.json --json
//! ```

use clap::{Parser, Subcommand};
use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use inferno_comics_matcher::core::cache::SqliteCache;
use inferno_comics_matcher::core::config::Config;
use inferno_comics_matcher::core::fetch::ImageFetcher;
use inferno_comics_matcher::core::pipeline::{CandidateCover, QueryImage, Services};
use inferno_comics_matcher::core::progress::{NullTransport, ProgressReporter};
use inferno_comics_matcher::core::session::SessionStore;
use inferno_comics_matcher::error::Result;
use inferno_comics_matcher::events::{Event, EventChannel};
use inferno_comics_matcher::http::{self, AppState};

/// Comic Cover Matcher
#[derive(Parser, Debug)]
#[command(name = "comic-matcher")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Listen host
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Listen port
        #[arg(short, long, default_value = "8080")]
        port: u16,

        /// Path to the YAML configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// SQLite cache database path
        #[arg(long)]
        cache_db: Option<PathBuf>,

        /// Cache image directory
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Root directory for session storage
        #[arg(long)]
        storage_root: Option<PathBuf>,

        /// Base URL of an external progress service
        #[arg(long)]
        progress_base_url: Option<String>,

        /// Verbose logging
        #[arg(short, long)]
        verbose: bool,
    },
    /// Match a single cover image against a JSON file of candidate covers,
    /// without standing up the HTTP server
    MatchLocal {
        /// Path to the query image
        image: PathBuf,

        /// Path to a JSON file: an array of Candidate Cover objects
        candidates: PathBuf,

        /// Path to the YAML configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// SQLite cache database path
        #[arg(long)]
        cache_db: Option<PathBuf>,

        /// Cache image directory
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Emit JSON instead of a human-readable summary
        #[arg(long)]
        json: bool,

        /// Verbose logging
        #[arg(short, long)]
        verbose: bool,
    },
}

/// Run the CLI.
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            host,
            port,
            config,
            cache_db,
            cache_dir,
            storage_root,
            progress_base_url,
            verbose,
        } => run_serve(host, port, config, cache_db, cache_dir, storage_root, progress_base_url, verbose),
        Commands::MatchLocal {
            image,
            candidates,
            config,
            cache_db,
            cache_dir,
            json,
            verbose,
        } => run_match_local(image, candidates, config, cache_db, cache_dir, json, verbose),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .try_init();
}

fn default_app_dir() -> PathBuf {
    dirs::cache_dir().unwrap_or_else(|| PathBuf::from(".")).join("inferno-comics-matcher")
}

fn build_services(config_path: Option<PathBuf>, cache_db: Option<PathBuf>, cache_dir: Option<PathBuf>, storage_root: Option<PathBuf>) -> Result<(Services, PathBuf)> {
    let resolved_config_path = Config::resolve_path(config_path.as_deref());
    let config = Config::load(&resolved_config_path)?;

    let app_dir = default_app_dir();
    let cache_db = cache_db.unwrap_or_else(|| app_dir.join("cache.db"));
    let cache_dir = cache_dir.unwrap_or_else(|| app_dir.join("images"));
    let storage_root = storage_root.unwrap_or_else(|| app_dir.join("storage"));

    let cache = SqliteCache::open(&cache_db, &cache_dir)?;
    let fetcher = ImageFetcher::new(std::time::Duration::from_secs(10), config.max_workers);
    let session_store = SessionStore::new(storage_root);

    Ok((
        Services {
            cache: Arc::new(cache),
            fetcher: Arc::new(fetcher),
            session_store: Arc::new(session_store),
            config,
        },
        resolved_config_path,
    ))
}

fn run_serve(
    host: String,
    port: u16,
    config: Option<PathBuf>,
    cache_db: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    storage_root: Option<PathBuf>,
    progress_base_url: Option<String>,
    verbose: bool,
) -> Result<()> {
    init_tracing(verbose);
    let (services, resolved_config_path) = build_services(config, cache_db, cache_dir, storage_root)?;
    let state = AppState::new(Arc::new(services), resolved_config_path, progress_base_url);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");
    runtime.block_on(async {
        if let Err(e) = http::serve(state, &host, port).await {
            tracing::error!(error = %e, "server exited with an error");
        }
    });
    Ok(())
}

fn run_match_local(
    image_path: PathBuf,
    candidates_path: PathBuf,
    config: Option<PathBuf>,
    cache_db: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    json_output: bool,
    verbose: bool,
) -> Result<()> {
    init_tracing(verbose);
    let term = Term::stderr();
    if !json_output {
        term.write_line(&format!("{} {}", style("Comic Cover Matcher").bold().cyan(), style(env!("CARGO_PKG_VERSION")).dim()))
            .ok();
    }

    let (services, _config_path) = build_services(config, cache_db, cache_dir, None)?;

    let ext = image_path.extension().and_then(|e| e.to_str()).unwrap_or("jpg").to_string();
    let bytes = std::fs::read(&image_path).map_err(|e| {
        inferno_comics_matcher::error::MatcherError::Pipeline(inferno_comics_matcher::error::PipelineError::BadRequest(format!(
            "failed to read {}: {e}",
            image_path.display()
        )))
    })?;
    let candidates_json = std::fs::read_to_string(&candidates_path).map_err(|e| {
        inferno_comics_matcher::error::MatcherError::Pipeline(inferno_comics_matcher::error::PipelineError::BadRequest(format!(
            "failed to read {}: {e}",
            candidates_path.display()
        )))
    })?;
    let candidate_covers: Vec<CandidateCover> = serde_json::from_str(&candidates_json).map_err(|e| {
        inferno_comics_matcher::error::MatcherError::Pipeline(inferno_comics_matcher::error::PipelineError::BadRequest(format!(
            "invalid candidate covers JSON: {e}"
        )))
    })?;

    let (sender, receiver) = EventChannel::new();
    let reporter = ProgressReporter::new("local", Box::new(NullTransport), sender);

    let progress = if json_output {
        None
    } else {
        let pb = ProgressBar::new(100);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/100 {msg}")
                .unwrap()
                .progress_chars("█▓░"),
        );
        Some(pb)
    };

    let event_thread = thread::spawn(move || {
        for event in receiver.iter() {
            if let Event::Progress(p) = event {
                if let Some(ref pb) = progress {
                    pb.set_position(p.progress.round() as u64);
                    pb.set_message(p.message);
                }
            }
        }
        progress
    });

    let query = QueryImage { bytes, ext };
    let result = inferno_comics_matcher::core::pipeline::match_batch("local", vec![query], candidate_covers, &services, &reporter);

    drop(reporter);
    if let Some(pb) = event_thread.join().ok().flatten() {
        pb.finish_and_clear();
    }

    let result = result?;
    if json_output {
        println!("{}", serde_json::to_string_pretty(&result).unwrap());
    } else {
        print_pretty_result(&term, &result);
    }
    Ok(())
}

fn print_pretty_result(term: &Term, result: &inferno_comics_matcher::core::pipeline::SessionResult) {
    term.write_line("").ok();
    let query = match result.queries.first() {
        Some(q) => q,
        None => {
            term.write_line(&format!("{} no query result produced", style("✗").red())).ok();
            return;
        }
    };
    if let Some(ref error) = query.error {
        term.write_line(&format!("{} {}", style("✗").red().bold(), error)).ok();
        return;
    }

    term.write_line(&format!("{} {} matches found", style("✓").green().bold(), style(query.total_matches).cyan()))
        .ok();
    term.write_line("").ok();
    for (rank, m) in query.matches.iter().enumerate() {
        let label = m.cover_metadata.as_ref().map(|c| format!("{} #{}", c.name, c.issue_number)).unwrap_or_else(|| m.url.clone());
        term.write_line(&format!(
            "  {} {} — {:.1}% ({:?})",
            style(format!("{}.", rank + 1)).bold(),
            label,
            m.similarity * 100.0,
            m.status
        ))
        .ok();
    }
}
