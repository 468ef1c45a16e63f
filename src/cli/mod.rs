//! CLI definition and handler
//!
//! Emits one JSON object per visited commit (newest first) on stdout or to
//! `--output`. Logs and the progress bar go to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use commit_crawler::config::{load_crawl_config, load_startup_config, CrawlConfig};
use commit_crawler::error::CrawlError;
use commit_crawler::extractors::ExtractorRegistry;
use commit_crawler::git::DiffMaterializer;
use commit_crawler::pipeline::CommitCrawler;

/// Commit crawler - per-commit language and library line statistics
#[derive(Parser, Debug)]
#[command(name = "commit-crawler")]
#[command(
    version,
    about = "Walk git history and compute per-commit language and library line statistics",
    after_help = "\
Examples:
  commit-crawler .                              Crawl the current repository
  commit-crawler . --tail 1a2b3c4               Only commits newer than 1a2b3c4
  commit-crawler repo-a repo-b -o stats.jsonl   Several repositories into one file
  commit-crawler . --max-commits 100            Stop after 100 commits"
)]
pub struct Cli {
    /// Repositories to crawl (default: current directory)
    #[arg(default_value = ".")]
    pub paths: Vec<PathBuf>,

    /// Config file (default: <repo>/.commit-crawler.toml, then user config)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Reference to start from (overrides config head_ref)
    #[arg(long)]
    pub head: Option<String>,

    /// Stop before this commit (incremental crawl)
    #[arg(long)]
    pub tail: Option<String>,

    /// Directory holding per-language model artifacts
    #[arg(long, env = "COMMIT_CRAWLER_MODELS")]
    pub models_dir: Option<PathBuf>,

    /// Skip blobs larger than this many bytes
    #[arg(long)]
    pub max_blob_bytes: Option<usize>,

    /// Stop after emitting this many commits per repository
    #[arg(long)]
    pub max_commits: Option<usize>,

    /// Output file (default: stdout)
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn", value_parser = ["error", "warn", "info", "debug", "trace"])]
    pub log_level: String,
}

impl Cli {
    /// Apply command-line overrides on top of file configuration
    fn apply_overrides(&self, config: &mut CrawlConfig) {
        if let Some(head) = &self.head {
            config.head_ref = head.clone();
        }
        if let Some(dir) = &self.models_dir {
            config.models_dir = Some(dir.clone());
        }
        if let Some(max) = self.max_blob_bytes {
            config.max_blob_bytes = max;
        }
    }
}

pub fn run(cli: Cli) -> Result<()> {
    // Models load here, once; a bad artifact fails before any output.
    let mut startup = load_startup_config(cli.config.as_deref())?;
    cli.apply_overrides(&mut startup);
    let registry = Arc::new(build_registry(&startup)?);

    let mut out: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(BufWriter::new(
            std::fs::File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(std::io::stdout().lock())),
    };

    for path in &cli.paths {
        match crawl_repository(&cli, path, &startup, &registry, &mut out) {
            Ok(emitted) => info!("{}: {} commits", path.display(), emitted),
            Err(e) => match e.downcast_ref::<CrawlError>() {
                Some(crawl_err) if crawl_err.is_skippable() => {
                    warn!("Skipping {}: {}", path.display(), crawl_err);
                }
                _ => return Err(e),
            },
        }
    }

    out.flush()?;
    Ok(())
}

/// Load every built-in model and apply the configured extension routes.
fn build_registry(config: &CrawlConfig) -> Result<ExtractorRegistry> {
    let mut registry = ExtractorRegistry::with_defaults(config.models_dir())
        .with_context(|| format!("Failed to load models from {}", config.models_dir().display()))?;
    for (ext, language) in &config.extensions {
        registry.map_extension(ext, language);
    }
    Ok(registry)
}

/// Registry for one repository: the startup registry plus the repository's
/// own extension routes. Never loads models.
fn repo_registry(
    startup: &CrawlConfig,
    registry: &Arc<ExtractorRegistry>,
    config: &CrawlConfig,
) -> Arc<ExtractorRegistry> {
    if config.models_dir() != startup.models_dir() {
        warn!(
            "Ignoring models_dir {}: models were loaded from {}",
            config.models_dir().display(),
            startup.models_dir().display()
        );
    }
    if config.extensions == startup.extensions {
        return Arc::clone(registry);
    }
    let mut routed = ExtractorRegistry::clone(registry);
    for (ext, language) in &config.extensions {
        routed.map_extension(ext, language);
    }
    Arc::new(routed)
}

fn crawl_repository(
    cli: &Cli,
    path: &Path,
    startup: &CrawlConfig,
    registry: &Arc<ExtractorRegistry>,
    out: &mut dyn Write,
) -> Result<usize> {
    let mut config = load_crawl_config(path, cli.config.as_deref())?;
    cli.apply_overrides(&mut config);
    let registry = repo_registry(startup, registry, &config);

    let crawler = CommitCrawler::open(config.target(path), registry)?
        .with_materializer(DiffMaterializer::new(config.max_blob_bytes));
    let tail = cli.tail.as_deref();

    let total = if cli.no_progress {
        None
    } else {
        Some(crawler.count_commits(&config.head_ref, tail)?)
    };
    let progress = match total {
        None => ProgressBar::hidden(),
        Some(total) => {
            let bar = ProgressBar::new(total as u64);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} commits {msg}")
                    .context("Invalid progress template")?
                    .progress_chars("=>-"),
            );
            bar
        }
    };

    let token = crawler.cancellation_token();
    if cli.max_commits == Some(0) {
        token.cancel();
    }
    let mut emitted = 0;
    let mut stream = crawler.crawl(&config.head_ref, tail)?;
    if let Some(total) = total {
        stream = stream.with_total(total);
    }
    for stats in stream.by_ref() {
        let stats = stats?;
        serde_json::to_writer(&mut *out, &stats)?;
        writeln!(out)?;
        emitted += 1;
        progress.inc(1);

        if cli.max_commits.is_some_and(|max| emitted >= max) {
            token.cancel();
        }
    }
    progress.finish_and_clear();

    let counters = stream.counters();
    info!(
        "{} files analyzed, {} binary and {} unreadable files dropped",
        counters.files, counters.dropped_binary, counters.dropped_unresolved
    );

    Ok(emitted)
}
