//! Crawl configuration loaded from TOML
//!
//! Lookup order:
//! 1. Explicit path (must exist and parse)
//! 2. `<repo>/.commit-crawler.toml`
//! 3. `~/.config/commit-crawler/config.toml`
//! 4. Built-in defaults
//!
//! Models are loaded once, before any repository is opened, so
//! `models_dir` is taken from the startup configuration (steps 1, 3 and 4).

use crate::git::materializer::DEFAULT_MAX_BLOB_BYTES;
use crate::models::RepoTarget;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const REPO_CONFIG_FILE: &str = ".commit-crawler.toml";

/// Where model artifacts live when nothing says otherwise
pub const DEFAULT_MODELS_DIR: &str = "data/models";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Reference the walk starts from
    pub head_ref: String,
    /// Directory holding `<language>.json` model artifacts
    pub models_dir: Option<PathBuf>,
    /// Blobs larger than this are dropped from their commit
    pub max_blob_bytes: usize,
    /// Analyze every author's commits, not only `author_emails`
    pub hash_all_contributors: bool,
    pub author_emails: Vec<String>,
    /// Extra extension -> language routes, e.g. `pyw = "python"`
    pub extensions: BTreeMap<String, String>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            head_ref: "HEAD".to_string(),
            models_dir: None,
            max_blob_bytes: DEFAULT_MAX_BLOB_BYTES,
            hash_all_contributors: true,
            author_emails: Vec::new(),
            extensions: BTreeMap::new(),
        }
    }
}

impl CrawlConfig {
    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn models_dir(&self) -> &Path {
        self.models_dir
            .as_deref()
            .unwrap_or(Path::new(DEFAULT_MODELS_DIR))
    }

    /// The repository to crawl under this configuration
    pub fn target(&self, repo_path: &Path) -> RepoTarget {
        RepoTarget {
            path: repo_path.to_path_buf(),
            hash_all_contributors: self.hash_all_contributors,
            author_emails: self.author_emails.clone(),
        }
    }
}

/// User config directory path
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("commit-crawler").join("config.toml"))
}

/// Load the configuration that applies before any repository is known.
///
/// Same rules as `load_crawl_config`, minus the per-repository file.
pub fn load_startup_config(explicit: Option<&Path>) -> Result<CrawlConfig> {
    if let Some(path) = explicit {
        return CrawlConfig::from_file(path);
    }
    load_first(user_config_path())
}

/// Load configuration for a crawl of `repo_path`.
///
/// An explicit path is a hard requirement; discovered files that fail to
/// parse are reported and skipped.
pub fn load_crawl_config(repo_path: &Path, explicit: Option<&Path>) -> Result<CrawlConfig> {
    if let Some(path) = explicit {
        return CrawlConfig::from_file(path);
    }

    load_first(std::iter::once(repo_path.join(REPO_CONFIG_FILE)).chain(user_config_path()))
}

/// First candidate file that exists and parses, else defaults
fn load_first(candidates: impl IntoIterator<Item = PathBuf>) -> Result<CrawlConfig> {
    for path in candidates {
        if !path.exists() {
            continue;
        }
        match CrawlConfig::from_file(&path) {
            Ok(config) => {
                debug!("Loaded crawl config from {}", path.display());
                return Ok(config);
            }
            Err(e) => {
                warn!("Failed to load {}: {:#}", path.display(), e);
            }
        }
    }

    Ok(CrawlConfig::default())
}
