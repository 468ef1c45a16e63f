//! Typed setup failures
//!
//! Only failures that prevent a crawl from starting surface here. Per-file
//! and per-line problems are logged and absorbed where they happen.

use std::path::PathBuf;
use thiserror::Error;

/// Errors returned to the caller of a crawl
#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("No usable git repository at {path:?}: {source}")]
    RepositoryUnavailable {
        path: PathBuf,
        #[source]
        source: git2::Error,
    },

    #[error("Branch '{reference}' does not resolve to a commit: {source}")]
    BranchUnresolvable {
        reference: String,
        #[source]
        source: git2::Error,
    },

    #[error("Tail commit '{reference}' does not resolve to a commit: {source}")]
    TailUnresolvable {
        reference: String,
        #[source]
        source: git2::Error,
    },

    #[error("Cannot read {language} model at {path:?}: {source}")]
    ModelUnavailable {
        language: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid {language} model: {reason}")]
    ModelInvalid { language: String, reason: String },

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),
}

impl CrawlError {
    /// Whether the caller may skip this repository and carry on with others.
    pub fn is_skippable(&self) -> bool {
        matches!(self, CrawlError::BranchUnresolvable { .. })
    }
}

pub type CrawlResult<T> = Result<T, CrawlError>;
