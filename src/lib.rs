//! Commit crawler - per-commit language and library statistics
//!
//! Walks a git repository's history and, for every commit, counts the lines
//! added and deleted per programming language and per imported library.
//!
//! Data flows walker → materializer → extractors → pipeline, one commit at
//! a time:
//!
//! ```no_run
//! use commit_crawler::extractors::ExtractorRegistry;
//! use commit_crawler::models::RepoTarget;
//! use commit_crawler::pipeline::CommitCrawler;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let registry = ExtractorRegistry::with_defaults(Path::new("data/models")).unwrap();
//! let crawler = CommitCrawler::open(RepoTarget::new("/path/to/repo"), Arc::new(registry)).unwrap();
//! for stats in crawler.crawl("HEAD", None).unwrap() {
//!     let stats = stats.unwrap();
//!     println!("{}: +{} -{}", stats.meta.hash, stats.num_lines_added, stats.num_lines_deleted);
//! }
//! ```

pub mod config;
pub mod error;
pub mod extractors;
pub mod git;
pub mod models;
pub mod pipeline;

pub use error::{CrawlError, CrawlResult};
pub use models::{CommitStats, StatKind, StatRecord};
