//! Configuration module for the crawler
//!
//! This module handles:
//! - Per-repository configuration (.commit-crawler.toml)
//! - User-level defaults (~/.config/commit-crawler/config.toml)
//! - Extension routing overrides for the extractor registry

mod crawl_config;

pub use crawl_config::{
    load_crawl_config, load_startup_config, user_config_path, CrawlConfig, DEFAULT_MODELS_DIR,
    REPO_CONFIG_FILE,
};
