//! Commit statistics pipeline
//!
//! Orchestrates one crawl, strictly one commit at a time:
//! 1. Pull the next commit and its raw changes from the walker
//! 2. Materialize line-accurate file diffs
//! 3. Extract language and library statistics
//! 4. Hand the commit's `CommitStats` to the consumer
//!
//! The next commit is not touched until the consumer asks for it, so
//! stopping early (dropping the stream or cancelling) leaves every already
//! emitted result intact.

use std::sync::Arc;
use tracing::{debug, info};

use crate::error::CrawlResult;
use crate::extractors::{self, ExtractorRegistry};
use crate::git::{CancellationToken, CommitStream, CommitWalker, DiffMaterializer, WalkedCommit};
use crate::models::{CommitRecord, CommitStats, RepoTarget};

/// Counts of files absorbed rather than failing their commit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlCounters {
    pub commits: usize,
    pub files: usize,
    pub dropped_binary: usize,
    pub dropped_unresolved: usize,
}

/// Crawls one repository into per-commit statistics.
pub struct CommitCrawler {
    walker: CommitWalker,
    target: RepoTarget,
    materializer: DiffMaterializer,
    registry: Arc<ExtractorRegistry>,
    cancel: CancellationToken,
}

impl CommitCrawler {
    /// Open the target repository. The registry is shared read-only.
    pub fn open(target: RepoTarget, registry: Arc<ExtractorRegistry>) -> CrawlResult<Self> {
        let walker = CommitWalker::open(&target.path)?;
        Ok(Self {
            walker,
            target,
            materializer: DiffMaterializer::default(),
            registry,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_materializer(mut self, materializer: DiffMaterializer) -> Self {
        self.materializer = materializer;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that stops the crawl before its next commit
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Number of commits `crawl` would emit, for progress reporting.
    pub fn count_commits(&self, head_ref: &str, tail: Option<&str>) -> CrawlResult<usize> {
        if self.target.hash_all_contributors {
            self.walker.count_commits(head_ref, tail)
        } else {
            self.walker
                .count_commits_by(head_ref, tail, |email| self.target.includes_author(email))
        }
    }

    /// Start crawling from `head_ref` back to `tail` (exclusive).
    ///
    /// Setup failures (unresolvable branch or tail) are returned here,
    /// before any commit is produced.
    pub fn crawl(&self, head_ref: &str, tail: Option<&str>) -> CrawlResult<StatsStream<'_>> {
        info!(
            "Crawling {} from '{}'{}",
            self.target.path.display(),
            head_ref,
            tail.map(|t| format!(" to {}", t)).unwrap_or_default()
        );

        let mut stream = self
            .walker
            .start(head_ref, tail)?
            .with_cancellation(self.cancel.clone())
            .with_max_blob_bytes(self.materializer.max_blob_bytes());
        if !self.target.hash_all_contributors {
            let target = &self.target;
            stream = stream.with_author_filter(move |email| target.includes_author(email));
        }

        Ok(StatsStream {
            crawler: self,
            commits: stream,
            counters: CrawlCounters::default(),
            total: None,
        })
    }

    /// Materialize and extract one walked commit.
    fn process(&self, walked: WalkedCommit, counters: &mut CrawlCounters) -> CommitStats {
        let materialized = self
            .materializer
            .materialize(self.walker.repository(), &walked.changes);
        counters.dropped_binary += materialized.dropped_binary;
        counters.dropped_unresolved += materialized.dropped_unresolved;
        counters.files += materialized.diffs.len();

        let mut record = CommitRecord::new(walked.meta, materialized.diffs);
        let stats = extractors::extract(&self.registry, &mut record.diffs);

        CommitStats {
            meta: record.meta,
            num_lines_added: record.num_lines_added,
            num_lines_deleted: record.num_lines_deleted,
            stats,
        }
    }
}

/// Pull-based stream of per-commit statistics, newest first.
pub struct StatsStream<'c> {
    crawler: &'c CommitCrawler,
    commits: CommitStream<'c>,
    counters: CrawlCounters,
    total: Option<usize>,
}

impl StatsStream<'_> {
    /// Known number of commits, for progress reporting
    pub fn with_total(mut self, total: usize) -> Self {
        self.total = Some(total);
        self
    }

    pub fn counters(&self) -> CrawlCounters {
        self.counters
    }

    /// Fraction of known commits emitted so far, as a percentage
    pub fn percent_complete(&self) -> Option<f64> {
        match self.total {
            Some(0) | None => None,
            Some(total) => Some(self.counters.commits as f64 / total as f64 * 100.0),
        }
    }
}

impl Iterator for StatsStream<'_> {
    type Item = CrawlResult<CommitStats>;

    fn next(&mut self) -> Option<Self::Item> {
        let walked = match self.commits.next()? {
            Ok(walked) => walked,
            Err(e) => return Some(Err(e)),
        };

        let stats = self.crawler.process(walked, &mut self.counters);
        self.counters.commits += 1;
        if let Some(percent) = self.percent_complete() {
            debug!("{} '{}' ({:.1}%)", stats.meta.hash, stats.meta.message, percent);
        }
        Some(Ok(stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_repo_is_setup_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = CommitCrawler::open(
            RepoTarget::new(dir.path().join("missing")),
            Arc::new(ExtractorRegistry::new()),
        );
        assert!(result.is_err());
    }

    fn repo_with_commits(count: usize) -> anyhow::Result<tempfile::TempDir> {
        let dir = tempfile::tempdir()?;
        let repo = git2::Repository::init(dir.path())?;
        let sig = git2::Signature::now("Test", "test@example.com")?;
        let mut parent: Option<git2::Oid> = None;
        for i in 0..count {
            std::fs::write(dir.path().join("notes.txt"), format!("line {i}\n"))?;
            let mut index = repo.index()?;
            index.add_path(std::path::Path::new("notes.txt"))?;
            index.write()?;
            let tree = repo.find_tree(index.write_tree()?)?;
            let parents = match parent {
                Some(id) => vec![repo.find_commit(id)?],
                None => Vec::new(),
            };
            let parents: Vec<&git2::Commit> = parents.iter().collect();
            parent = Some(repo.commit(Some("HEAD"), &sig, &sig, "edit", &tree, &parents)?);
        }
        Ok(dir)
    }

    #[test]
    fn test_progress_and_counters() -> anyhow::Result<()> {
        let dir = repo_with_commits(4)?;
        let crawler = CommitCrawler::open(RepoTarget::new(dir.path()), Arc::new(ExtractorRegistry::new()))?;
        let total = crawler.count_commits("HEAD", None)?;
        assert_eq!(total, 4);

        let mut stream = crawler.crawl("HEAD", None)?.with_total(total);
        assert_eq!(stream.percent_complete(), Some(0.0));
        let first = stream.next().expect("one commit")?;
        assert!(first.stats.is_empty());
        assert_eq!((first.num_lines_added, first.num_lines_deleted), (1, 1));
        assert_eq!(stream.percent_complete(), Some(25.0));

        let rest = stream.by_ref().count();
        assert_eq!(rest, 3);
        let counters = stream.counters();
        assert_eq!(counters.commits, 4);
        assert_eq!(counters.files, 4);
        assert_eq!(counters.dropped_binary, 0);
        Ok(())
    }

    #[test]
    fn test_count_follows_contributor_filter() -> anyhow::Result<()> {
        let dir = repo_with_commits(3)?;
        let mut target = RepoTarget::new(dir.path());
        target.hash_all_contributors = false;
        target.author_emails = vec!["someone-else@example.com".to_string()];
        let crawler = CommitCrawler::open(target.clone(), Arc::new(ExtractorRegistry::new()))?;
        assert_eq!(crawler.count_commits("HEAD", None)?, 0);

        target.author_emails = vec!["TEST@example.com".to_string()];
        let crawler = CommitCrawler::open(target, Arc::new(ExtractorRegistry::new()))?;
        let total = crawler.count_commits("HEAD", None)?;
        assert_eq!(total, 3);

        let mut stream = crawler.crawl("HEAD", None)?.with_total(total);
        assert_eq!(stream.by_ref().count(), 3);
        assert_eq!(stream.percent_complete(), Some(100.0));
        Ok(())
    }

    #[test]
    fn test_oversized_files_are_counted_as_unresolved() -> anyhow::Result<()> {
        let dir = repo_with_commits(1)?;
        let crawler = CommitCrawler::open(RepoTarget::new(dir.path()), Arc::new(ExtractorRegistry::new()))?
            .with_materializer(DiffMaterializer::new(2));

        let mut stream = crawler.crawl("HEAD", None)?;
        let stats = stream.next().expect("one commit")?;
        assert_eq!((stats.num_lines_added, stats.num_lines_deleted), (0, 0));
        let counters = stream.counters();
        assert_eq!(counters.files, 0);
        assert_eq!(counters.dropped_unresolved, 1);
        Ok(())
    }
}
