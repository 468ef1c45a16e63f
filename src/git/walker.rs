//! Commit history walker using libgit2
//!
//! Walks from a head reference back towards an optional tail commit,
//! newest first. Diffs are computed lazily: a commit's changes are only
//! produced when the consumer pulls it from the stream.

use crate::error::{CrawlError, CrawlResult};
use crate::git::materializer::{check_blob, DEFAULT_MAX_BLOB_BYTES};
use crate::models::{ChangeKind, CommitMeta};
use chrono::{TimeZone, Utc};
use git2::{Delta, Diff, DiffFindOptions, DiffHunk, DiffOptions, Oid, Patch, Repository, Revwalk, Sort};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Cooperative stop signal shared between a consumer and a running crawl.
///
/// The stream checks it before starting each commit, never mid-commit.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// One contiguous edit, as half-open 0-based line spans on each side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edit {
    pub begin_a: usize,
    pub end_a: usize,
    pub begin_b: usize,
    pub end_b: usize,
}

impl Edit {
    fn from_hunk(hunk: &DiffHunk<'_>) -> Self {
        let (begin_a, end_a) = hunk_span(hunk.old_start(), hunk.old_lines());
        let (begin_b, end_b) = hunk_span(hunk.new_start(), hunk.new_lines());
        Self {
            begin_a,
            end_a,
            begin_b,
            end_b,
        }
    }
}

/// Convert git's 1-based `(start, count)` hunk header into a 0-based span.
///
/// An empty side names the line *after which* the change sits, so the span
/// is the empty range at that index.
fn hunk_span(start: u32, lines: u32) -> (usize, usize) {
    let start = start as usize;
    let lines = lines as usize;
    if lines == 0 {
        (start, start)
    } else {
        (start - 1, start - 1 + lines)
    }
}

/// A changed path with its edit script, before any blob content is loaded.
#[derive(Debug, Clone)]
pub struct RawChange {
    pub kind: ChangeKind,
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub old_id: Option<Oid>,
    pub new_id: Option<Oid>,
    pub edits: Vec<Edit>,
    /// libgit2 already flagged one side as binary
    pub binary: bool,
    /// Why a side could not be read while computing edits
    pub unresolved: Option<String>,
}

impl RawChange {
    /// Path the change is reported under
    pub fn path(&self) -> &str {
        let path = match self.kind {
            ChangeKind::Delete => self.old_path.as_deref(),
            _ => self.new_path.as_deref(),
        };
        path.unwrap_or("")
    }
}

/// A commit pulled from the stream together with its changes
#[derive(Debug, Clone)]
pub struct WalkedCommit {
    pub meta: CommitMeta,
    pub changes: Vec<RawChange>,
}

/// Owns the repository handle for the duration of a crawl.
pub struct CommitWalker {
    repo: Repository,
}

impl CommitWalker {
    /// Open the repository whose object store lives at `path`.
    pub fn open(path: &Path) -> CrawlResult<Self> {
        let repo = Repository::open(path).map_err(|source| CrawlError::RepositoryUnavailable {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Opened git repository at {:?}", repo.path());
        Ok(Self { repo })
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    fn resolve_commit(&self, reference: &str) -> Result<Oid, git2::Error> {
        let object = self.repo.revparse_single(reference)?;
        Ok(object.peel_to_commit()?.id())
    }

    fn resolve_bounds(&self, head_ref: &str, tail: Option<&str>) -> CrawlResult<(Oid, Option<Oid>)> {
        let head = self
            .resolve_commit(head_ref)
            .map_err(|source| CrawlError::BranchUnresolvable {
                reference: head_ref.to_string(),
                source,
            })?;
        let tail = tail
            .map(|t| {
                self.resolve_commit(t)
                    .map_err(|source| CrawlError::TailUnresolvable {
                        reference: t.to_string(),
                        source,
                    })
            })
            .transpose()?;
        Ok((head, tail))
    }

    fn revwalk_from(&self, head: Oid) -> CrawlResult<Revwalk<'_>> {
        let mut revwalk = self.repo.revwalk()?;
        revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
        revwalk.push(head)?;
        Ok(revwalk)
    }

    /// Number of commits `start` would visit, without computing any diffs.
    pub fn count_commits(&self, head_ref: &str, tail: Option<&str>) -> CrawlResult<usize> {
        let (head, tail) = self.resolve_bounds(head_ref, tail)?;
        let mut count = 0;
        for oid in self.revwalk_from(head)? {
            if Some(oid?) == tail {
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    /// Like `count_commits`, counting only commits whose author email passes `keep`.
    pub fn count_commits_by<F>(&self, head_ref: &str, tail: Option<&str>, keep: F) -> CrawlResult<usize>
    where
        F: Fn(&str) -> bool,
    {
        let (head, tail) = self.resolve_bounds(head_ref, tail)?;
        let mut count = 0;
        for oid in self.revwalk_from(head)? {
            let oid = oid?;
            if Some(oid) == tail {
                break;
            }
            let commit = self.repo.find_commit(oid)?;
            if keep(commit.author().email().unwrap_or("")) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Begin walking from `head_ref` back to `tail` (exclusive).
    pub fn start(&self, head_ref: &str, tail: Option<&str>) -> CrawlResult<CommitStream<'_>> {
        let (head, tail) = self.resolve_bounds(head_ref, tail)?;
        debug!("Walking from {} to {:?}", head, tail);
        Ok(CommitStream {
            repo: &self.repo,
            revwalk: self.revwalk_from(head)?,
            tail,
            cancel: CancellationToken::new(),
            author_filter: None,
            max_blob_bytes: DEFAULT_MAX_BLOB_BYTES,
            done: false,
        })
    }
}

/// Pull-based stream of walked commits, newest first.
pub struct CommitStream<'r> {
    repo: &'r Repository,
    revwalk: Revwalk<'r>,
    tail: Option<Oid>,
    cancel: CancellationToken,
    author_filter: Option<Box<dyn Fn(&str) -> bool + 'r>>,
    max_blob_bytes: usize,
    done: bool,
}

impl<'r> CommitStream<'r> {
    /// Stop before the next commit once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Skip, without diffing, commits whose author email fails `keep`.
    pub fn with_author_filter<F>(mut self, keep: F) -> Self
    where
        F: Fn(&str) -> bool + 'r,
    {
        self.author_filter = Some(Box::new(keep));
        self
    }

    /// Leave blobs larger than this undiffed; their changes come back unresolved.
    pub fn with_max_blob_bytes(mut self, max_blob_bytes: usize) -> Self {
        self.max_blob_bytes = max_blob_bytes;
        self
    }

    fn next_commit(&mut self) -> CrawlResult<Option<WalkedCommit>> {
        loop {
            let Some(oid) = self.revwalk.next() else {
                return Ok(None);
            };
            let oid = oid?;
            if Some(oid) == self.tail {
                debug!("Reached tail commit {}", oid);
                return Ok(None);
            }

            let commit = self.repo.find_commit(oid)?;
            let meta = commit_meta(&commit);
            if let Some(keep) = &self.author_filter {
                if !keep(&meta.author_email) {
                    debug!("Skipping commit {} by {}", meta.hash, meta.author_email);
                    continue;
                }
            }
            debug!("commit: {}; '{}'", meta.hash, meta.message);

            let changes = self.diff_commit(&commit)?;
            return Ok(Some(WalkedCommit { meta, changes }));
        }
    }

    /// Diff a commit against its first parent, or the empty tree for a root.
    fn diff_commit(&self, commit: &git2::Commit<'_>) -> CrawlResult<Vec<RawChange>> {
        let parent = commit.parent(0).ok();
        let tree = commit.tree()?;
        let parent_tree = parent.as_ref().map(|p| p.tree()).transpose()?;

        let mut diff_opts = DiffOptions::new();
        diff_opts.context_lines(0);
        diff_opts.interhunk_lines(0);
        diff_opts.ignore_submodules(true);
        diff_opts.max_size(i64::try_from(self.max_blob_bytes).unwrap_or(i64::MAX));

        let mut diff =
            self.repo
                .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut diff_opts))?;

        let mut find_opts = DiffFindOptions::new();
        find_opts.renames(true);
        diff.find_similar(Some(&mut find_opts))?;

        Ok((0..diff.deltas().len())
            .filter_map(|idx| raw_change(self.repo, &diff, idx, self.max_blob_bytes))
            .collect())
    }
}

impl Iterator for CommitStream<'_> {
    type Item = CrawlResult<WalkedCommit>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.cancel.is_cancelled() {
            debug!("Crawl cancelled");
            self.done = true;
            return None;
        }
        match self.next_commit() {
            Ok(Some(walked)) => Some(Ok(walked)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn change_kind(status: Delta) -> Option<ChangeKind> {
    match status {
        Delta::Added | Delta::Copied => Some(ChangeKind::Add),
        Delta::Deleted => Some(ChangeKind::Delete),
        Delta::Modified | Delta::Typechange => Some(ChangeKind::Modify),
        Delta::Renamed => Some(ChangeKind::Rename),
        _ => None,
    }
}

fn file_path(file: &git2::DiffFile<'_>) -> Option<String> {
    file.path().map(|p| p.to_string_lossy().to_string())
}

fn non_zero(oid: Oid) -> Option<Oid> {
    (!oid.is_zero()).then_some(oid)
}

/// Build the raw change for one delta.
///
/// Sides that are missing or too large are not diffed; the change carries
/// the reason instead of edits.
fn raw_change(repo: &Repository, diff: &Diff<'_>, idx: usize, max_blob_bytes: usize) -> Option<RawChange> {
    let delta = diff.get_delta(idx)?;
    let kind = change_kind(delta.status())?;
    let mut change = RawChange {
        kind,
        old_path: file_path(&delta.old_file()),
        new_path: file_path(&delta.new_file()),
        old_id: non_zero(delta.old_file().id()),
        new_id: non_zero(delta.new_file().id()),
        edits: Vec::new(),
        binary: false,
        unresolved: None,
    };

    let sides = match kind {
        ChangeKind::Add => [None, change.new_id],
        ChangeKind::Delete => [change.old_id, None],
        ChangeKind::Modify | ChangeKind::Rename => [change.old_id, change.new_id],
    };
    for id in sides.into_iter().flatten() {
        if let Err(e) = check_blob(repo, id, max_blob_bytes) {
            change.unresolved = Some(e.to_string());
            return Some(change);
        }
    }

    let patch = match Patch::from_diff(diff, idx) {
        Ok(patch) => patch,
        Err(e) => {
            debug!("Cannot compute edits for {}: {}", change.path(), e);
            change.unresolved = Some(format!("cannot compute edits: {}", e.message()));
            return Some(change);
        }
    };

    if let Some(patch) = patch {
        change.binary = patch.delta().flags().is_binary();
        for hunk_idx in 0..patch.num_hunks() {
            match patch.hunk(hunk_idx) {
                Ok((hunk, _)) => change.edits.push(Edit::from_hunk(&hunk)),
                Err(e) => {
                    change.unresolved = Some(format!("unreadable hunk: {}", e.message()));
                    change.edits.clear();
                    return Some(change);
                }
            }
        }
    }

    Some(change)
}

fn commit_meta(commit: &git2::Commit<'_>) -> CommitMeta {
    let author = commit.author();
    let timestamp = Utc
        .timestamp_opt(commit.time().seconds(), 0)
        .single()
        .unwrap_or_default();
    CommitMeta {
        hash: commit.id().to_string(),
        message: commit.summary().unwrap_or("").to_string(),
        author: author.name().unwrap_or("Unknown").to_string(),
        author_email: author.email().unwrap_or("").to_string(),
        timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    fn commit_files(repo: &Repository, files: &[(&str, Option<&str>)], message: &str) -> Result<Oid> {
        let workdir = repo.workdir().expect("non-bare test repo").to_path_buf();
        let mut index = repo.index()?;
        for (name, content) in files {
            match content {
                Some(content) => {
                    std::fs::write(workdir.join(name), content)?;
                    index.add_path(Path::new(name))?;
                }
                None => {
                    std::fs::remove_file(workdir.join(name))?;
                    index.remove_path(Path::new(name))?;
                }
            }
        }
        index.write()?;
        let tree = repo.find_tree(index.write_tree()?)?;
        let sig = repo.signature()?;
        let parents = match repo.head().ok().and_then(|h| h.peel_to_commit().ok()) {
            Some(parent) => vec![parent],
            None => vec![],
        };
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
        Ok(repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)?)
    }

    fn create_test_repo() -> Result<(tempfile::TempDir, Repository)> {
        let dir = tempdir()?;
        let repo = Repository::init(dir.path())?;
        let mut config = repo.config()?;
        config.set_str("user.name", "Test User")?;
        config.set_str("user.email", "test@example.com")?;
        Ok((dir, repo))
    }

    #[test]
    fn test_hunk_span() {
        assert_eq!(hunk_span(3, 2), (2, 4));
        assert_eq!(hunk_span(3, 0), (3, 3));
        assert_eq!(hunk_span(0, 0), (0, 0));
    }

    #[test]
    fn test_open_non_repo_fails() -> Result<()> {
        let dir = tempdir()?;
        let err = CommitWalker::open(dir.path()).err().expect("should fail");
        assert!(matches!(err, CrawlError::RepositoryUnavailable { .. }));
        Ok(())
    }

    #[test]
    fn test_unresolvable_branch() -> Result<()> {
        let (dir, repo) = create_test_repo()?;
        commit_files(&repo, &[("a.txt", Some("a\n"))], "first")?;
        let walker = CommitWalker::open(dir.path())?;
        let err = walker.start("no-such-branch", None).err().expect("should fail");
        assert!(err.is_skippable());
        Ok(())
    }

    #[test]
    fn test_walk_newest_first_with_edits() -> Result<()> {
        let (dir, repo) = create_test_repo()?;
        commit_files(&repo, &[("a.txt", Some("one\ntwo\nthree\n"))], "first")?;
        commit_files(&repo, &[("a.txt", Some("one\nTWO\nthree\nfour\n"))], "second")?;

        let walker = CommitWalker::open(dir.path())?;
        let commits: Vec<WalkedCommit> = walker.start("HEAD", None)?.collect::<CrawlResult<_>>()?;
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].meta.message, "second");
        assert_eq!(commits[1].meta.message, "first");

        let change = &commits[0].changes[0];
        assert_eq!(change.kind, ChangeKind::Modify);
        assert_eq!(
            change.edits,
            vec![
                Edit { begin_a: 1, end_a: 2, begin_b: 1, end_b: 2 },
                Edit { begin_a: 3, end_a: 3, begin_b: 3, end_b: 4 },
            ]
        );

        let root = &commits[1].changes[0];
        assert_eq!(root.kind, ChangeKind::Add);
        assert_eq!(root.old_id, None);
        assert_eq!(root.edits, vec![Edit { begin_a: 0, end_a: 0, begin_b: 0, end_b: 3 }]);
        Ok(())
    }

    #[test]
    fn test_tail_is_exclusive() -> Result<()> {
        let (dir, repo) = create_test_repo()?;
        commit_files(&repo, &[("a.txt", Some("1\n"))], "first")?;
        let second = commit_files(&repo, &[("a.txt", Some("2\n"))], "second")?;
        commit_files(&repo, &[("a.txt", Some("3\n"))], "third")?;

        let walker = CommitWalker::open(dir.path())?;
        let tail = second.to_string();
        let messages: Vec<String> = walker
            .start("HEAD", Some(tail.as_str()))?
            .map(|c| c.map(|c| c.meta.message))
            .collect::<CrawlResult<_>>()?;
        assert_eq!(messages, vec!["third"]);
        assert_eq!(walker.count_commits("HEAD", Some(tail.as_str()))?, 1);
        assert_eq!(walker.count_commits("HEAD", None)?, 3);
        Ok(())
    }

    #[test]
    fn test_pure_rename_has_no_edits() -> Result<()> {
        let (dir, repo) = create_test_repo()?;
        let body = "line one\nline two\nline three\nline four\n";
        commit_files(&repo, &[("old.py", Some(body))], "add")?;
        commit_files(&repo, &[("old.py", None), ("new.py", Some(body))], "rename")?;

        let walker = CommitWalker::open(dir.path())?;
        let newest = walker.start("HEAD", None)?.next().expect("one commit")?;
        assert_eq!(newest.changes.len(), 1);
        let change = &newest.changes[0];
        assert_eq!(change.kind, ChangeKind::Rename);
        assert_eq!(change.old_path.as_deref(), Some("old.py"));
        assert_eq!(change.path(), "new.py");
        assert!(change.edits.is_empty());
        Ok(())
    }

    #[test]
    fn test_cancellation_stops_between_commits() -> Result<()> {
        let (dir, repo) = create_test_repo()?;
        for i in 0..3 {
            let content = format!("{i}\n");
            commit_files(&repo, &[("a.txt", Some(content.as_str()))], &format!("c{i}"))?;
        }
        let walker = CommitWalker::open(dir.path())?;
        let token = CancellationToken::new();
        let mut stream = walker.start("HEAD", None)?.with_cancellation(token.clone());
        assert!(stream.next().is_some());
        token.cancel();
        assert!(stream.next().is_none());
        Ok(())
    }

    #[test]
    fn test_author_filter_skips_commits() -> Result<()> {
        let (dir, repo) = create_test_repo()?;
        commit_files(&repo, &[("a.txt", Some("a\n"))], "mine")?;
        let walker = CommitWalker::open(dir.path())?;
        let count = walker
            .start("HEAD", None)?
            .with_author_filter(|email| email == "someone-else@example.com")
            .count();
        assert_eq!(count, 0);
        assert_eq!(walker.count_commits_by("HEAD", None, |email| email == "someone-else@example.com")?, 0);
        assert_eq!(walker.count_commits_by("HEAD", None, |email| email == "test@example.com")?, 1);
        Ok(())
    }

    #[test]
    fn test_oversized_blob_is_left_undiffed() -> Result<()> {
        let (dir, repo) = create_test_repo()?;
        commit_files(&repo, &[("small.txt", Some("a\n")), ("big.txt", Some("0123456789\n0123456789\n"))], "first")?;

        let walker = CommitWalker::open(dir.path())?;
        let walked = walker
            .start("HEAD", None)?
            .with_max_blob_bytes(8)
            .next()
            .expect("one commit")?;
        assert_eq!(walked.changes.len(), 2);

        let big = walked.changes.iter().find(|c| c.path() == "big.txt").expect("big.txt");
        assert!(big.unresolved.as_deref().is_some_and(|r| r.contains("too large")));
        assert!(big.edits.is_empty());

        let small = walked.changes.iter().find(|c| c.path() == "small.txt").expect("small.txt");
        assert!(small.unresolved.is_none());
        assert_eq!(small.edits.len(), 1);
        Ok(())
    }
}
