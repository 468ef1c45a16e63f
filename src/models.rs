//! Core data models for the crawler
//!
//! Commits, per-file diffs and the statistics records computed from them.
//! Everything here is transient: a `CommitRecord` and its diffs live only
//! until its `CommitStats` have been produced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::OnceLock;

/// A local repository to crawl, plus whose commits to count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoTarget {
    pub path: PathBuf,
    /// Count every author's commits, not only `author_emails`
    #[serde(default = "default_true")]
    pub hash_all_contributors: bool,
    #[serde(default)]
    pub author_emails: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl RepoTarget {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            hash_all_contributors: true,
            author_emails: Vec::new(),
        }
    }

    /// Whether commits by this author email should be analyzed
    pub fn includes_author(&self, email: &str) -> bool {
        self.hash_all_contributors
            || self
                .author_emails
                .iter()
                .any(|e| e.eq_ignore_ascii_case(email))
    }
}

/// How a path changed between parent and commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Add,
    Modify,
    Delete,
    Rename,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Add => write!(f, "add"),
            ChangeKind::Modify => write!(f, "modify"),
            ChangeKind::Delete => write!(f, "delete"),
            ChangeKind::Rename => write!(f, "rename"),
        }
    }
}

/// Half-open range `[start, end)` of 0-based line indices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

impl LineRange {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "inverted line range {start}..{end}");
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// One side (before or after) of a changed file
#[derive(Debug, Clone, Default)]
pub struct ContentSnapshot {
    lines: Vec<String>,
    ranges: Vec<LineRange>,
    imports: OnceLock<BTreeSet<String>>,
}

impl ContentSnapshot {
    pub fn new(lines: Vec<String>, ranges: Vec<LineRange>) -> Self {
        Self {
            lines,
            ranges,
            imports: OnceLock::new(),
        }
    }

    /// The side that does not exist (before of an add, after of a delete)
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn ranges(&self) -> &[LineRange] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Lines inside the changed ranges, in order.
    ///
    /// Ranges reaching past the end of the content are clipped.
    pub fn changed_lines(&self) -> impl Iterator<Item = &str> + '_ {
        let len = self.lines.len();
        self.ranges.iter().flat_map(move |r| {
            let start = r.start.min(len);
            let end = r.end.min(len);
            self.lines[start..end].iter().map(String::as_str)
        })
    }

    pub fn changed_line_count(&self) -> usize {
        let len = self.lines.len();
        self.ranges
            .iter()
            .map(|r| r.end.min(len) - r.start.min(len))
            .sum()
    }

    /// Library identifiers imported anywhere in this content, computed once.
    pub fn imports_with<F>(&self, extract: F) -> &BTreeSet<String>
    where
        F: FnOnce(&[String]) -> BTreeSet<String>,
    {
        self.imports.get_or_init(|| extract(&self.lines))
    }
}

/// Extension of a repository path, without the dot; dotfiles have none
pub fn extension_of(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => Some(ext),
        _ => None,
    }
}

/// One changed path within a commit, both sides resolved
#[derive(Debug, Clone)]
pub struct FileDiff {
    /// New path, or the old path for deletions
    pub path: String,
    /// Previous path for renames
    pub old_path: Option<String>,
    pub kind: ChangeKind,
    /// Assigned by the extraction registry; `None` means unrecognized
    pub language: Option<String>,
    pub before: ContentSnapshot,
    pub after: ContentSnapshot,
}

impl FileDiff {
    /// After-side lines inside changed ranges
    pub fn added_lines(&self) -> impl Iterator<Item = &str> + '_ {
        self.after.changed_lines()
    }

    /// Before-side lines inside changed ranges
    pub fn deleted_lines(&self) -> impl Iterator<Item = &str> + '_ {
        self.before.changed_lines()
    }

    pub fn added_count(&self) -> usize {
        self.after.changed_line_count()
    }

    pub fn deleted_count(&self) -> usize {
        self.before.changed_line_count()
    }

    pub fn extension(&self) -> Option<&str> {
        extension_of(&self.path)
    }
}

/// Identity of a visited commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMeta {
    pub hash: String,
    /// First line of the commit message
    pub message: String,
    pub author: String,
    pub author_email: String,
    pub timestamp: DateTime<Utc>,
}

/// A visited commit with its materialized diffs
#[derive(Debug, Clone)]
pub struct CommitRecord {
    pub meta: CommitMeta,
    pub diffs: Vec<FileDiff>,
    pub num_lines_added: usize,
    pub num_lines_deleted: usize,
}

impl CommitRecord {
    /// Build a record, totalling changed lines over every diff
    pub fn new(meta: CommitMeta, diffs: Vec<FileDiff>) -> Self {
        let num_lines_added = diffs.iter().map(FileDiff::added_count).sum();
        let num_lines_deleted = diffs.iter().map(FileDiff::deleted_count).sum();
        Self {
            meta,
            diffs,
            num_lines_added,
            num_lines_deleted,
        }
    }
}

/// What a statistics record counts
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum StatKind {
    Language,
    Library,
}

/// Line counts for one language or library within a commit
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StatRecord {
    pub kind: StatKind,
    pub tech: String,
    pub lines_added: usize,
    pub lines_deleted: usize,
}

/// Output unit handed to the statistics sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStats {
    #[serde(flatten)]
    pub meta: CommitMeta,
    pub num_lines_added: usize,
    pub num_lines_deleted: usize,
    pub stats: Vec<StatRecord>,
}
