//! Blob resolution and line-range construction
//!
//! Turns the walker's raw changes into `FileDiff`s with both content sides
//! loaded. Binary files and files whose blobs cannot be read are dropped
//! individually; the rest of the commit is unaffected.

use crate::git::walker::RawChange;
use crate::models::{ChangeKind, ContentSnapshot, FileDiff, LineRange};
use git2::{Oid, Repository};
use tracing::{debug, warn};

/// Blobs larger than this are skipped by default (16 MiB)
pub const DEFAULT_MAX_BLOB_BYTES: usize = 16 * 1024 * 1024;

/// Bytes inspected by the binary heuristic, as git does
const BINARY_PROBE_BYTES: usize = 8000;

/// Resolves before/after content for each change of a commit.
#[derive(Debug, Clone)]
pub struct DiffMaterializer {
    max_blob_bytes: usize,
}

impl Default for DiffMaterializer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BLOB_BYTES)
    }
}

/// Materialized diffs of one commit, plus what was dropped
#[derive(Debug, Default)]
pub struct Materialized {
    pub diffs: Vec<FileDiff>,
    pub dropped_binary: usize,
    pub dropped_unresolved: usize,
}

#[derive(Debug)]
pub(crate) enum BlobFailure {
    Missing(git2::Error),
    TooLarge(usize),
}

impl std::fmt::Display for BlobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlobFailure::Missing(e) => write!(f, "missing object: {}", e.message()),
            BlobFailure::TooLarge(size) => write!(f, "object too large ({} bytes)", size),
        }
    }
}

impl DiffMaterializer {
    pub fn new(max_blob_bytes: usize) -> Self {
        Self { max_blob_bytes }
    }

    pub fn max_blob_bytes(&self) -> usize {
        self.max_blob_bytes
    }

    /// Build `FileDiff`s for every text change whose sides resolve.
    pub fn materialize(&self, repo: &Repository, changes: &[RawChange]) -> Materialized {
        let mut out = Materialized::default();

        for change in changes {
            if let Some(reason) = &change.unresolved {
                warn!("Dropping {} from commit: {}", change.path(), reason);
                out.dropped_unresolved += 1;
                continue;
            }
            if change.binary {
                debug!("Dropping binary file {} ({})", change.path(), change.kind);
                out.dropped_binary += 1;
                continue;
            }

            let before = match self.side(repo, change, Side::Before) {
                Ok(side) => side,
                Err(e) => {
                    warn!("Dropping {} from commit: {}", change.path(), e);
                    out.dropped_unresolved += 1;
                    continue;
                }
            };
            let after = match self.side(repo, change, Side::After) {
                Ok(side) => side,
                Err(e) => {
                    warn!("Dropping {} from commit: {}", change.path(), e);
                    out.dropped_unresolved += 1;
                    continue;
                }
            };

            if before.as_deref().is_some_and(is_binary) || after.as_deref().is_some_and(is_binary) {
                debug!("Dropping binary file {}", change.path());
                out.dropped_binary += 1;
                continue;
            }

            let before_ranges = change
                .edits
                .iter()
                .map(|e| LineRange::new(e.begin_a, e.end_a))
                .collect();
            let after_ranges = change
                .edits
                .iter()
                .map(|e| LineRange::new(e.begin_b, e.end_b))
                .collect();

            out.diffs.push(FileDiff {
                path: change.path().to_string(),
                old_path: match change.kind {
                    ChangeKind::Rename => change.old_path.clone(),
                    _ => None,
                },
                kind: change.kind,
                language: None,
                before: snapshot(before, before_ranges),
                after: snapshot(after, after_ranges),
            });
        }

        out
    }

    /// Raw bytes for one side, or `None` where the side intentionally does not exist.
    fn side(&self, repo: &Repository, change: &RawChange, side: Side) -> Result<Option<Vec<u8>>, BlobFailure> {
        let (absent_kind, id) = match side {
            Side::Before => (ChangeKind::Add, change.old_id),
            Side::After => (ChangeKind::Delete, change.new_id),
        };
        if change.kind == absent_kind {
            return Ok(None);
        }
        match id {
            Some(id) => self.load_blob(repo, id).map(Some),
            // Empty blobs still have an id; a missing one means nothing to read.
            None => Ok(Some(Vec::new())),
        }
    }

    fn load_blob(&self, repo: &Repository, id: Oid) -> Result<Vec<u8>, BlobFailure> {
        check_blob(repo, id, self.max_blob_bytes)?;
        let blob = repo.find_blob(id).map_err(BlobFailure::Missing)?;
        Ok(blob.content().to_vec())
    }
}

/// Size of a stored blob, read from its header without loading it.
pub(crate) fn check_blob(repo: &Repository, id: Oid, max_bytes: usize) -> Result<usize, BlobFailure> {
    let (size, _) = repo
        .odb()
        .and_then(|odb| odb.read_header(id))
        .map_err(BlobFailure::Missing)?;
    if size > max_bytes {
        return Err(BlobFailure::TooLarge(size));
    }
    Ok(size)
}

#[derive(Debug, Clone, Copy)]
enum Side {
    Before,
    After,
}

fn snapshot(bytes: Option<Vec<u8>>, ranges: Vec<LineRange>) -> ContentSnapshot {
    match bytes {
        Some(bytes) => ContentSnapshot::new(split_lines(&bytes), ranges),
        None => ContentSnapshot::empty(),
    }
}

/// Split text the way git numbers lines: a trailing newline does not start a new line.
fn split_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::to_string)
        .collect()
}

/// Text heuristic: an embedded NUL, or too many non-printable bytes, in the
/// first 8000 bytes marks content as binary.
pub fn is_binary(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(BINARY_PROBE_BYTES)];
    if memchr::memchr(0, window).is_some() {
        return true;
    }

    let mut printable = 0usize;
    let mut nonprintable = 0usize;
    for &b in window {
        match b {
            // DEL
            0x7f => nonprintable += 1,
            // backspace, tab, newline, form feed, carriage return, escape
            0x08 | b'\t' | b'\n' | 0x0c | b'\r' | 0x1b => printable += 1,
            b if b < 0x20 => nonprintable += 1,
            _ => printable += 1,
        }
    }
    (printable >> 7) < nonprintable
}
