//! Git history traversal and diff materialization
//!
//! The walker turns repository history into one `(commit, raw changes)`
//! item at a time; the materializer resolves blob content for those changes
//! and builds line-accurate `FileDiff`s.
//!
//! # Example
//!
//! ```no_run
//! use commit_crawler::git::{CommitWalker, DiffMaterializer};
//! use std::path::Path;
//!
//! let walker = CommitWalker::open(Path::new("/path/to/repo")).unwrap();
//! let materializer = DiffMaterializer::default();
//! for item in walker.start("HEAD", None).unwrap() {
//!     let walked = item.unwrap();
//!     let files = materializer.materialize(walker.repository(), &walked.changes);
//!     println!("{} touched {} files", walked.meta.hash, files.diffs.len());
//! }
//! ```

pub mod materializer;
pub mod walker;

pub use materializer::{is_binary, DiffMaterializer, Materialized};
pub use walker::{CancellationToken, CommitStream, CommitWalker, Edit, RawChange, WalkedCommit};
