//! Git operations layer.
//!
//! Every git invocation the core makes goes through the [`GitOps`]
//! trait so tests can substitute behavior. The production
//! implementation ([`Git`]) uses git2 for in-process queries and the
//! `git` binary for operations that mutate repository state.

pub mod real;

pub use real::Git;

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during git operations
#[derive(Error, Debug)]
pub enum GitError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Not a git repository: {0}")]
    NotARepo(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation failed: {0}")]
    OperationFailed(String),

    #[error("Reference error: {0}")]
    Reference(String),

    #[error("Rebase stopped with conflicts: {0}")]
    RebaseConflict(String),
}

impl GitError {
    pub fn is_rebase_conflict(&self) -> bool {
        matches!(self, GitError::RebaseConflict(_))
    }
}

/// Options for [`GitOps::checkout`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckoutOpts {
    /// Leave HEAD detached at the target.
    pub detach: bool,
    /// Throw away local modifications in conflicting paths.
    pub force: bool,
}

impl CheckoutOpts {
    pub fn detach() -> Self {
        Self {
            detach: true,
            force: false,
        }
    }
}

/// Abstract git surface used by the loader, scanner, planner, and the
/// per-project sync state machine.
pub trait GitOps: Send + Sync {
    /// Clone `url` into `dest`, optionally borrowing objects from a
    /// local reference repository when one is available.
    fn clone_repo(&self, url: &str, dest: &Path, reference: Option<&Path>)
        -> Result<(), GitError>;

    /// Clone `url` into `dest` as a bare mirror.
    fn clone_mirror(&self, url: &str, dest: &Path) -> Result<(), GitError>;

    /// Fetch a remote, optionally pruning deleted refs.
    fn fetch(&self, dir: &Path, remote: &str, prune: bool) -> Result<(), GitError>;

    fn set_remote_url(&self, dir: &Path, remote: &str, url: &str) -> Result<(), GitError>;

    /// Check out a branch, revision, or remote ref.
    fn checkout(&self, dir: &Path, rev: &str, opts: CheckoutOpts) -> Result<(), GitError>;

    /// Rebase the current branch onto `upstream`. A conflict surfaces
    /// as [`GitError::RebaseConflict`] with the rebase left in place;
    /// callers decide whether to abort.
    fn rebase(&self, dir: &Path, upstream: &str) -> Result<(), GitError>;

    fn rebase_abort(&self, dir: &Path) -> Result<(), GitError>;

    /// Stash local work. Returns whether anything was stashed.
    fn stash(&self, dir: &Path) -> Result<bool, GitError>;

    fn stash_pop(&self, dir: &Path) -> Result<(), GitError>;

    /// Current branch name, `None` when HEAD is detached or unborn.
    fn current_branch(&self, dir: &Path) -> Result<Option<String>, GitError>;

    /// Full hash of HEAD.
    fn current_revision(&self, dir: &Path) -> Result<String, GitError>;

    /// Root of the working tree containing `dir`.
    fn top_level(&self, dir: &Path) -> Result<PathBuf, GitError>;

    fn is_on_branch(&self, dir: &Path) -> Result<bool, GitError>;

    /// Names of all local branches.
    fn branches(&self, dir: &Path) -> Result<Vec<String>, GitError>;

    /// Upstream of the current branch (e.g. `origin/master`), if set.
    fn tracking_branch(&self, dir: &Path) -> Result<Option<String>, GitError>;

    fn has_uncommitted(&self, dir: &Path) -> Result<bool, GitError>;

    fn has_untracked(&self, dir: &Path) -> Result<bool, GitError>;

    /// Commit subjects in `from..to` order, newest first.
    fn log(&self, dir: &Path, from: &str, to: &str) -> Result<Vec<String>, GitError>;

    /// Stage a single file and commit it.
    fn commit_file(&self, dir: &Path, file: &Path, message: &str) -> Result<(), GitError>;
}
