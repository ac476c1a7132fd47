//! Local mirror of a remote documentation repository.
//!
//! A mirror moves through a small state machine: it does not exist until
//! [`Provider::clone_mirror`] succeeds, after which [`RevisionSync::fetch`]
//! brings in new history, [`RevisionSync::resolve_revision`] turns a symbolic
//! name into a commit, and [`RevisionSync::hard_reset`] moves the working
//! tree to that commit. [`RevisionSync::checkout`] only changes which branch
//! HEAD names; the files stay where they are until the next hard reset.
//!
//! Mutating operations take `&mut self`. Callers sharing a mirror across
//! threads wrap it in a `Mutex`, and [`Syncer`] adds a lock file so separate
//! processes do not reset the same tree at once.

mod error;
mod git;
mod lock;
pub mod memory;
mod syncer;

use std::path::Path;

use crate::types::{BranchName, Revision};

pub use error::{ErrorKind, Operation, SyncError};
pub use git::{GitCli, GitMirror, GitProvider, git_available};
pub use lock::{DEFAULT_LOCK_TIMEOUT, MirrorLock, lock_path_for};
pub use syncer::{SyncOutcome, Syncer, bootstrap};

/// Name of the only remote a mirror talks to.
pub const REMOTE_NAME: &str = "origin";

/// Creates mirrors and re-attaches to existing ones.
pub trait Provider {
    type Mirror: RevisionSync;

    /// Clone `remote_url` into `dest`, including nested submodules.
    ///
    /// `dest` may be missing or an empty directory; anything else is a conflict.
    fn clone_mirror(&self, dest: &Path, remote_url: &str) -> Result<Self::Mirror, SyncError>;

    /// Re-attach to a mirror a previous clone left at `dest`.
    fn open_mirror(&self, dest: &Path, remote_url: &str) -> Result<Self::Mirror, SyncError>;

    /// Whether `dest` already holds a mirror this provider can open.
    fn mirror_exists(&self, dest: &Path) -> bool;
}

/// Operations on one cloned mirror.
pub trait RevisionSync {
    /// Working tree location, fixed at clone time.
    fn path(&self) -> &Path;

    /// Remote URL, fixed at clone time.
    fn remote_url(&self) -> &str;

    /// Branch HEAD names right now, or `None` when HEAD is detached.
    ///
    /// Read from the mirror's current state on every call: another process
    /// sharing the path may have checked out a different branch.
    fn branch(&self) -> Option<BranchName>;

    /// Make `branch` a local branch tracking `origin/<branch>` and point HEAD at it.
    ///
    /// Does not touch the working tree. Calling it again with the same name is a no-op.
    fn checkout(&mut self, branch: &BranchName) -> Result<(), SyncError>;

    /// Download new history from `origin` without moving any local branch or file.
    fn fetch(&mut self) -> Result<(), SyncError>;

    /// Resolve a revision expression (`HEAD`, `origin/main`, `v1.0`, `HEAD~2`) to a commit.
    fn resolve_revision(&self, expr: &str) -> Result<Revision, SyncError>;

    /// Force HEAD and every tracked file to `revision`.
    ///
    /// Local edits to tracked files are discarded; untracked files are kept.
    fn hard_reset(&mut self, revision: &Revision) -> Result<(), SyncError>;
}

/// Reject revision expressions that are empty or could be read as flags.
pub(crate) fn validate_expression(expr: &str) -> Result<(), SyncError> {
    if expr.is_empty() {
        return Err(SyncError::InvalidInput(
            "revision expression cannot be empty".to_string(),
        ));
    }
    if expr.starts_with('-') {
        return Err(SyncError::InvalidInput(format!(
            "revision expression cannot start with '-': {}",
            expr
        )));
    }
    if expr.chars().any(char::is_control) {
        return Err(SyncError::InvalidInput(
            "revision expression cannot contain control characters".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_expression_accepts_common_forms() {
        for expr in ["HEAD", "origin/main", "v1.0.0", "HEAD~2", "main^{commit}"] {
            assert!(validate_expression(expr).is_ok(), "{} should be valid", expr);
        }
    }

    #[test]
    fn validate_expression_rejects_flags_and_empty() {
        assert!(matches!(
            validate_expression(""),
            Err(SyncError::InvalidInput(_))
        ));
        assert!(matches!(
            validate_expression("--all"),
            Err(SyncError::InvalidInput(_))
        ));
        assert!(matches!(
            validate_expression("HEAD\n"),
            Err(SyncError::InvalidInput(_))
        ));
    }
}
