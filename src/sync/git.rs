//! Git-backed mirror using a hybrid CLI + libgit2 approach.
//!
//! **CLI (with hardening) for operations that talk to the remote:**
//! - `clone_recursive` - full clone including submodules
//! - `fetch_origin` - update remote-tracking refs
//!
//! The build links libgit2 without https/ssh transports, and the CLI picks up
//! the user's credential helpers and proxy settings for free.
//!
//! **libgit2 for local operations:**
//! - `open_repository` - open an existing checkout
//! - `checkout` - branch creation and upstream configuration
//! - `resolve_revision` - rev-parse against local objects
//! - `hard_reset` - force the index and working tree to a commit

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use git2::build::CheckoutBuilder;
use git2::{BranchType, Repository, ResetType};

use super::error::{Operation, SyncError};
use super::{Provider, REMOTE_NAME, RevisionSync, validate_expression};
use crate::types::{BranchName, Revision};

/// Validate that a remote URL is safe to hand to the git CLI.
///
/// Rejects:
/// - Empty strings
/// - Strings starting with `-` (could be interpreted as flags)
/// - Strings containing null bytes or control characters
fn validate_url(url: &str) -> Result<(), SyncError> {
    if url.is_empty() {
        return Err(SyncError::InvalidInput(
            "remote URL cannot be empty".to_string(),
        ));
    }
    if url.starts_with('-') {
        return Err(SyncError::InvalidInput(format!(
            "remote URL cannot start with '-': {}",
            url
        )));
    }
    if url.bytes().any(|b| b < 0x20 || b == 0x7f) {
        return Err(SyncError::InvalidInput(
            "remote URL cannot contain null or control characters".to_string(),
        ));
    }
    Ok(())
}

fn path_str<'a>(path: &'a Path, what: &str) -> Result<&'a str, SyncError> {
    path.to_str()
        .ok_or_else(|| SyncError::InvalidInput(format!("{} path is not valid UTF-8", what)))
}

/// Whether `path` can receive a fresh clone: missing, or an empty directory.
fn clone_target_state(path: &Path) -> Result<bool, SyncError> {
    if !path.exists() {
        return Ok(false);
    }

    if !path.is_dir() {
        return Err(SyncError::Conflict {
            op: Operation::Clone,
            target: path.display().to_string(),
            message: "destination exists and is not a directory".to_string(),
        });
    }

    let mut entries =
        std::fs::read_dir(path).map_err(|e| SyncError::io(Operation::Clone, path.display(), e))?;
    if entries.next().is_some() {
        return Err(SyncError::Conflict {
            op: Operation::Clone,
            target: path.display().to_string(),
            message: "destination directory is not empty".to_string(),
        });
    }

    Ok(true)
}

/// stderr fragments from a held lock on a ref, the index or the config.
const LOCK_PATTERNS: [&str; 3] = ["cannot lock ref", ".lock': file exists", "unable to lock"];

/// stderr fragments only ever printed after talking to the remote failed.
const REMOTE_PATTERNS: [&str; 5] = [
    "could not read from remote",
    "unable to access",
    "could not resolve host",
    "authentication failed",
    "permission denied (publickey",
];

/// stderr fragments from local filesystem failures.
const LOCAL_IO_PATTERNS: [&str; 6] = [
    "permission denied",
    "read-only file system",
    "no space left on device",
    "could not create",
    "unable to create",
    "unable to write",
];

/// stderr fragments from an unreachable or missing remote.
const TRANSPORT_PATTERNS: [&str; 6] = [
    "connection refused",
    "connection timed out",
    "failed to connect",
    "repository not found",
    "does not appear to be a git repository",
    "does not exist",
];

/// Map a failed clone or fetch to an error kind by what git printed.
///
/// A held lock wins over everything, then unambiguous remote failures, then
/// local filesystem failures: a fetch that reached the remote can still die
/// on a full disk. Output matching nothing known is reported as an engine
/// failure, not as transient.
fn classify_cli_failure(op: Operation, target: &str, stderr: &str) -> SyncError {
    let message = stderr.trim().to_string();
    let lowered = message.to_lowercase();
    let mentions = |patterns: &[&str]| patterns.iter().any(|p| lowered.contains(p));

    if mentions(&LOCK_PATTERNS) {
        SyncError::Conflict {
            op,
            target: target.to_string(),
            message,
        }
    } else if mentions(&REMOTE_PATTERNS) {
        SyncError::Transport {
            op,
            target: target.to_string(),
            message,
        }
    } else if mentions(&LOCAL_IO_PATTERNS) {
        let kind = if lowered.contains("permission denied") {
            std::io::ErrorKind::PermissionDenied
        } else {
            std::io::ErrorKind::Other
        };
        SyncError::io(op, target, std::io::Error::new(kind, message))
    } else if mentions(&TRANSPORT_PATTERNS) {
        SyncError::Transport {
            op,
            target: target.to_string(),
            message,
        }
    } else {
        SyncError::Git {
            op,
            target: target.to_string(),
            source: git2::Error::from_str(&message),
        }
    }
}

/// Git CLI wrapper with security hardening.
#[derive(Debug, Clone)]
pub struct GitCli {
    git_path: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    /// Create a new GitCli instance using the system git.
    pub fn new() -> Self {
        Self {
            git_path: "git".into(),
        }
    }

    /// Use a specific git executable.
    pub fn with_path(git_path: impl Into<String>) -> Self {
        Self {
            git_path: git_path.into(),
        }
    }

    /// Create a hardened Command with security settings.
    ///
    /// Applies:
    /// - `GIT_LFS_SKIP_SMUDGE=1` - skip LFS file downloads
    /// - `GIT_TERMINAL_PROMPT=0` - disable interactive prompts
    /// - `core.hooksPath=` - disable hooks execution
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.git_path);
        cmd.env("GIT_LFS_SKIP_SMUDGE", "1");
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd.args(["-c", "core.hooksPath="]);
        cmd.stdin(Stdio::null());
        cmd
    }

    /// Report the installed git version, e.g. `git version 2.43.0`.
    pub fn version(&self) -> std::io::Result<String> {
        let output = Command::new(&self.git_path).arg("--version").output()?;
        if !output.status.success() {
            return Err(std::io::Error::other(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Clone `url` into `dest` with full history and all submodules.
    ///
    /// `dest` must be missing or empty. A directory the clone created is
    /// removed again if the clone fails.
    pub fn clone_recursive(&self, url: &str, dest: &Path) -> Result<(), SyncError> {
        validate_url(url)?;

        let dest_existed = clone_target_state(dest)?;

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::io(Operation::Clone, parent.display(), e))?;
        }

        let dest_str = path_str(dest, "destination")?;

        let output = self
            .command()
            .args(["clone", "--recurse-submodules", "--"])
            .arg(url)
            .arg(dest_str)
            .output()
            .map_err(|e| SyncError::io(Operation::Clone, url, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !dest_existed {
                if let Err(e) = std::fs::remove_dir_all(dest) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        log::warn!("failed to clean up {}: {}", dest.display(), e);
                    }
                }
            }
            return Err(classify_cli_failure(Operation::Clone, url, &stderr));
        }

        Ok(())
    }

    /// Fetch new history from `origin` into the remote-tracking refs.
    pub fn fetch_origin(&self, mirror_path: &Path) -> Result<(), SyncError> {
        let mirror_str = path_str(mirror_path, "mirror")?;

        let output = self
            .command()
            .arg("-C")
            .arg(mirror_str)
            .args(["fetch", REMOTE_NAME])
            .output()
            .map_err(|e| SyncError::io(Operation::Fetch, mirror_path.display(), e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_cli_failure(
                Operation::Fetch,
                &mirror_path.display().to_string(),
                &stderr,
            ));
        }

        Ok(())
    }
}

/// Check whether a git executable is on `PATH`.
pub fn git_available() -> bool {
    GitCli::new().version().is_ok()
}

/// Open an existing repository at the given path.
fn open_repository(path: &Path, op: Operation) -> Result<Repository, SyncError> {
    Repository::open(path).map_err(|e| {
        if e.code() == git2::ErrorCode::NotFound {
            SyncError::NotFound {
                op,
                target: path.display().to_string(),
                message: "no repository at this path".to_string(),
            }
        } else {
            SyncError::from_git(op, path.display(), e)
        }
    })
}

/// Branch HEAD points at, if any. Works for unborn branches too.
fn current_branch(repo: &Repository) -> Option<BranchName> {
    let head = repo.find_reference("HEAD").ok()?;
    let target = head.symbolic_target()?;
    target.strip_prefix("refs/heads/")?.parse().ok()
}

/// Creates [`GitMirror`]s through the git CLI.
#[derive(Debug, Clone, Default)]
pub struct GitProvider {
    git: GitCli,
}

impl GitProvider {
    pub fn new(git: GitCli) -> Self {
        Self { git }
    }

    /// Re-attach to the mirror at `dest`, taking the remote URL from its
    /// `origin` instead of checking it against a configured one.
    pub fn open_existing(&self, dest: &Path) -> Result<GitMirror, SyncError> {
        self.attach(dest, None)
    }

    fn attach(&self, dest: &Path, expected_url: Option<&str>) -> Result<GitMirror, SyncError> {
        let repo = open_repository(dest, Operation::Open)?;

        let remote = repo.find_remote(REMOTE_NAME).map_err(|e| {
            if e.code() == git2::ErrorCode::NotFound {
                SyncError::Conflict {
                    op: Operation::Open,
                    target: dest.display().to_string(),
                    message: format!("repository has no '{}' remote", REMOTE_NAME),
                }
            } else {
                SyncError::from_git(Operation::Open, dest.display(), e)
            }
        })?;

        let configured = remote.url().unwrap_or_default().to_string();
        if let Some(expected) = expected_url
            && configured != expected
        {
            return Err(SyncError::Conflict {
                op: Operation::Open,
                target: dest.display().to_string(),
                message: format!(
                    "'{}' points at {}, expected {}",
                    REMOTE_NAME, configured, expected
                ),
            });
        }

        log::debug!("Opened existing mirror at {}", dest.display());
        Ok(GitMirror {
            path: dest.to_path_buf(),
            remote_url: configured,
            git: self.git.clone(),
        })
    }
}

impl Provider for GitProvider {
    type Mirror = GitMirror;

    fn clone_mirror(&self, dest: &Path, remote_url: &str) -> Result<GitMirror, SyncError> {
        log::info!("Cloning {} into {}", remote_url, dest.display());
        self.git.clone_recursive(remote_url, dest)?;

        open_repository(dest, Operation::Clone)?;
        Ok(GitMirror {
            path: dest.to_path_buf(),
            remote_url: remote_url.to_string(),
            git: self.git.clone(),
        })
    }

    fn open_mirror(&self, dest: &Path, remote_url: &str) -> Result<GitMirror, SyncError> {
        self.attach(dest, Some(remote_url))
    }

    fn mirror_exists(&self, dest: &Path) -> bool {
        Repository::open(dest).is_ok()
    }
}

/// A non-bare clone whose working tree is the published document tree.
///
/// The repository is reopened for every operation because libgit2 caches
/// refs, and the CLI may have moved them since the last call.
#[derive(Debug)]
pub struct GitMirror {
    path: PathBuf,
    remote_url: String,
    git: GitCli,
}

impl RevisionSync for GitMirror {
    fn path(&self) -> &Path {
        &self.path
    }

    fn remote_url(&self) -> &str {
        &self.remote_url
    }

    fn branch(&self) -> Option<BranchName> {
        let repo = open_repository(&self.path, Operation::Open).ok()?;
        current_branch(&repo)
    }

    fn checkout(&mut self, branch: &BranchName) -> Result<(), SyncError> {
        let repo = open_repository(&self.path, Operation::Checkout)?;
        let upstream = branch.remote_tracking();
        let to_sync_err = |e: git2::Error| SyncError::from_git(Operation::Checkout, branch, e);

        let remote_ref = format!("refs/remotes/{}", upstream);
        let tip = repo
            .find_reference(&remote_ref)
            .and_then(|r| r.peel_to_commit())
            .map_err(|e| SyncError::from_git(Operation::Checkout, &upstream, e))?;

        let mut local = match repo.find_branch(branch.as_str(), BranchType::Local) {
            Ok(local) => {
                match local.upstream() {
                    Ok(current) => {
                        let current_name = current.name().map_err(to_sync_err)?;
                        if current_name != Some(upstream.as_str()) {
                            return Err(SyncError::Conflict {
                                op: Operation::Checkout,
                                target: branch.to_string(),
                                message: format!(
                                    "local branch already tracks {}",
                                    current_name.unwrap_or("<non-utf8 ref>")
                                ),
                            });
                        }
                    }
                    Err(e) if e.code() == git2::ErrorCode::NotFound => {}
                    Err(e) => return Err(to_sync_err(e)),
                }
                local
            }
            Err(e) if e.code() == git2::ErrorCode::NotFound => {
                log::debug!("Creating local branch {} at {}", branch, tip.id());
                repo.branch(branch.as_str(), &tip, false)
                    .map_err(to_sync_err)?
            }
            Err(e) => return Err(to_sync_err(e)),
        };

        local.set_upstream(Some(&upstream)).map_err(to_sync_err)?;
        repo.set_head(&format!("refs/heads/{}", branch))
            .map_err(to_sync_err)?;

        log::info!("Checked out {} tracking {}", branch, upstream);
        Ok(())
    }

    fn fetch(&mut self) -> Result<(), SyncError> {
        log::debug!("Fetching {} into {}", self.remote_url, self.path.display());
        self.git.fetch_origin(&self.path)
    }

    fn resolve_revision(&self, expr: &str) -> Result<Revision, SyncError> {
        validate_expression(expr)?;

        let repo = open_repository(&self.path, Operation::Resolve)?;
        let commit = repo
            .revparse_single(expr)
            .and_then(|object| object.peel_to_commit())
            .map_err(|e| SyncError::from_git(Operation::Resolve, expr, e))?;

        let revision = Revision::from(commit.id());
        log::debug!("Resolved {} to {}", expr, revision);
        Ok(revision)
    }

    fn hard_reset(&mut self, revision: &Revision) -> Result<(), SyncError> {
        let repo = open_repository(&self.path, Operation::Reset)?;
        let to_sync_err = |e: git2::Error| SyncError::from_git(Operation::Reset, revision, e);

        let oid = git2::Oid::from_str(revision.as_str()).map_err(to_sync_err)?;
        let commit = repo.find_commit(oid).map_err(to_sync_err)?;

        let mut checkout = CheckoutBuilder::new();
        checkout.force();
        repo.reset(commit.as_object(), ResetType::Hard, Some(&mut checkout))
            .map_err(to_sync_err)?;

        log::info!("Reset {} to {}", self.path.display(), revision.short());
        Ok(())
    }
}
