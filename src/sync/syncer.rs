use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::SyncError;
use super::lock::{DEFAULT_LOCK_TIMEOUT, MirrorLock};
use super::{Provider, RevisionSync};
use crate::types::{BranchName, Revision};

/// What one sync pass did to the mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// HEAD before the pass, if it resolved.
    pub previous: Option<Revision>,
    /// HEAD after the pass.
    pub current: Revision,
}

impl SyncOutcome {
    /// Whether HEAD moved.
    pub fn changed(&self) -> bool {
        self.previous.as_ref() != Some(&self.current)
    }
}

/// Open the mirror at `path` if one exists, clone it otherwise, then check out `branch`.
pub fn bootstrap<P: Provider>(
    provider: &P,
    path: &Path,
    remote_url: &str,
    branch: &BranchName,
) -> Result<P::Mirror, SyncError> {
    let mut mirror = if provider.mirror_exists(path) {
        provider.open_mirror(path, remote_url)?
    } else {
        provider.clone_mirror(path, remote_url)?
    };

    if mirror.branch().as_ref() != Some(branch) {
        mirror.checkout(branch)?;
    }
    Ok(mirror)
}

/// Drives a mirror through fetch, resolve and hard reset for one branch.
pub struct Syncer<M> {
    mirror: M,
    branch: BranchName,
    lock_path: Option<PathBuf>,
    lock_timeout: Duration,
    /// Commit this syncer last reset the working tree to.
    last_reset: Option<Revision>,
}

impl<M: RevisionSync> Syncer<M> {
    pub fn new(mirror: M, branch: BranchName) -> Self {
        Self {
            mirror,
            branch,
            lock_path: None,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            last_reset: None,
        }
    }

    /// Hold an exclusive lock on `lock_path` for the duration of every pass.
    pub fn with_lock_file(mut self, lock_path: impl Into<PathBuf>) -> Self {
        self.lock_path = Some(lock_path.into());
        self
    }

    /// How long to wait for the lock file before giving up on a pass.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn mirror(&self) -> &M {
        &self.mirror
    }

    pub fn branch(&self) -> &BranchName {
        &self.branch
    }

    fn lock(&self) -> Result<Option<MirrorLock>, SyncError> {
        match &self.lock_path {
            Some(path) => MirrorLock::acquire_with_timeout(path, self.lock_timeout)
                .map(Some)
                .map_err(SyncError::Lock),
            None => Ok(None),
        }
    }

    /// Switch to `branch` under the lock and follow it on later passes.
    ///
    /// Only the tracking branch and HEAD change; the files move on the next
    /// [`Syncer::sync`].
    pub fn checkout(&mut self, branch: BranchName) -> Result<(), SyncError> {
        let _lock = self.lock()?;
        self.mirror.checkout(&branch)?;
        self.branch = branch;
        Ok(())
    }

    /// Run one pass: fetch, resolve `origin/<branch>`, hard reset to it.
    ///
    /// The reset always runs, even when HEAD already names the target, because
    /// a preceding checkout moves HEAD without materializing the files.
    pub fn sync(&mut self) -> Result<SyncOutcome, SyncError> {
        let _lock = self.lock()?;

        // Taken before any checkout: HEAD moves with the branch switch, the
        // working tree does not.
        let previous = match &self.last_reset {
            Some(revision) => Some(revision.clone()),
            None => self.mirror.resolve_revision("HEAD").ok(),
        };

        self.mirror.fetch()?;

        if self.mirror.branch().as_ref() != Some(&self.branch) {
            self.mirror.checkout(&self.branch)?;
        }

        let target = self
            .mirror
            .resolve_revision(&self.branch.remote_tracking())?;

        self.mirror.hard_reset(&target)?;
        self.last_reset = Some(target.clone());

        let outcome = SyncOutcome {
            previous,
            current: target,
        };
        if outcome.changed() {
            log::info!(
                "{} advanced to {} ({})",
                self.mirror.path().display(),
                outcome.current.short(),
                self.branch
            );
        } else {
            log::debug!(
                "{} already at {}",
                self.mirror.path().display(),
                outcome.current.short()
            );
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::ErrorKind;
    use crate::sync::memory::{MemoryProvider, MemoryRemote};
    use tempfile::tempdir;

    const URL: &str = "https://git.example.com/acme/api-docs.git";

    fn setup() -> (MemoryRemote, MemoryProvider) {
        let remote = MemoryRemote::new("main");
        remote.commit("main", &[("README.md", "# Docs")]);
        let mut provider = MemoryProvider::new();
        provider.register(URL, remote.clone());
        (remote, provider)
    }

    fn main_branch() -> BranchName {
        "main".parse().unwrap()
    }

    #[test]
    fn bootstrap_clones_and_checks_out() {
        let (remote, provider) = setup();
        remote.commit("docs", &[("guide.md", "# Guide")]);
        let docs: BranchName = "docs".parse().unwrap();

        let mirror = bootstrap(&provider, Path::new("/srv/docs"), URL, &docs).unwrap();

        assert_eq!(mirror.branch(), Some(docs));
        assert_eq!(mirror.upstream_of("docs"), Some("origin/docs"));
        assert!(!mirror.worktree().contains_key("guide.md"));
    }

    #[test]
    fn sync_advances_to_upstream_tip() {
        let (remote, provider) = setup();
        let mirror = bootstrap(&provider, Path::new("/srv/docs"), URL, &main_branch()).unwrap();
        let mut syncer = Syncer::new(mirror, main_branch());

        let first = syncer.sync().unwrap();
        assert!(!first.changed());

        let pushed = remote.commit("main", &[("api/users.md", "# Users")]);
        let second = syncer.sync().unwrap();
        assert!(second.changed());
        assert_eq!(second.current, pushed);
        assert_eq!(second.previous, Some(first.current));
        assert!(syncer.mirror().worktree().contains_key("api/users.md"));
    }

    #[test]
    fn sync_materializes_checked_out_branch() {
        let (remote, provider) = setup();
        let docs_tip = remote.commit("docs", &[("guide.md", "# Guide")]);
        let docs: BranchName = "docs".parse().unwrap();
        let mirror = bootstrap(&provider, Path::new("/srv/docs"), URL, &docs).unwrap();
        let mut syncer = Syncer::new(mirror, docs);

        let outcome = syncer.sync().unwrap();

        assert_eq!(outcome.current, docs_tip);
        assert!(syncer.mirror().worktree().contains_key("guide.md"));
    }

    #[test]
    fn sync_switches_to_configured_branch() {
        let (remote, provider) = setup();
        remote.commit("docs", &[("guide.md", "# Guide")]);
        let mirror = provider.clone_mirror(Path::new("/srv/docs"), URL).unwrap();
        let docs: BranchName = "docs".parse().unwrap();
        let mut syncer = Syncer::new(mirror, docs.clone());

        syncer.sync().unwrap();

        assert_eq!(syncer.mirror().branch(), Some(docs));
        assert!(syncer.mirror().worktree().contains_key("guide.md"));
    }

    #[test]
    fn sync_reports_transport_failure_and_keeps_head() {
        let (remote, provider) = setup();
        let mirror = bootstrap(&provider, Path::new("/srv/docs"), URL, &main_branch()).unwrap();
        let mut syncer = Syncer::new(mirror, main_branch());
        let before = syncer.sync().unwrap().current;

        remote.commit("main", &[("new.md", "new")]);
        remote.set_reachable(false);

        let err = syncer.sync().expect_err("sync must fail while offline");
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.is_transient());
        assert_eq!(syncer.mirror().resolve_revision("HEAD").unwrap(), before);

        remote.set_reachable(true);
        assert!(syncer.sync().unwrap().changed());
    }

    #[test]
    fn sync_times_out_when_lock_is_held() {
        let (_remote, provider) = setup();
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join("docmirror.lock");
        let mirror = bootstrap(&provider, Path::new("/srv/docs"), URL, &main_branch()).unwrap();
        let mut syncer = Syncer::new(mirror, main_branch())
            .with_lock_file(&lock_path)
            .with_lock_timeout(Duration::from_millis(50));

        let held = MirrorLock::acquire(&lock_path).unwrap();
        let err = syncer.sync().expect_err("sync must wait for the lock");
        assert!(matches!(err, SyncError::Lock(_)));
        assert!(err.is_transient());

        drop(held);
        assert!(syncer.sync().is_ok());
    }

    #[test]
    fn branch_switch_counts_as_changed() {
        let (remote, provider) = setup();
        let main_tip = remote.tip("main").unwrap();
        let docs_tip = remote.commit("docs", &[("guide.md", "# Guide")]);
        let mirror = provider.clone_mirror(Path::new("/srv/docs"), URL).unwrap();
        let mut syncer = Syncer::new(mirror, "docs".parse().unwrap());

        let outcome = syncer.sync().unwrap();

        assert!(outcome.changed());
        assert_eq!(outcome.previous, Some(main_tip));
        assert_eq!(outcome.current, docs_tip);
        assert!(syncer.mirror().worktree().contains_key("guide.md"));

        assert!(!syncer.sync().unwrap().changed());
    }

    #[test]
    fn checkout_retargets_later_passes() {
        let (remote, provider) = setup();
        let docs_tip = remote.commit("docs", &[("guide.md", "# Guide")]);
        let mirror = bootstrap(&provider, Path::new("/srv/docs"), URL, &main_branch()).unwrap();
        let mut syncer = Syncer::new(mirror, main_branch());
        let main_tip = syncer.sync().unwrap().current;

        let docs: BranchName = "docs".parse().unwrap();
        syncer.checkout(docs.clone()).unwrap();
        assert_eq!(syncer.branch(), &docs);
        assert!(!syncer.mirror().worktree().contains_key("guide.md"));

        let outcome = syncer.sync().unwrap();
        assert_eq!(outcome.previous, Some(main_tip));
        assert_eq!(outcome.current, docs_tip);
        assert!(syncer.mirror().worktree().contains_key("guide.md"));
    }

    #[test]
    fn checkout_waits_for_the_lock() {
        let (remote, provider) = setup();
        remote.commit("docs", &[("guide.md", "# Guide")]);
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join("docmirror.lock");
        let mirror = bootstrap(&provider, Path::new("/srv/docs"), URL, &main_branch()).unwrap();
        let mut syncer = Syncer::new(mirror, main_branch())
            .with_lock_file(&lock_path)
            .with_lock_timeout(Duration::from_millis(50));
        let docs: BranchName = "docs".parse().unwrap();

        let held = MirrorLock::acquire(&lock_path).unwrap();
        let err = syncer
            .checkout(docs.clone())
            .expect_err("checkout must not run while a pass holds the lock");
        assert!(matches!(err, SyncError::Lock(_)));
        assert_eq!(syncer.mirror().branch(), Some(main_branch()));
        assert_eq!(syncer.branch(), &main_branch());

        drop(held);
        syncer.checkout(docs.clone()).unwrap();
        assert_eq!(syncer.mirror().branch(), Some(docs));
    }

    #[test]
    fn outcome_without_previous_head_counts_as_changed() {
        let current: Revision = "8ab686eafeb1f44702738c8b0f24f2567c36da6d".parse().unwrap();
        let outcome = SyncOutcome {
            previous: None,
            current,
        };
        assert!(outcome.changed());
    }
}
