//! In-memory stand-in for a remote and its mirrors.
//!
//! Follows the same contract as the git-backed mirror so code driving a
//! [`RevisionSync`] can be tested without the git CLI or a network. Files are
//! held as `path -> contents` snapshots; nothing is written to disk.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::error::{Operation, SyncError};
use super::{Provider, RevisionSync, validate_expression};
use crate::types::{BranchName, Revision};

/// File contents keyed by slash-separated path.
pub type Snapshot = BTreeMap<String, String>;

#[derive(Debug)]
struct Commit {
    parent: Option<Revision>,
    files: Snapshot,
}

#[derive(Debug)]
struct RemoteState {
    commits: HashMap<Revision, Arc<Commit>>,
    branches: BTreeMap<String, Revision>,
    default_branch: String,
    reachable: bool,
    next_id: u64,
}

/// A remote repository shared between the test and the mirrors cloned from it.
#[derive(Debug, Clone)]
pub struct MemoryRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl MemoryRemote {
    /// Create a remote whose default branch is `default_branch`, with no commits yet.
    pub fn new(default_branch: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(RemoteState {
                commits: HashMap::new(),
                branches: BTreeMap::new(),
                default_branch: default_branch.to_string(),
                reachable: true,
                next_id: 1,
            })),
        }
    }

    /// Commit `files` on top of `branch`, creating the branch from the default
    /// branch's tip if it does not exist yet.
    pub fn commit(&self, branch: &str, files: &[(&str, &str)]) -> Revision {
        let mut state = self.state.lock().unwrap();

        let parent = state
            .branches
            .get(branch)
            .or_else(|| state.branches.get(&state.default_branch))
            .cloned();
        let mut snapshot = parent
            .as_ref()
            .map(|rev| state.commits[rev].files.clone())
            .unwrap_or_default();
        for (path, contents) in files {
            snapshot.insert(path.to_string(), contents.to_string());
        }

        let id = state.next_id;
        state.next_id += 1;
        let revision = revision_for(id);

        state.commits.insert(
            revision.clone(),
            Arc::new(Commit {
                parent,
                files: snapshot,
            }),
        );
        state.branches.insert(branch.to_string(), revision.clone());
        revision
    }

    /// Simulate the remote going away (or coming back).
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unwrap().reachable = reachable;
    }

    /// Current tip of `branch` on the remote.
    pub fn tip(&self, branch: &str) -> Option<Revision> {
        self.state.lock().unwrap().branches.get(branch).cloned()
    }
}

/// Fake commit id for the `id`-th commit.
///
/// The leading twelve digits come from scrambling the counter, so
/// [`Revision::short`] tells commits apart in logs; the trailing digits carry
/// the counter itself, which keeps every id unique.
fn revision_for(id: u64) -> Revision {
    let scrambled = id.wrapping_add(1).wrapping_mul(0x9e37_79b9_7f4a_7c15) >> 16;
    format!("{:012x}{:028x}", scrambled, id)
        .parse()
        .expect("40 hex digits are a valid revision")
}

/// Hands out [`MemoryMirror`]s for registered remotes.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    remotes: HashMap<String, MemoryRemote>,
    cloned: Mutex<HashSet<PathBuf>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `remote` reachable under `url`.
    pub fn register(&mut self, url: &str, remote: MemoryRemote) {
        self.remotes.insert(url.to_string(), remote);
    }

    fn remote(&self, op: Operation, url: &str) -> Result<&MemoryRemote, SyncError> {
        let remote = self.remotes.get(url).ok_or_else(|| SyncError::Transport {
            op,
            target: url.to_string(),
            message: "repository not found".to_string(),
        })?;
        if !remote.state.lock().unwrap().reachable {
            return Err(SyncError::Transport {
                op,
                target: url.to_string(),
                message: "could not connect to remote".to_string(),
            });
        }
        Ok(remote)
    }
}

impl Provider for MemoryProvider {
    type Mirror = MemoryMirror;

    fn clone_mirror(&self, dest: &Path, remote_url: &str) -> Result<MemoryMirror, SyncError> {
        if self.cloned.lock().unwrap().contains(dest) {
            return Err(SyncError::Conflict {
                op: Operation::Clone,
                target: dest.display().to_string(),
                message: "destination directory is not empty".to_string(),
            });
        }

        let remote = self.remote(Operation::Clone, remote_url)?;
        let mut mirror = MemoryMirror {
            path: dest.to_path_buf(),
            remote_url: remote_url.to_string(),
            remote: remote.clone(),
            objects: HashMap::new(),
            remote_refs: BTreeMap::new(),
            branches: BTreeMap::new(),
            head: Head::Detached(None),
            index: Snapshot::new(),
            worktree: Snapshot::new(),
        };
        mirror.download();

        let default_branch = remote.state.lock().unwrap().default_branch.clone();
        let tip = mirror.remote_refs.get(&default_branch).cloned();
        if let Ok(name) = default_branch.parse::<BranchName>() {
            if let Some(tip) = &tip {
                mirror.branches.insert(
                    name.to_string(),
                    LocalBranch {
                        tip: tip.clone(),
                        upstream: Some(name.remote_tracking()),
                    },
                );
            }
            mirror.head = Head::Branch(name);
        }
        if let Some(tip) = tip {
            mirror.materialize(&tip);
        }

        self.cloned.lock().unwrap().insert(dest.to_path_buf());
        Ok(mirror)
    }

    fn open_mirror(&self, dest: &Path, _remote_url: &str) -> Result<MemoryMirror, SyncError> {
        // Nothing survives a process in memory.
        Err(SyncError::NotFound {
            op: Operation::Open,
            target: dest.display().to_string(),
            message: "no repository at this path".to_string(),
        })
    }

    fn mirror_exists(&self, _dest: &Path) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
struct LocalBranch {
    tip: Revision,
    upstream: Option<String>,
}

#[derive(Debug, Clone)]
enum Head {
    Branch(BranchName),
    Detached(Option<Revision>),
}

/// A mirror whose history and working tree live in memory.
#[derive(Debug)]
pub struct MemoryMirror {
    path: PathBuf,
    remote_url: String,
    remote: MemoryRemote,
    objects: HashMap<Revision, Arc<Commit>>,
    remote_refs: BTreeMap<String, Revision>,
    branches: BTreeMap<String, LocalBranch>,
    head: Head,
    index: Snapshot,
    worktree: Snapshot,
}

impl MemoryMirror {
    /// Current working tree contents.
    pub fn worktree(&self) -> &Snapshot {
        &self.worktree
    }

    /// Overwrite or add a working tree file, as a local edit would.
    pub fn write_file(&mut self, path: &str, contents: &str) {
        self.worktree.insert(path.to_string(), contents.to_string());
    }

    /// Upstream a local branch tracks, e.g. `origin/main`.
    pub fn upstream_of(&self, branch: &str) -> Option<&str> {
        self.branches.get(branch)?.upstream.as_deref()
    }

    /// Copy every remote commit and branch tip into the local store.
    fn download(&mut self) {
        let state = self.remote.state.lock().unwrap();
        for (rev, commit) in &state.commits {
            self.objects.insert(rev.clone(), Arc::clone(commit));
        }
        self.remote_refs = state.branches.clone();
    }

    /// Replace tracked files with `revision`'s snapshot, leaving untracked files alone.
    fn materialize(&mut self, revision: &Revision) {
        let files = self.objects[revision].files.clone();
        let index = std::mem::take(&mut self.index);
        self.worktree.retain(|path, _| !index.contains_key(path));
        for (path, contents) in &files {
            self.worktree.insert(path.clone(), contents.clone());
        }
        self.index = files;
    }

    fn head_revision(&self) -> Option<Revision> {
        match &self.head {
            Head::Branch(name) => self.branches.get(name.as_str()).map(|b| b.tip.clone()),
            Head::Detached(rev) => rev.clone(),
        }
    }

    fn not_found(op: Operation, target: &str) -> SyncError {
        SyncError::NotFound {
            op,
            target: target.to_string(),
            message: "unknown revision".to_string(),
        }
    }

    /// Resolve a name without ancestry suffixes.
    fn resolve_name(&self, name: &str) -> Option<Revision> {
        if name == "HEAD" {
            return self.head_revision();
        }
        if let Some(branch) = name.strip_prefix("origin/") {
            return self.remote_refs.get(branch).cloned();
        }
        if let Some(local) = self.branches.get(name) {
            return Some(local.tip.clone());
        }
        name.parse::<Revision>()
            .ok()
            .filter(|rev| self.objects.contains_key(rev))
    }
}

impl RevisionSync for MemoryMirror {
    fn path(&self) -> &Path {
        &self.path
    }

    fn remote_url(&self) -> &str {
        &self.remote_url
    }

    fn branch(&self) -> Option<BranchName> {
        match &self.head {
            Head::Branch(name) => Some(name.clone()),
            Head::Detached(_) => None,
        }
    }

    fn checkout(&mut self, branch: &BranchName) -> Result<(), SyncError> {
        let upstream = branch.remote_tracking();
        let tip = self
            .remote_refs
            .get(branch.as_str())
            .cloned()
            .ok_or_else(|| Self::not_found(Operation::Checkout, &upstream))?;

        match self.branches.get_mut(branch.as_str()) {
            Some(local) => {
                if let Some(current) = &local.upstream {
                    if *current != upstream {
                        return Err(SyncError::Conflict {
                            op: Operation::Checkout,
                            target: branch.to_string(),
                            message: format!("local branch already tracks {}", current),
                        });
                    }
                }
                local.upstream = Some(upstream);
            }
            None => {
                self.branches.insert(
                    branch.to_string(),
                    LocalBranch {
                        tip,
                        upstream: Some(upstream),
                    },
                );
            }
        }

        self.head = Head::Branch(branch.clone());
        Ok(())
    }

    fn fetch(&mut self) -> Result<(), SyncError> {
        if !self.remote.state.lock().unwrap().reachable {
            return Err(SyncError::Transport {
                op: Operation::Fetch,
                target: self.remote_url.clone(),
                message: "could not connect to remote".to_string(),
            });
        }
        self.download();
        Ok(())
    }

    fn resolve_revision(&self, expr: &str) -> Result<Revision, SyncError> {
        validate_expression(expr)?;

        // `<name>~<n>` walks first parents; a bare `~` means one step.
        let (name, steps) = match expr.split_once('~') {
            Some((name, "")) => (name, 1),
            Some((name, n)) => (
                name,
                n.parse::<usize>()
                    .map_err(|_| Self::not_found(Operation::Resolve, expr))?,
            ),
            None => (expr, 0),
        };

        let mut revision = self
            .resolve_name(name)
            .ok_or_else(|| Self::not_found(Operation::Resolve, expr))?;
        for _ in 0..steps {
            revision = self.objects[&revision]
                .parent
                .clone()
                .ok_or_else(|| Self::not_found(Operation::Resolve, expr))?;
        }
        Ok(revision)
    }

    fn hard_reset(&mut self, revision: &Revision) -> Result<(), SyncError> {
        if !self.objects.contains_key(revision) {
            return Err(Self::not_found(Operation::Reset, revision.as_str()));
        }

        match self.branch() {
            Some(name) => {
                let entry = self
                    .branches
                    .entry(name.to_string())
                    .or_insert_with(|| LocalBranch {
                        tip: revision.clone(),
                        upstream: None,
                    });
                entry.tip = revision.clone();
            }
            None => self.head = Head::Detached(Some(revision.clone())),
        }
        self.materialize(revision);
        Ok(())
    }
}
