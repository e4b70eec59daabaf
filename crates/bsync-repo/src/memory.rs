//! In-memory repositories for testing the sync core without a VCS.
//!
//! A [`MemoryNetwork`] holds any number of repositories keyed by location,
//! all sharing one content-addressed commit graph (so a commit created in
//! one replica is resolvable from the other, as after a fetch). Each
//! repository models branches, remotes, HEAD, an index, a working tree, and
//! a stash stack closely enough that the stash-guard and fast-forward rules
//! behave like git's:
//!
//! - fetching into the checked-out branch moves the ref but leaves the
//!   index and working tree on the old tree (the repo reads as dirty until a
//!   hard reset);
//! - pushing into a checked-out branch is refused unless
//!   `receive.denyCurrentBranch=updateInstead` is set and the tree is clean;
//! - every mutating call is recorded as a [`RepoCall`] for assertions.
//!
//! Lock poisoning is recovered from rather than propagated: a panicking test
//! thread must not turn unrelated assertions into lock errors.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::error::{RepoError, RepoResult};
use crate::names::{validate_branch_name, validate_remote_name};
use crate::traits::{RepositoryHandle, RepositoryOpener};
use crate::types::{CommitId, FetchSummary, Lookup, PushSummary, RefFlag, RefUpdate, Remote};

/// Branch HEAD names in a freshly initialized repository.
pub const DEFAULT_BRANCH: &str = "master";

/// File path to contents.
pub type Files = BTreeMap<String, String>;

/// A mutating call made against a memory repository.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepoCall {
    pub location: String,
    pub op: CallOp,
}

/// The kind of mutating call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallOp {
    Init { bare: bool },
    StashSave { include_untracked: bool },
    StashApplyTracked,
    StashApplyUntracked,
    StashDrop,
    Reset { hard: bool },
    FetchBranch { remote: String, branch: String, dry_run: bool },
    FetchRemote { remote: String, dry_run: bool },
    PushBranch { remote: String, branch: String, dry_run: bool },
    CreateRemote { name: String, url: String },
    SetRemoteUrl { name: String, url: String },
    SetReceiveUpdateInstead,
    CreateBranch { name: String, track_remote: Option<String> },
}

impl CallOp {
    /// `true` if the call writes to a repository. Dry-run transfers are
    /// read-only by contract.
    pub fn is_write(&self) -> bool {
        match self {
            CallOp::FetchBranch { dry_run, .. }
            | CallOp::FetchRemote { dry_run, .. }
            | CallOp::PushBranch { dry_run, .. } => !dry_run,
            _ => true,
        }
    }

    /// `true` for fetch-branch calls (the "pull" half of a sync).
    pub fn is_pull(&self) -> bool {
        matches!(self, CallOp::FetchBranch { .. })
    }

    pub fn is_push(&self) -> bool {
        matches!(self, CallOp::PushBranch { .. })
    }
}

#[derive(Clone, Debug)]
struct CommitNode {
    parents: Vec<CommitId>,
    generation: u64,
    tree: Files,
}

#[derive(Clone, Debug, Default)]
struct StashEntry {
    /// Tracked path to restored contents; `None` records a deletion.
    tracked: BTreeMap<String, Option<String>>,
    untracked: Option<Files>,
}

/// A tag: the commit it names and whether it is annotated, which decides
/// whether a push carries it along.
#[derive(Clone, Debug, PartialEq, Eq)]
struct MemoryTag {
    commit: CommitId,
    annotated: bool,
}

#[derive(Clone, Debug)]
struct RepoState {
    bare: bool,
    head: Option<String>,
    branches: BTreeMap<String, CommitId>,
    tags: BTreeMap<String, MemoryTag>,
    upstreams: BTreeMap<String, String>,
    remote_refs: BTreeMap<String, CommitId>,
    remotes: BTreeMap<String, String>,
    index: Files,
    workdir: Files,
    stashes: Vec<StashEntry>,
    update_instead: bool,
}

impl RepoState {
    fn new(bare: bool) -> Self {
        Self {
            bare,
            head: Some(DEFAULT_BRANCH.to_string()),
            branches: BTreeMap::new(),
            tags: BTreeMap::new(),
            upstreams: BTreeMap::new(),
            remote_refs: BTreeMap::new(),
            remotes: BTreeMap::new(),
            index: Files::new(),
            workdir: Files::new(),
            stashes: Vec::new(),
            update_instead: false,
        }
    }

    fn head_tip(&self) -> Option<&CommitId> {
        self.head.as_ref().and_then(|h| self.branches.get(h))
    }
}

#[derive(Debug, Default)]
struct NetworkState {
    commits: HashMap<CommitId, CommitNode>,
    repos: BTreeMap<String, RepoState>,
    calls: Vec<RepoCall>,
    transport_failures: HashSet<(String, String)>,
    sequence: u64,
}

impl NetworkState {
    fn repo(&self, location: &str) -> RepoResult<&RepoState> {
        self.repos.get(location).ok_or_else(|| RepoError::NotARepository {
            location: location.to_string(),
        })
    }

    fn repo_mut(&mut self, location: &str) -> RepoResult<&mut RepoState> {
        self.repos
            .get_mut(location)
            .ok_or_else(|| RepoError::NotARepository {
                location: location.to_string(),
            })
    }

    fn record(&mut self, location: &str, op: CallOp) {
        debug!(location, ?op, "memory repo call");
        self.calls.push(RepoCall {
            location: location.to_string(),
            op,
        });
    }

    fn tree_of(&self, id: Option<&CommitId>) -> Files {
        id.and_then(|id| self.commits.get(id))
            .map(|node| node.tree.clone())
            .unwrap_or_default()
    }

    fn head_tree(&self, location: &str) -> RepoResult<Files> {
        let repo = self.repo(location)?;
        Ok(self.tree_of(repo.head_tip()))
    }

    /// All ancestors of `id`, including `id` itself.
    fn ancestors(&self, id: &CommitId) -> HashSet<CommitId> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        visited.insert(id.clone());
        queue.push_back(id.clone());

        while let Some(current) = queue.pop_front() {
            if let Some(node) = self.commits.get(&current) {
                for parent in &node.parents {
                    if visited.insert(parent.clone()) {
                        queue.push_back(parent.clone());
                    }
                }
            }
        }

        visited
    }

    fn is_ancestor(&self, ancestor: &CommitId, of: &CommitId) -> bool {
        self.ancestors(of).contains(ancestor)
    }

    fn merge_base(&self, a: &CommitId, b: &CommitId) -> RepoResult<CommitId> {
        for id in [a, b] {
            if !self.commits.contains_key(id) {
                return Err(RepoError::not_found(format!("commit {id}")));
            }
        }
        let ancestors_a = self.ancestors(a);
        let ancestors_b = self.ancestors(b);

        // The nearest common ancestor has the highest generation; ties go to
        // the smallest address so the answer is deterministic.
        ancestors_a
            .intersection(&ancestors_b)
            .filter_map(|id| self.commits.get(id).map(|node| (node.generation, id)))
            .max_by(|(gen_a, id_a), (gen_b, id_b)| gen_a.cmp(gen_b).then(id_b.cmp(id_a)))
            .map(|(_, id)| id.clone())
            .ok_or_else(|| RepoError::Unrelated {
                a: a.to_string(),
                b: b.to_string(),
            })
    }

    fn create_commit(&mut self, parents: Vec<CommitId>, tree: Files, message: &str) -> CommitId {
        self.sequence += 1;
        let mut hasher = blake3::Hasher::new();
        for parent in &parents {
            hasher.update(b"parent ");
            hasher.update(parent.as_str().as_bytes());
        }
        for (path, contents) in &tree {
            hasher.update(path.as_bytes());
            hasher.update(&[0]);
            hasher.update(contents.as_bytes());
            hasher.update(&[0]);
        }
        hasher.update(message.as_bytes());
        hasher.update(&self.sequence.to_le_bytes());
        let id = CommitId::from_bytes(&hasher.finalize().as_bytes()[..20]);

        let generation = parents
            .iter()
            .filter_map(|p| self.commits.get(p))
            .map(|node| node.generation)
            .max()
            .map_or(1, |g| g + 1);
        self.commits.insert(
            id.clone(),
            CommitNode {
                parents,
                generation,
                tree,
            },
        );
        id
    }

    /// Point the working tree and index of `location` at its HEAD tree,
    /// keeping untracked files.
    fn hard_reset(&mut self, location: &str) -> RepoResult<()> {
        let tip_tree = self.head_tree(location)?;
        let repo = self.repo_mut(location)?;
        let tracked: BTreeSet<String> = repo.index.keys().chain(tip_tree.keys()).cloned().collect();
        for path in tracked {
            match tip_tree.get(&path) {
                Some(contents) => {
                    repo.workdir.insert(path, contents.clone());
                }
                None => {
                    repo.workdir.remove(&path);
                }
            }
        }
        repo.index = tip_tree;
        Ok(())
    }

    fn is_dirty(&self, location: &str) -> RepoResult<bool> {
        let repo = self.repo(location)?;
        if repo.bare {
            return Ok(false);
        }
        let tip_tree = self.tree_of(repo.head_tip());
        Ok(repo.workdir != repo.index || repo.index != tip_tree)
    }

    /// Dirtiness as `receive.denyCurrentBranch=updateInstead` sees it:
    /// tracked modifications only.
    fn has_tracked_changes(&self, location: &str) -> RepoResult<bool> {
        let repo = self.repo(location)?;
        let tip_tree = self.tree_of(repo.head_tip());
        if repo.index != tip_tree {
            return Ok(true);
        }
        Ok(tip_tree
            .iter()
            .any(|(path, contents)| repo.workdir.get(path) != Some(contents)))
    }

    fn resolve_remote(&self, location: &str, remote: &str) -> RepoResult<String> {
        let repo = self.repo(location)?;
        let url = repo
            .remotes
            .get(remote)
            .ok_or_else(|| RepoError::not_found(format!("remote {remote}")))?;
        if !self.repos.contains_key(url) {
            return Err(RepoError::Transport(format!(
                "'{url}' does not appear to be a repository"
            )));
        }
        Ok(url.clone())
    }

    fn check_transport(&self, location: &str, branch: &str) -> RepoResult<()> {
        if self
            .transport_failures
            .contains(&(location.to_string(), branch.to_string()))
        {
            return Err(RepoError::Transport(format!(
                "simulated transport failure for {branch}"
            )));
        }
        Ok(())
    }

    /// Paths of `id`'s tree already present in `location`'s working tree.
    fn collisions(&self, location: &str, id: &CommitId) -> RepoResult<Vec<String>> {
        let repo = self.repo(location)?;
        Ok(self
            .tree_of(Some(id))
            .into_keys()
            .filter(|path| repo.workdir.contains_key(path))
            .collect())
    }

    /// Tags of `from` on `tip`'s history whose value `to` does not share,
    /// with the value `to` holds.
    fn tags_on(
        &self,
        from: &str,
        to: &str,
        tip: &CommitId,
    ) -> RepoResult<Vec<(String, MemoryTag, Option<MemoryTag>)>> {
        let history = self.ancestors(tip);
        let theirs = &self.repo(to)?.tags;
        Ok(self
            .repo(from)?
            .tags
            .iter()
            .filter(|(name, tag)| history.contains(&tag.commit) && theirs.get(*name) != Some(*tag))
            .map(|(name, tag)| (name.clone(), tag.clone(), theirs.get(name).cloned()))
            .collect())
    }

    /// Classify moving `name` from `old` to `new`, rejecting non-fast-forwards.
    fn fast_forward_update(
        &self,
        refname: String,
        old: Option<CommitId>,
        new: CommitId,
    ) -> RepoResult<RefUpdate> {
        if let Some(old) = &old {
            if *old != new && !self.is_ancestor(old, &new) {
                return Err(RepoError::Transport(format!(
                    "{refname}: rejected (non-fast-forward)"
                )));
            }
        }
        Ok(RefUpdate::classify(refname, old, new))
    }
}

/// A set of in-memory repositories sharing one commit graph.
///
/// Cloning is cheap and yields another handle onto the same network.
#[derive(Clone, Debug, Default)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, NetworkState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register an empty repository at `location` without recording a call.
    pub fn add_repo(&self, location: &str, bare: bool) -> MemoryRepository {
        self.state()
            .repos
            .insert(location.to_string(), RepoState::new(bare));
        self.handle(location)
    }

    fn handle(&self, location: &str) -> MemoryRepository {
        MemoryRepository {
            location: location.to_string(),
            network: self.clone(),
        }
    }

    /// Commit `files` on top of `branch` in `location`, creating the branch if
    /// needed, and return the new tip. When `branch` is checked out the index
    /// and working tree follow the new commit.
    pub fn commit(
        &self,
        location: &str,
        branch: &str,
        files: &[(&str, &str)],
        message: &str,
    ) -> RepoResult<CommitId> {
        let mut state = self.state();
        let parent = state.repo(location)?.branches.get(branch).cloned();
        let mut tree = state.tree_of(parent.as_ref());
        for (path, contents) in files {
            tree.insert((*path).to_string(), (*contents).to_string());
        }
        let id = state.create_commit(parent.into_iter().collect(), tree, message);
        let repo = state.repo_mut(location)?;
        repo.branches.insert(branch.to_string(), id.clone());
        let checked_out = repo.head.as_deref() == Some(branch) && !repo.bare;
        if checked_out {
            state.hard_reset(location)?;
        }
        Ok(id)
    }

    /// Point `branch` in `location` at an existing commit.
    pub fn set_branch(&self, location: &str, branch: &str, id: &CommitId) -> RepoResult<()> {
        let mut state = self.state();
        if !state.commits.contains_key(id) {
            return Err(RepoError::not_found(format!("commit {id}")));
        }
        state
            .repo_mut(location)?
            .branches
            .insert(branch.to_string(), id.clone());
        Ok(())
    }

    /// Check out `branch`: HEAD, index and tracked files follow its tip.
    pub fn checkout(&self, location: &str, branch: &str) -> RepoResult<()> {
        let mut state = self.state();
        state.repo_mut(location)?.head = Some(branch.to_string());
        if !state.repo(location)?.bare {
            state.hard_reset(location)?;
        }
        Ok(())
    }

    /// Tag `id` in `location`, replacing any tag of that name.
    pub fn tag(&self, location: &str, name: &str, id: &CommitId, annotated: bool) -> RepoResult<()> {
        let mut state = self.state();
        if !state.commits.contains_key(id) {
            return Err(RepoError::not_found(format!("commit {id}")));
        }
        state.repo_mut(location)?.tags.insert(
            name.to_string(),
            MemoryTag {
                commit: id.clone(),
                annotated,
            },
        );
        Ok(())
    }

    /// The commit tag `name` of `location` points at, if the tag exists.
    pub fn tag_commit(&self, location: &str, name: &str) -> RepoResult<Option<CommitId>> {
        Ok(self
            .state()
            .repo(location)?
            .tags
            .get(name)
            .map(|tag| tag.commit.clone()))
    }

    /// Detach HEAD so that no branch is active.
    pub fn detach_head(&self, location: &str) -> RepoResult<()> {
        self.state().repo_mut(location)?.head = None;
        Ok(())
    }

    /// Write a working-tree file without staging it.
    pub fn write_file(&self, location: &str, path: &str, contents: &str) -> RepoResult<()> {
        self.state()
            .repo_mut(location)?
            .workdir
            .insert(path.to_string(), contents.to_string());
        Ok(())
    }

    /// Delete a working-tree file without staging the deletion.
    pub fn remove_file(&self, location: &str, path: &str) -> RepoResult<()> {
        self.state().repo_mut(location)?.workdir.remove(path);
        Ok(())
    }

    pub fn read_file(&self, location: &str, path: &str) -> RepoResult<Option<String>> {
        Ok(self.state().repo(location)?.workdir.get(path).cloned())
    }

    /// Snapshot of the whole working tree.
    pub fn workdir(&self, location: &str) -> RepoResult<Files> {
        Ok(self.state().repo(location)?.workdir.clone())
    }

    /// Number of stash entries in `location`.
    pub fn stash_depth(&self, location: &str) -> RepoResult<usize> {
        Ok(self.state().repo(location)?.stashes.len())
    }

    /// `true` if the index differs from the HEAD tree.
    pub fn has_staged_changes(&self, location: &str) -> RepoResult<bool> {
        let state = self.state();
        let repo = state.repo(location)?;
        Ok(repo.index != state.tree_of(repo.head_tip()))
    }

    /// The upstream remote configured for `branch`, if any.
    pub fn upstream(&self, location: &str, branch: &str) -> RepoResult<Option<String>> {
        Ok(self.state().repo(location)?.upstreams.get(branch).cloned())
    }

    /// `true` if `receive.denyCurrentBranch=updateInstead` is set.
    pub fn accepts_update_instead(&self, location: &str) -> RepoResult<bool> {
        Ok(self.state().repo(location)?.update_instead)
    }

    /// Make every fetch or push of `branch` initiated from `location` fail.
    pub fn fail_transport(&self, location: &str, branch: &str) {
        self.state()
            .transport_failures
            .insert((location.to_string(), branch.to_string()));
    }

    /// All recorded calls, oldest first.
    pub fn calls(&self) -> Vec<RepoCall> {
        self.state().calls.clone()
    }

    /// Recorded calls that write to a repository.
    pub fn write_calls(&self) -> Vec<RepoCall> {
        self.state()
            .calls
            .iter()
            .filter(|call| call.op.is_write())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// `true` if `ancestor` is reachable from `of` (or equal to it).
    pub fn is_ancestor(&self, ancestor: &CommitId, of: &CommitId) -> bool {
        self.state().is_ancestor(ancestor, of)
    }
}

impl RepositoryOpener for MemoryNetwork {
    type Handle = MemoryRepository;

    fn open(&self, location: &str) -> RepoResult<Lookup<MemoryRepository>> {
        let exists = self.state().repos.contains_key(location);
        Ok(if exists {
            Lookup::Found(self.handle(location))
        } else {
            Lookup::Absent
        })
    }

    fn init(&self, location: &str, bare: bool) -> RepoResult<MemoryRepository> {
        let mut state = self.state();
        state
            .repos
            .entry(location.to_string())
            .or_insert_with(|| RepoState::new(bare));
        state.record(location, CallOp::Init { bare });
        drop(state);
        Ok(self.handle(location))
    }

    fn join(&self, root: &str, project: &str) -> String {
        format!("{}/{}", root.trim_end_matches('/'), project)
    }
}

/// Handle onto one repository of a [`MemoryNetwork`].
#[derive(Clone, Debug)]
pub struct MemoryRepository {
    location: String,
    network: MemoryNetwork,
}

impl MemoryRepository {
    /// The network this repository belongs to.
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }

    fn require_worktree(&self, state: &NetworkState, op: &str) -> RepoResult<()> {
        if state.repo(&self.location)?.bare {
            return Err(RepoError::Unsupported(format!(
                "{op} requires a working tree"
            )));
        }
        Ok(())
    }
}

impl RepositoryHandle for MemoryRepository {
    fn location(&self) -> &str {
        &self.location
    }

    fn is_bare(&self) -> RepoResult<bool> {
        Ok(self.network.state().repo(&self.location)?.bare)
    }

    fn list_branches(&self) -> RepoResult<BTreeSet<String>> {
        let state = self.network.state();
        Ok(state.repo(&self.location)?.branches.keys().cloned().collect())
    }

    fn branch_commit(&self, name: &str) -> RepoResult<CommitId> {
        let state = self.network.state();
        state
            .repo(&self.location)?
            .branches
            .get(name)
            .cloned()
            .ok_or_else(|| RepoError::not_found(format!("branch {name}")))
    }

    fn merge_base(&self, a: &CommitId, b: &CommitId) -> RepoResult<CommitId> {
        self.network.state().merge_base(a, b)
    }

    fn is_dirty(&self) -> RepoResult<bool> {
        self.network.state().is_dirty(&self.location)
    }

    fn active_branch(&self) -> RepoResult<Option<String>> {
        Ok(self.network.state().repo(&self.location)?.head.clone())
    }

    fn stash_save(&self, include_untracked: bool) -> RepoResult<()> {
        let mut state = self.network.state();
        self.require_worktree(&state, "stash")?;
        let tip_tree = state.head_tree(&self.location)?;
        let repo = state.repo_mut(&self.location)?;

        let mut entry = StashEntry::default();
        let tracked_paths: BTreeSet<String> =
            repo.index.keys().chain(tip_tree.keys()).cloned().collect();
        for path in &tracked_paths {
            let current = repo.workdir.get(path);
            if current != tip_tree.get(path) {
                entry.tracked.insert(path.clone(), current.cloned());
            }
        }
        let untracked: Files = repo
            .workdir
            .iter()
            .filter(|(path, _)| !tracked_paths.contains(*path))
            .map(|(p, c)| (p.clone(), c.clone()))
            .collect();

        if entry.tracked.is_empty() && (untracked.is_empty() || !include_untracked) {
            return Err(RepoError::Backend("no local changes to save".into()));
        }
        if include_untracked && !untracked.is_empty() {
            for path in untracked.keys() {
                repo.workdir.remove(path);
            }
            entry.untracked = Some(untracked);
        }
        repo.stashes.push(entry);

        state.hard_reset(&self.location)?;
        state.record(&self.location, CallOp::StashSave { include_untracked });
        Ok(())
    }

    fn stash_apply_tracked(&self) -> RepoResult<()> {
        let mut state = self.network.state();
        self.require_worktree(&state, "stash apply")?;
        let repo = state.repo_mut(&self.location)?;
        let entry = repo
            .stashes
            .last()
            .cloned()
            .ok_or_else(|| RepoError::not_found("stash@{0}"))?;
        for (path, contents) in entry.tracked {
            match contents {
                Some(contents) => {
                    repo.workdir.insert(path.clone(), contents.clone());
                    repo.index.insert(path, contents);
                }
                None => {
                    repo.workdir.remove(&path);
                    repo.index.remove(&path);
                }
            }
        }
        state.record(&self.location, CallOp::StashApplyTracked);
        Ok(())
    }

    fn stash_apply_untracked(&self) -> RepoResult<()> {
        let mut state = self.network.state();
        self.require_worktree(&state, "stash apply")?;
        state.record(&self.location, CallOp::StashApplyUntracked);
        let repo = state.repo_mut(&self.location)?;
        let untracked = repo
            .stashes
            .last()
            .ok_or_else(|| RepoError::not_found("stash@{0}"))?
            .untracked
            .clone()
            .ok_or_else(|| RepoError::not_found("stash@{0}^3"))?;
        for (path, contents) in untracked {
            repo.workdir.insert(path.clone(), contents.clone());
            repo.index.insert(path, contents);
        }
        Ok(())
    }

    fn stash_drop(&self) -> RepoResult<()> {
        let mut state = self.network.state();
        state
            .repo_mut(&self.location)?
            .stashes
            .pop()
            .ok_or_else(|| RepoError::not_found("stash@{0}"))?;
        state.record(&self.location, CallOp::StashDrop);
        Ok(())
    }

    fn reset_head(&self, hard: bool) -> RepoResult<()> {
        let mut state = self.network.state();
        self.require_worktree(&state, "reset")?;
        if hard {
            state.hard_reset(&self.location)?;
        } else {
            let tip_tree = state.head_tree(&self.location)?;
            state.repo_mut(&self.location)?.index = tip_tree;
        }
        state.record(&self.location, CallOp::Reset { hard });
        Ok(())
    }

    fn fetch_branch(&self, remote: &str, name: &str, dry_run: bool) -> RepoResult<FetchSummary> {
        let mut state = self.network.state();
        state.record(
            &self.location,
            CallOp::FetchBranch {
                remote: remote.to_string(),
                branch: name.to_string(),
                dry_run,
            },
        );
        let url = state.resolve_remote(&self.location, remote)?;
        state.check_transport(&self.location, name)?;

        let new = state
            .repo(&url)?
            .branches
            .get(name)
            .cloned()
            .ok_or_else(|| RepoError::Transport(format!("couldn't find remote ref {name}")))?;
        let old = state.repo(&self.location)?.branches.get(name).cloned();
        let update = state.fast_forward_update(format!("refs/heads/{name}"), old, new.clone())?;
        let tags = state.tags_on(&url, &self.location, &new)?;

        let mut summary = FetchSummary::new(remote, dry_run);
        summary.updates.push(update);
        for (tag, value, old) in tags {
            summary.updates.push(RefUpdate::tag(
                format!("refs/tags/{tag}"),
                old.map(|old| old.commit),
                value.commit.clone(),
            ));
            if !dry_run {
                state.repo_mut(&self.location)?.tags.insert(tag, value);
            }
        }

        if !dry_run {
            let repo = state.repo_mut(&self.location)?;
            repo.branches.insert(name.to_string(), new.clone());
            repo.remote_refs.insert(format!("{remote}/{name}"), new);
        }
        Ok(summary)
    }

    fn fetch_remote(&self, remote: &str, dry_run: bool) -> RepoResult<FetchSummary> {
        let mut state = self.network.state();
        state.record(
            &self.location,
            CallOp::FetchRemote {
                remote: remote.to_string(),
                dry_run,
            },
        );
        let url = state.resolve_remote(&self.location, remote)?;
        let remote_branches = state.repo(&url)?.branches.clone();

        let mut summary = FetchSummary::new(remote, dry_run);
        for (branch, new) in remote_branches {
            let tracking = format!("{remote}/{branch}");
            let old = state.repo(&self.location)?.remote_refs.get(&tracking).cloned();
            let mut update =
                RefUpdate::classify(format!("refs/remotes/{tracking}"), old.clone(), new.clone());
            if let Some(old) = &old {
                if *old != new && !state.is_ancestor(old, &new) {
                    update.flags = vec![RefFlag::ForcedUpdate];
                }
            }
            if !dry_run {
                state
                    .repo_mut(&self.location)?
                    .remote_refs
                    .insert(tracking, new);
            }
            summary.updates.push(update);
        }

        let theirs = state.repo(&url)?.tags.clone();
        for (tag, value) in theirs {
            let old = state.repo(&self.location)?.tags.get(&tag).cloned();
            if old.as_ref() == Some(&value) {
                continue;
            }
            summary.updates.push(RefUpdate::tag(
                format!("refs/tags/{tag}"),
                old.map(|old| old.commit),
                value.commit.clone(),
            ));
            if !dry_run {
                state.repo_mut(&self.location)?.tags.insert(tag, value);
            }
        }
        Ok(summary)
    }

    fn push_branch(&self, remote: &str, name: &str, dry_run: bool) -> RepoResult<PushSummary> {
        let mut state = self.network.state();
        state.record(
            &self.location,
            CallOp::PushBranch {
                remote: remote.to_string(),
                branch: name.to_string(),
                dry_run,
            },
        );
        let url = state.resolve_remote(&self.location, remote)?;
        state.check_transport(&self.location, name)?;

        let new = state
            .repo(&self.location)?
            .branches
            .get(name)
            .cloned()
            .ok_or_else(|| RepoError::not_found(format!("branch {name}")))?;
        let target = state.repo(&url)?;
        let old = target.branches.get(name).cloned();
        let updates_worktree = !target.bare && target.head.as_deref() == Some(name);
        let update = state.fast_forward_update(format!("refs/heads/{name}"), old.clone(), new.clone())?;

        // An unborn HEAD branch is not checked out yet; it is populated as
        // long as nothing on disk would be overwritten.
        if updates_worktree && old.is_none() {
            let paths = state.collisions(&url, &new)?;
            if !paths.is_empty() {
                return Err(RepoError::WouldOverwrite { paths });
            }
        }
        if updates_worktree && old.is_some() && old.as_ref() != Some(&new) {
            // A dry run cannot see the policy the real run sets up first.
            if !target.update_instead && !dry_run {
                return Err(RepoError::Transport(format!(
                    "refusing to update checked out branch: refs/heads/{name}"
                )));
            }
            if state.has_tracked_changes(&url)? {
                return Err(RepoError::Transport(format!(
                    "refs/heads/{name}: working directory of the remote is dirty"
                )));
            }
        }

        let mut summary = PushSummary::new(remote, dry_run);
        summary.updates.push(update);
        for (tag, value, theirs) in state.tags_on(&self.location, &url, &new)? {
            if !value.annotated {
                continue;
            }
            let refname = format!("refs/tags/{tag}");
            match theirs {
                Some(theirs) => summary.updates.push(RefUpdate::rejected(
                    refname,
                    Some(theirs.commit),
                    Some(value.commit),
                )),
                None => {
                    summary
                        .updates
                        .push(RefUpdate::tag(refname, None, value.commit.clone()));
                    if !dry_run {
                        state.repo_mut(&url)?.tags.insert(tag, value);
                    }
                }
            }
        }

        if !dry_run {
            state
                .repo_mut(&url)?
                .branches
                .insert(name.to_string(), new.clone());
            if updates_worktree {
                state.hard_reset(&url)?;
            }
            state
                .repo_mut(&self.location)?
                .remote_refs
                .insert(format!("{remote}/{name}"), new);
        }
        Ok(summary)
    }

    fn find_remote(&self, name: &str) -> RepoResult<Lookup<String>> {
        let state = self.network.state();
        Ok(state.repo(&self.location)?.remotes.get(name).cloned().into())
    }

    fn remotes(&self) -> RepoResult<Vec<Remote>> {
        let state = self.network.state();
        Ok(state
            .repo(&self.location)?
            .remotes
            .iter()
            .map(|(name, url)| Remote::new(name, url))
            .collect())
    }

    fn create_remote(&self, name: &str, url: &str) -> RepoResult<()> {
        validate_remote_name(name)?;
        let mut state = self.network.state();
        let repo = state.repo_mut(&self.location)?;
        if repo.remotes.contains_key(name) {
            return Err(RepoError::RemoteExists {
                name: name.to_string(),
            });
        }
        repo.remotes.insert(name.to_string(), url.to_string());
        state.record(
            &self.location,
            CallOp::CreateRemote {
                name: name.to_string(),
                url: url.to_string(),
            },
        );
        Ok(())
    }

    fn set_remote_url(&self, name: &str, url: &str) -> RepoResult<()> {
        let mut state = self.network.state();
        let existing = state
            .repo_mut(&self.location)?
            .remotes
            .get_mut(name)
            .ok_or_else(|| RepoError::not_found(format!("remote {name}")))?;
        *existing = url.to_string();
        state.record(
            &self.location,
            CallOp::SetRemoteUrl {
                name: name.to_string(),
                url: url.to_string(),
            },
        );
        Ok(())
    }

    fn set_receive_update_instead(&self) -> RepoResult<()> {
        let mut state = self.network.state();
        state.repo_mut(&self.location)?.update_instead = true;
        state.record(&self.location, CallOp::SetReceiveUpdateInstead);
        Ok(())
    }

    fn create_branch(&self, name: &str, from: &CommitId, track_remote: Option<&str>) -> RepoResult<()> {
        validate_branch_name(name)?;
        let mut state = self.network.state();
        if !state.commits.contains_key(from) {
            return Err(RepoError::not_found(format!("commit {from}")));
        }
        let checked_out = {
            let repo = state.repo(&self.location)?;
            if repo.branches.contains_key(name) {
                return Err(RepoError::BranchExists {
                    name: name.to_string(),
                });
            }
            !repo.bare && repo.head.as_deref() == Some(name)
        };
        // Creating the unborn HEAD branch checks it out, as a first fetch
        // would, but never over files already in the working tree.
        if checked_out {
            let paths = state.collisions(&self.location, from)?;
            if !paths.is_empty() {
                return Err(RepoError::WouldOverwrite { paths });
            }
        }
        {
            let repo = state.repo_mut(&self.location)?;
            repo.branches.insert(name.to_string(), from.clone());
            if let Some(remote) = track_remote {
                repo.upstreams.insert(name.to_string(), remote.to_string());
                repo.remote_refs
                    .insert(format!("{remote}/{name}"), from.clone());
            }
        }
        if checked_out {
            state.hard_reset(&self.location)?;
        }
        state.record(
            &self.location,
            CallOp::CreateBranch {
                name: name.to_string(),
                track_remote: track_remote.map(str::to_string),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL: &str = "/local/proj";
    const REMOTE: &str = "/remote/proj";

    /// Local and remote replicas with `work` pointing local at remote.
    fn pair() -> (MemoryNetwork, MemoryRepository, MemoryRepository) {
        let net = MemoryNetwork::new();
        let local = net.add_repo(LOCAL, false);
        let remote = net.add_repo(REMOTE, false);
        local.create_remote("work", REMOTE).unwrap();
        net.clear_calls();
        (net, local, remote)
    }

    #[test]
    fn commit_advances_branch_and_worktree() {
        let (net, local, _) = pair();
        let c1 = net.commit(LOCAL, "master", &[("a.txt", "1")], "c1").unwrap();
        assert_eq!(local.branch_commit("master").unwrap(), c1);
        assert_eq!(net.read_file(LOCAL, "a.txt").unwrap().as_deref(), Some("1"));
        assert!(!local.is_dirty().unwrap());
    }

    #[test]
    fn missing_branch_is_not_found() {
        let (_, local, _) = pair();
        let err = local.branch_commit("nope").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn merge_base_linear_and_forked() {
        let (net, local, _) = pair();
        let c1 = net.commit(LOCAL, "master", &[("a", "1")], "c1").unwrap();
        let c2 = net.commit(LOCAL, "master", &[("a", "2")], "c2").unwrap();
        assert_eq!(local.merge_base(&c1, &c2).unwrap(), c1);
        assert_eq!(local.merge_base(&c2, &c2).unwrap(), c2);

        net.set_branch(LOCAL, "side", &c1).unwrap();
        let c3 = net.commit(LOCAL, "side", &[("b", "1")], "c3").unwrap();
        assert_eq!(local.merge_base(&c2, &c3).unwrap(), c1);
    }

    #[test]
    fn merge_base_of_unrelated_histories() {
        let (net, local, _) = pair();
        let a = net.commit(LOCAL, "master", &[("a", "1")], "a").unwrap();
        let b = net.commit(REMOTE, "master", &[("b", "1")], "b").unwrap();
        let err = local.merge_base(&a, &b).unwrap_err();
        assert!(matches!(err, RepoError::Unrelated { .. }));
    }

    #[test]
    fn dirty_detection_covers_untracked_files() {
        let (net, local, _) = pair();
        net.commit(LOCAL, "master", &[("a", "1")], "c1").unwrap();
        assert!(!local.is_dirty().unwrap());
        net.write_file(LOCAL, "new.txt", "x").unwrap();
        assert!(local.is_dirty().unwrap());
    }

    #[test]
    fn stash_round_trip_restores_tracked_and_untracked() {
        let (net, local, _) = pair();
        net.commit(LOCAL, "master", &[("a", "1"), ("gone", "g")], "c1").unwrap();
        net.write_file(LOCAL, "a", "edited").unwrap();
        net.remove_file(LOCAL, "gone").unwrap();
        net.write_file(LOCAL, "untracked", "u").unwrap();

        local.stash_save(true).unwrap();
        assert!(!local.is_dirty().unwrap());
        assert_eq!(net.read_file(LOCAL, "a").unwrap().as_deref(), Some("1"));
        assert_eq!(net.read_file(LOCAL, "untracked").unwrap(), None);

        local.stash_apply_tracked().unwrap();
        local.stash_apply_untracked().unwrap();
        local.stash_drop().unwrap();
        local.reset_head(false).unwrap();

        assert_eq!(net.read_file(LOCAL, "a").unwrap().as_deref(), Some("edited"));
        assert_eq!(net.read_file(LOCAL, "gone").unwrap(), None);
        assert_eq!(net.read_file(LOCAL, "untracked").unwrap().as_deref(), Some("u"));
        assert!(!net.has_staged_changes(LOCAL).unwrap());
        assert_eq!(net.stash_depth(LOCAL).unwrap(), 0);
    }

    #[test]
    fn untracked_apply_without_untracked_part_is_not_found() {
        let (net, local, _) = pair();
        net.commit(LOCAL, "master", &[("a", "1")], "c1").unwrap();
        net.write_file(LOCAL, "a", "2").unwrap();
        local.stash_save(true).unwrap();
        local.stash_apply_tracked().unwrap();
        let err = local.stash_apply_untracked().unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn stash_save_on_clean_tree_fails() {
        let (net, local, _) = pair();
        net.commit(LOCAL, "master", &[("a", "1")], "c1").unwrap();
        assert!(local.stash_save(true).is_err());
        assert_eq!(net.stash_depth(LOCAL).unwrap(), 0);
    }

    #[test]
    fn fetch_into_checked_out_branch_needs_hard_reset() {
        let (net, local, _) = pair();
        let c1 = net.commit(REMOTE, "master", &[("a", "1")], "c1").unwrap();
        net.set_branch(LOCAL, "master", &c1).unwrap();
        net.checkout(LOCAL, "master").unwrap();
        let c2 = net.commit(REMOTE, "master", &[("a", "2")], "c2").unwrap();

        let summary = local.fetch_branch("work", "master", false).unwrap();
        assert_eq!(summary.updates[0].flags, vec![RefFlag::FastForward]);
        assert_eq!(local.branch_commit("master").unwrap(), c2);
        assert_eq!(net.read_file(LOCAL, "a").unwrap().as_deref(), Some("1"));
        assert!(local.is_dirty().unwrap());

        local.reset_head(true).unwrap();
        assert_eq!(net.read_file(LOCAL, "a").unwrap().as_deref(), Some("2"));
        assert!(!local.is_dirty().unwrap());
    }

    #[test]
    fn dry_run_fetch_changes_nothing() {
        let (net, local, _) = pair();
        let c1 = net.commit(REMOTE, "master", &[("a", "1")], "c1").unwrap();
        let summary = local.fetch_branch("work", "master", true).unwrap();
        assert!(summary.dry_run);
        assert!(!local.has_branch("master").unwrap());
        assert_eq!(summary.updates[0].new.as_ref(), Some(&c1));
        assert!(net.write_calls().is_empty());
    }

    #[test]
    fn fetch_rejects_non_fast_forward() {
        let (net, local, _) = pair();
        net.commit(LOCAL, "master", &[("a", "local")], "l").unwrap();
        net.commit(REMOTE, "master", &[("a", "remote")], "r").unwrap();
        let err = local.fetch_branch("work", "master", false).unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn push_into_checked_out_branch_requires_update_instead() {
        let (net, local, remote) = pair();
        let c1 = net.commit(LOCAL, "master", &[("a", "1")], "c1").unwrap();
        net.set_branch(REMOTE, "master", &c1).unwrap();
        net.checkout(REMOTE, "master").unwrap();
        net.commit(LOCAL, "master", &[("a", "2")], "c2").unwrap();

        let err = local.push_branch("work", "master", false).unwrap_err();
        assert!(err.is_transport());

        remote.set_receive_update_instead().unwrap();
        local.push_branch("work", "master", false).unwrap();
        assert_eq!(net.read_file(REMOTE, "a").unwrap().as_deref(), Some("2"));
        assert!(!remote.is_dirty().unwrap());
    }

    #[test]
    fn push_creates_missing_branch() {
        let (net, local, remote) = pair();
        let c1 = net.commit(LOCAL, "feature", &[("f", "1")], "c1").unwrap();
        let summary = local.push_branch("work", "feature", false).unwrap();
        assert_eq!(summary.updates[0].flags, vec![RefFlag::NewHead]);
        assert_eq!(remote.branch_commit("feature").unwrap(), c1);
    }

    #[test]
    fn injected_transport_failure() {
        let (net, local, _) = pair();
        net.commit(REMOTE, "master", &[("a", "1")], "c1").unwrap();
        net.fail_transport(LOCAL, "master");
        let err = local.fetch_branch("work", "master", false).unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn remote_config_lookup_and_update() {
        let (_, local, _) = pair();
        assert_eq!(local.find_remote("work").unwrap(), Lookup::Found(REMOTE.to_string()));
        assert_eq!(local.find_remote("home").unwrap(), Lookup::Absent);
        local.set_remote_url("work", "/elsewhere").unwrap();
        assert_eq!(local.remotes().unwrap(), vec![Remote::new("work", "/elsewhere")]);
        assert!(matches!(
            local.create_remote("work", "/x").unwrap_err(),
            RepoError::RemoteExists { .. }
        ));
        assert!(local.set_remote_url("home", "/x").unwrap_err().is_not_found());
    }

    #[test]
    fn create_branch_tracks_remote() {
        let (net, local, _) = pair();
        let c1 = net.commit(REMOTE, "feature", &[("f", "1")], "c1").unwrap();
        local.create_branch("feature", &c1, Some("work")).unwrap();
        assert_eq!(local.branch_commit("feature").unwrap(), c1);
        assert_eq!(net.upstream(LOCAL, "feature").unwrap().as_deref(), Some("work"));
        assert!(matches!(
            local.create_branch("feature", &c1, None).unwrap_err(),
            RepoError::BranchExists { .. }
        ));
    }

    #[test]
    fn creating_unborn_head_branch_never_clobbers_files() {
        let (net, local, _) = pair();
        let c1 = net
            .commit(REMOTE, "master", &[("notes.txt", "theirs"), ("b", "1")], "c1")
            .unwrap();
        net.write_file(LOCAL, "notes.txt", "mine").unwrap();

        let err = local.create_branch("master", &c1, Some("work")).unwrap_err();
        assert!(matches!(err, RepoError::WouldOverwrite { ref paths } if *paths == ["notes.txt"]));
        assert!(!local.has_branch("master").unwrap());
        assert_eq!(net.read_file(LOCAL, "notes.txt").unwrap().as_deref(), Some("mine"));

        net.remove_file(LOCAL, "notes.txt").unwrap();
        net.write_file(LOCAL, "scratch", "s").unwrap();
        local.create_branch("master", &c1, Some("work")).unwrap();
        assert_eq!(net.read_file(LOCAL, "notes.txt").unwrap().as_deref(), Some("theirs"));
        assert_eq!(net.read_file(LOCAL, "scratch").unwrap().as_deref(), Some("s"));
    }

    #[test]
    fn push_into_unborn_head_populates_worktree() {
        let (net, local, remote) = pair();
        net.commit(LOCAL, "master", &[("a", "1")], "c1").unwrap();
        assert!(!net.accepts_update_instead(REMOTE).unwrap());

        local.push_branch("work", "master", true).unwrap();
        assert!(!remote.has_branch("master").unwrap());

        local.push_branch("work", "master", false).unwrap();
        assert_eq!(net.read_file(REMOTE, "a").unwrap().as_deref(), Some("1"));
        assert!(!remote.is_dirty().unwrap());
    }

    #[test]
    fn dry_run_push_does_not_check_receive_policy() {
        let (net, local, _) = pair();
        let c1 = net.commit(LOCAL, "master", &[("a", "1")], "c1").unwrap();
        net.set_branch(REMOTE, "master", &c1).unwrap();
        net.checkout(REMOTE, "master").unwrap();
        net.commit(LOCAL, "master", &[("a", "2")], "c2").unwrap();

        let summary = local.push_branch("work", "master", true).unwrap();
        assert_eq!(summary.updates[0].flags, vec![RefFlag::FastForward]);
        net.write_file(REMOTE, "a", "edited").unwrap();
        assert!(local.push_branch("work", "master", true).unwrap_err().is_transport());
    }

    #[test]
    fn tags_follow_transferred_history() {
        let (net, local, remote) = pair();
        let c1 = net.commit(REMOTE, "master", &[("a", "1")], "c1").unwrap();
        let side = net.commit(REMOTE, "side", &[("s", "1")], "s").unwrap();
        net.tag(REMOTE, "v1", &c1, true).unwrap();
        net.tag(REMOTE, "side-only", &side, true).unwrap();

        let summary = local.fetch_branch("work", "master", false).unwrap();
        let tags: Vec<(&str, &[RefFlag])> = summary
            .updates
            .iter()
            .filter(|u| u.is_tag())
            .map(|u| (u.name.as_str(), u.flags.as_slice()))
            .collect();
        assert_eq!(tags, vec![("refs/tags/v1", &[RefFlag::NewTag][..])]);
        assert_eq!(net.tag_commit(LOCAL, "v1").unwrap(), Some(c1.clone()));
        assert_eq!(net.tag_commit(LOCAL, "side-only").unwrap(), None);

        let c2 = net.commit(LOCAL, "master", &[("a", "2")], "c2").unwrap();
        net.tag(LOCAL, "rel", &c2, true).unwrap();
        net.tag(LOCAL, "wip", &c2, false).unwrap();
        net.tag(LOCAL, "v1", &c2, true).unwrap();
        remote.set_receive_update_instead().unwrap();

        let summary = local.push_branch("work", "master", false).unwrap();
        let flags_of = |name: &str| {
            summary
                .updates
                .iter()
                .find(|u| u.name == name)
                .map(|u| u.flags.clone())
        };
        assert_eq!(flags_of("refs/tags/rel"), Some(vec![RefFlag::NewTag]));
        assert_eq!(flags_of("refs/tags/v1"), Some(vec![RefFlag::Rejected]));
        assert_eq!(flags_of("refs/tags/wip"), None);
        assert_eq!(net.tag_commit(REMOTE, "rel").unwrap(), Some(c2));
        assert_eq!(net.tag_commit(REMOTE, "v1").unwrap(), Some(c1));
    }

    #[test]
    fn opener_open_and_init() {
        let net = MemoryNetwork::new();
        assert!(!net.open("/nowhere").unwrap().is_found());
        let repo = net.init("/new", true).unwrap();
        assert!(repo.is_bare().unwrap());
        assert!(net.open("/new").unwrap().is_found());
        assert_eq!(net.join("/root/", "proj"), "/root/proj");
    }

    #[test]
    fn write_calls_exclude_dry_runs() {
        let (net, local, _) = pair();
        net.commit(LOCAL, "master", &[("a", "1")], "c1").unwrap();
        local.push_branch("work", "master", true).unwrap();
        assert_eq!(net.calls().len(), 1);
        assert!(net.write_calls().is_empty());
    }
}
