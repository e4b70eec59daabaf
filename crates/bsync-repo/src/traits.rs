//! The [`RepositoryHandle`] and [`RepositoryOpener`] traits.
//!
//! Any version-control binding (libgit2, an in-memory model, a CLI wrapper)
//! implements these traits; the sync core is written against them alone and
//! never assumes a specific engine's command surface.

use std::collections::BTreeSet;
use std::path::Path;

use crate::error::RepoResult;
use crate::types::{CommitId, FetchSummary, Lookup, PushSummary, Remote};

/// Observation and mutation surface of one repository.
///
/// Implementations must be thread-safe (`Send + Sync`); mutating methods take
/// `&self` and serialize internally. Branch names are short names (`main`,
/// `feature/x`), never canonical `refs/heads/*` names.
pub trait RepositoryHandle: Send + Sync {
    /// The location this handle was opened from.
    fn location(&self) -> &str;

    /// `true` if the repository has no working tree.
    fn is_bare(&self) -> RepoResult<bool>;

    /// Names of all local branches.
    fn list_branches(&self) -> RepoResult<BTreeSet<String>>;

    /// The tip of a branch. Fails with `NotFound` if the branch is absent.
    fn branch_commit(&self, name: &str) -> RepoResult<CommitId>;

    /// Nearest common ancestor of two commits.
    ///
    /// Fails with `Unrelated` when the commits share no history and with
    /// `NotFound` when either commit is unknown to this repository.
    fn merge_base(&self, a: &CommitId, b: &CommitId) -> RepoResult<CommitId>;

    /// `true` if tracked files are modified or untracked files are present.
    fn is_dirty(&self) -> RepoResult<bool>;

    /// The branch HEAD names, or `None` when HEAD is detached.
    ///
    /// An unborn HEAD (fresh repository) still names its branch.
    fn active_branch(&self) -> RepoResult<Option<String>>;

    /// Save working-tree changes as a new stash entry and clean the tree.
    fn stash_save(&self, include_untracked: bool) -> RepoResult<()>;

    /// Restore the tracked part of the newest stash entry.
    fn stash_apply_tracked(&self) -> RepoResult<()>;

    /// Restore the untracked part of the newest stash entry.
    ///
    /// Fails with `NotFound` if the entry carries no untracked files.
    fn stash_apply_untracked(&self) -> RepoResult<()>;

    /// Remove the newest stash entry.
    fn stash_drop(&self) -> RepoResult<()>;

    /// Reset to the active branch tip. `hard` also rewrites the working tree;
    /// otherwise only the index is reset (changes are unstaged).
    fn reset_head(&self, hard: bool) -> RepoResult<()>;

    /// Fast-forward local branch `name` from the same branch on `remote`.
    ///
    /// The checked-out branch may be updated; its working tree is not.
    /// Tags of `remote` that point into the fetched history come along and
    /// are reported as `[new tag]` or `[tag update]`. With `dry_run` nothing
    /// is written and the summary describes what would change.
    fn fetch_branch(&self, remote: &str, name: &str, dry_run: bool) -> RepoResult<FetchSummary>;

    /// Fetch every branch of `remote` into its remote-tracking namespace,
    /// along with the tags that point into what was fetched.
    fn fetch_remote(&self, remote: &str, dry_run: bool) -> RepoResult<FetchSummary>;

    /// Push local branch `name` to the same branch on `remote`, creating it
    /// there if needed. Non-fast-forward updates are rejected.
    ///
    /// Annotated tags reachable from the pushed tip follow it when `remote`
    /// lacks them; one that `remote` holds with another value is reported
    /// as `[rejected]` and left alone. Pushing into a non-bare `remote`'s
    /// unborn HEAD branch populates its working tree, failing instead of
    /// overwriting files already there.
    fn push_branch(&self, remote: &str, name: &str, dry_run: bool) -> RepoResult<PushSummary>;

    /// Look up the URL of a configured remote.
    fn find_remote(&self, name: &str) -> RepoResult<Lookup<String>>;

    /// All configured remotes, sorted by name.
    fn remotes(&self) -> RepoResult<Vec<Remote>>;

    fn create_remote(&self, name: &str, url: &str) -> RepoResult<()>;

    fn set_remote_url(&self, name: &str, url: &str) -> RepoResult<()>;

    /// Accept pushes into the checked-out branch by updating the working tree.
    fn set_receive_update_instead(&self) -> RepoResult<()>;

    /// Create branch `name` at `from`, optionally tracking `remote/name`.
    ///
    /// Creating HEAD's unborn branch in a working tree checks it out. Files
    /// already on disk are never overwritten: a collision fails with
    /// [`RepoError::WouldOverwrite`](crate::RepoError::WouldOverwrite) and
    /// no branch is created.
    fn create_branch(&self, name: &str, from: &CommitId, track_remote: Option<&str>) -> RepoResult<()>;

    /// `true` if branch `name` exists.
    fn has_branch(&self, name: &str) -> RepoResult<bool> {
        Ok(self.list_branches()?.contains(name))
    }
}

/// Resolves locations to repository handles, creating repositories on demand.
pub trait RepositoryOpener: Send + Sync {
    type Handle: RepositoryHandle;

    /// Open the repository at `location`, or report it absent.
    fn open(&self, location: &str) -> RepoResult<Lookup<Self::Handle>>;

    /// Create an empty repository at `location` (and any missing parents).
    fn init(&self, location: &str, bare: bool) -> RepoResult<Self::Handle>;

    /// Location of `project` under `root`.
    fn join(&self, root: &str, project: &str) -> String {
        Path::new(root).join(project).to_string_lossy().into_owned()
    }
}
