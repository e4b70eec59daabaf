//! The stash guard: run a transfer on a repository's active branch without
//! losing uncommitted work.
//!
//! Sequence on the active branch of a dirty, non-bare repository:
//!
//! 1. save tracked and untracked changes as one stash entry;
//! 2. run the operation;
//! 3. hard-reset to the (possibly moved) tip, when configured;
//! 4. restore tracked content, then untracked content, drop the entry and
//!    unstage.
//!
//! Restoration runs whether or not the operation succeeded. An entry whose
//! tracked half cannot be restored is left on the stash and reported.

use bsync_repo::{RepoError, RepoResult, RepositoryHandle};
use tracing::{debug, warn};

use crate::context::SyncContext;
use crate::error::SyncError;

/// Warning attached whenever stashed changes were put back.
pub const CLASH_NOTICE: &str = "restored uncommitted changes; check all restored files for clashes";

/// Result of a guarded operation plus what the guard had to do around it.
#[derive(Debug)]
pub struct Guarded<T> {
    pub result: RepoResult<T>,
    /// `true` if changes were stashed (never in a dry run).
    pub stashed: bool,
    pub warnings: Vec<String>,
}

impl<T> Guarded<T> {
    fn unguarded(result: RepoResult<T>) -> Self {
        Self {
            result,
            stashed: false,
            warnings: Vec::new(),
        }
    }
}

/// Wraps mutating operations on a repository's active branch.
#[derive(Clone, Copy, Debug)]
pub struct StashGuard<'a> {
    ctx: &'a SyncContext,
}

impl<'a> StashGuard<'a> {
    pub fn new(ctx: &'a SyncContext) -> Self {
        Self { ctx }
    }

    /// Run `op` against `repo`, protecting uncommitted changes when `branch`
    /// is the branch `repo` has checked out.
    pub fn run<R, T>(&self, repo: &R, branch: &str, op: impl FnOnce(&R) -> RepoResult<T>) -> Guarded<T>
    where
        R: RepositoryHandle + ?Sized,
    {
        let dirty = match self.needs_guard(repo, branch) {
            Ok(Some(dirty)) => dirty,
            Ok(None) => return Guarded::unguarded(op(repo)),
            Err(e) => return Guarded::unguarded(Err(e)),
        };

        if self.ctx.dry_run {
            let mut guarded = Guarded::unguarded(op(repo));
            if dirty {
                guarded
                    .warnings
                    .push("uncommitted changes would be stashed and restored".to_string());
            }
            return guarded;
        }

        if dirty {
            if let Err(e) = repo.stash_save(true) {
                warn!(location = repo.location(), branch, error = %e, "stash failed, skipping operation");
                return Guarded::unguarded(Err(e));
            }
            debug!(location = repo.location(), branch, "stashed uncommitted changes");
        }

        let result = op(repo);
        let mut warnings = Vec::new();

        if self.ctx.reset_on_resync {
            if let Err(e) = repo.reset_head(true) {
                warn!(location = repo.location(), branch, error = %e, "hard reset failed");
                warnings.push(format!("hard reset failed: {e}"));
            }
        }

        if dirty {
            restore(repo, branch, &mut warnings);
        }

        Guarded {
            result,
            stashed: dirty,
            warnings,
        }
    }

    /// `Some(dirty)` when `branch` is checked out in a working tree,
    /// `None` when the operation can run unguarded.
    fn needs_guard<R>(&self, repo: &R, branch: &str) -> RepoResult<Option<bool>>
    where
        R: RepositoryHandle + ?Sized,
    {
        if repo.is_bare()? {
            return Ok(None);
        }
        if repo.active_branch()?.as_deref() != Some(branch) {
            return Ok(None);
        }
        Ok(Some(repo.is_dirty()?))
    }
}

fn restore<R>(repo: &R, branch: &str, warnings: &mut Vec<String>)
where
    R: RepositoryHandle + ?Sized,
{
    if let Err(e) = repo.stash_apply_tracked() {
        warn!(location = repo.location(), branch, error = %e, "tracked restore failed, stash kept");
        warnings.push(format!(
            "unresolved stash left in place (stash@{{0}}): tracked restore failed: {e}"
        ));
        return;
    }

    match repo.stash_apply_untracked() {
        Ok(()) => {}
        Err(RepoError::NotFound { .. }) => {
            debug!(location = repo.location(), branch, "stash has no untracked part");
        }
        Err(e) => {
            let ambiguity = SyncError::RestoreAmbiguity(e.to_string());
            warn!(location = repo.location(), branch, error = %ambiguity, "untracked restore failed");
            warnings.push(ambiguity.to_string());
        }
    }

    if let Err(e) = repo.stash_drop() {
        warn!(location = repo.location(), branch, error = %e, "stash drop failed");
        warnings.push(format!("unresolved stash left in place (stash@{{0}}): drop failed: {e}"));
    }
    if let Err(e) = repo.reset_head(false) {
        warnings.push(format!("unstaging restored changes failed: {e}"));
    }
    warnings.push(CLASH_NOTICE.to_string());
}
