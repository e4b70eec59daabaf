//! Per-branch reconciliation.
//!
//! [`decide`] is the pure decision over two optional tips and their merge
//! base; [`BranchReconciler::plan`] feeds it from the repositories and
//! [`BranchReconciler::execute`] carries the resulting [`Action`] out through
//! the stash guard.

use std::collections::BTreeSet;

use bsync_repo::{CommitId, RefFlag, RefUpdate, RepoError, RepoResult, RepositoryHandle};
use tracing::{debug, info, warn};

use crate::context::SyncContext;
use crate::error::SyncError;
use crate::outcome::{transfer_detail, BranchOutcome, OutcomeKind};
use crate::stash::{Guarded, StashGuard};

/// What to do with one branch name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Only the remote has the branch: create it locally at `tip`.
    CreateLocal { tip: CommitId },
    /// Only the local side has the branch: create it remotely at `tip`.
    CreateRemote { tip: CommitId },
    UpToDate { tip: CommitId },
    /// The local tip is an ancestor of the remote tip.
    Pull { local: CommitId, remote: CommitId },
    /// The remote tip is an ancestor of the local tip.
    Push { local: CommitId, remote: CommitId },
    /// Neither tip is an ancestor of the other. `base` is `None` when the
    /// histories are unrelated.
    Diverged {
        local: CommitId,
        remote: CommitId,
        base: Option<CommitId>,
    },
}

impl Action {
    /// The outcome this action produces when carried out successfully.
    pub fn outcome_kind(&self) -> OutcomeKind {
        match self {
            Action::CreateLocal { .. } => OutcomeKind::CreatedLocal,
            Action::CreateRemote { .. } => OutcomeKind::CreatedRemote,
            Action::UpToDate { .. } => OutcomeKind::UpToDate,
            Action::Pull { .. } => OutcomeKind::PulledToLocal,
            Action::Push { .. } => OutcomeKind::PushedToRemote,
            Action::Diverged { .. } => OutcomeKind::Diverged,
        }
    }
}

/// Decide the action for `name` from its tips on each side.
///
/// `merge_base` is only consulted when both tips exist and differ; equality
/// always wins over ancestry. An `Unrelated` merge base means divergence.
pub fn decide(
    name: &str,
    local: Option<CommitId>,
    remote: Option<CommitId>,
    merge_base: impl FnOnce(&CommitId, &CommitId) -> RepoResult<CommitId>,
) -> RepoResult<Action> {
    let (local, remote) = match (local, remote) {
        (None, None) => return Err(RepoError::not_found(format!("branch {name} on either side"))),
        (None, Some(tip)) => return Ok(Action::CreateLocal { tip }),
        (Some(tip), None) => return Ok(Action::CreateRemote { tip }),
        (Some(local), Some(remote)) => (local, remote),
    };

    if local == remote {
        return Ok(Action::UpToDate { tip: local });
    }

    let base = match merge_base(&local, &remote) {
        Ok(base) => Some(base),
        Err(RepoError::Unrelated { .. }) => None,
        Err(e) => return Err(e),
    };
    Ok(match base {
        Some(base) if base == local => Action::Pull { local, remote },
        Some(base) if base == remote => Action::Push { local, remote },
        base => Action::Diverged {
            local,
            remote,
            base,
        },
    })
}

/// Reconciles branches between a local repository and its sync partner.
pub struct BranchReconciler<'a, H: RepositoryHandle + ?Sized> {
    local: &'a H,
    remote: &'a H,
    ctx: &'a SyncContext,
    preview: bool,
}

impl<'a, H: RepositoryHandle + ?Sized> BranchReconciler<'a, H> {
    pub fn new(local: &'a H, remote: &'a H, ctx: &'a SyncContext) -> Self {
        Self {
            local,
            remote,
            ctx,
            preview: true,
        }
    }

    /// In a dry run, whether the target remote can be asked what a transfer
    /// would do. Without it dry-run outcomes describe the planned action only.
    pub fn with_transport_preview(mut self, preview: bool) -> Self {
        self.preview = preview;
        self
    }

    /// Tip of `name` in `repo`, if `branches` lists it.
    fn tip(repo: &H, name: &str, branches: &BTreeSet<String>) -> RepoResult<Option<CommitId>> {
        if branches.contains(name) {
            repo.branch_commit(name).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Merge base as seen from the local side, falling back to the remote
    /// side when the local repository lacks one of the commits.
    fn merge_base(&self, a: &CommitId, b: &CommitId) -> RepoResult<CommitId> {
        match self.local.merge_base(a, b) {
            Err(e) if e.is_not_found() => {
                debug!(a = %a.short(), b = %b.short(), "merge base not local, asking remote");
                self.remote.merge_base(a, b)
            }
            other => other,
        }
    }

    /// Decide what to do with `name` without mutating anything.
    pub fn plan(
        &self,
        name: &str,
        local_branches: &BTreeSet<String>,
        remote_branches: &BTreeSet<String>,
    ) -> RepoResult<Action> {
        let local = Self::tip(self.local, name, local_branches)?;
        let remote = Self::tip(self.remote, name, remote_branches)?;
        decide(name, local, remote, |a, b| self.merge_base(a, b))
    }

    /// Plan and carry out the action for `name`. Never fails: every failure
    /// becomes an [`OutcomeKind::Error`] outcome.
    pub fn reconcile(
        &self,
        name: &str,
        local_branches: &BTreeSet<String>,
        remote_branches: &BTreeSet<String>,
    ) -> BranchOutcome {
        let outcome = match self.plan(name, local_branches, remote_branches) {
            Ok(action) => self.execute(name, action),
            Err(e) => self.failed(name, format!("cannot compare tips: {e}"), Vec::new()),
        };
        info!(branch = %name, outcome = %outcome.kind, detail = %outcome.detail, "reconciled branch");
        outcome
    }

    /// Carry out a planned action.
    pub fn execute(&self, name: &str, action: Action) -> BranchOutcome {
        let dry_run = self.ctx.dry_run;
        let kind = action.outcome_kind();
        match action {
            Action::UpToDate { tip } => {
                BranchOutcome::new(name, kind, format!("at {}", tip.short())).with_dry_run(dry_run)
            }
            Action::Diverged { local, remote, base } => {
                let detail = match base {
                    Some(base) => format!(
                        "local {} and remote {} both moved past {}; merge manually",
                        local.short(),
                        remote.short(),
                        base.short()
                    ),
                    None => format!(
                        "local {} and remote {} share no history",
                        local.short(),
                        remote.short()
                    ),
                };
                let err = SyncError::DivergedHistory {
                    branch: name.to_string(),
                    detail: detail.clone(),
                };
                warn!(branch = %name, error = %err, "skipping diverged branch");
                BranchOutcome::new(name, kind, detail).with_dry_run(dry_run)
            }
            Action::CreateLocal { tip } => self.create_local(name, &tip),
            Action::CreateRemote { tip } => {
                let planned = format!("create on {} at {}", self.ctx.target, tip.short());
                self.push(name, kind, planned)
            }
            Action::Pull { local, remote } => {
                let planned = format!("fast-forward {}..{}", local.short(), remote.short());
                self.pull(name, kind, planned, None)
            }
            Action::Push { local, remote } => {
                let planned = format!("fast-forward {}..{}", remote.short(), local.short());
                self.push(name, kind, planned)
            }
        }
    }

    fn create_local(&self, name: &str, tip: &CommitId) -> BranchOutcome {
        if !self.ctx.dry_run {
            if let Err(e) = self.local.create_branch(name, tip, Some(&self.ctx.target)) {
                return self.failed(name, format!("cannot create local branch: {e}"), Vec::new());
            }
        }
        let planned = format!("create from {} at {}", self.ctx.target, tip.short());
        self.pull(name, OutcomeKind::CreatedLocal, planned, Some(tip))
    }

    /// Guarded fast-forward of the local branch from the target. `created`
    /// is the tip a branch was just created at.
    fn pull(
        &self,
        name: &str,
        kind: OutcomeKind,
        planned: String,
        created: Option<&CommitId>,
    ) -> BranchOutcome {
        if self.ctx.dry_run && !self.preview {
            return self.planned(name, kind, planned);
        }
        let guard = StashGuard::new(self.ctx);
        let target = self.ctx.target.as_str();
        let guarded = guard.run(self.local, name, |repo| {
            repo.fetch_branch(target, name, self.ctx.dry_run)
                .map(|summary| summary.updates)
        });
        self.finish(name, kind, guarded, created)
    }

    /// Push of the local branch to the target, guarded on the remote side so
    /// that a checked-out remote branch keeps its uncommitted work.
    fn push(&self, name: &str, kind: OutcomeKind, planned: String) -> BranchOutcome {
        if self.ctx.dry_run && !self.preview {
            return self.planned(name, kind, planned);
        }
        let guard = StashGuard::new(self.ctx);
        let target = self.ctx.target.as_str();
        let guarded = guard.run(self.remote, name, |_| {
            self.local
                .push_branch(target, name, self.ctx.dry_run)
                .map(|summary| summary.updates)
        });
        self.finish(name, kind, guarded, None)
    }

    fn planned(&self, name: &str, kind: OutcomeKind, planned: String) -> BranchOutcome {
        BranchOutcome::new(name, kind, format!("would {planned}")).with_dry_run(true)
    }

    fn finish(
        &self,
        name: &str,
        kind: OutcomeKind,
        guarded: Guarded<Vec<RefUpdate>>,
        created: Option<&CommitId>,
    ) -> BranchOutcome {
        let warnings = guarded.warnings;
        match guarded.result {
            Ok(updates) => {
                let detail = match created {
                    Some(tip) => self.created_detail(name, tip, updates),
                    None if self.ctx.dry_run => format!("would {}", transfer_detail(&updates)),
                    None => transfer_detail(&updates),
                };
                BranchOutcome::new(name, kind, detail)
                    .with_warnings(warnings)
                    .with_dry_run(self.ctx.dry_run)
            }
            Err(e) => {
                let err = SyncError::from(e);
                self.failed(name, err.to_string(), warnings)
            }
        }
    }

    /// A new branch is described by where it was created. The fetch after
    /// creation only adds what moved past that tip, plus any tags.
    fn created_detail(&self, name: &str, tip: &CommitId, updates: Vec<RefUpdate>) -> String {
        let branch = format!("refs/heads/{name}");
        let rest: Vec<RefUpdate> = updates
            .into_iter()
            .filter(|u| {
                u.name != branch
                    || !(u.has_flag(RefFlag::HeadUpToDate) || u.has_flag(RefFlag::NewHead))
            })
            .collect();
        let head = if self.ctx.dry_run {
            format!("would create at {}", tip.short())
        } else {
            format!("created at {}", tip.short())
        };
        if rest.is_empty() {
            head
        } else {
            format!("{head}; {}", transfer_detail(&rest))
        }
    }

    fn failed(&self, name: &str, detail: String, warnings: Vec<String>) -> BranchOutcome {
        warn!(branch = %name, %detail, "branch failed");
        BranchOutcome::new(name, OutcomeKind::Error, detail)
            .with_warnings(warnings)
            .with_dry_run(self.ctx.dry_run)
    }
}
