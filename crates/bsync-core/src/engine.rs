//! The sync engine: one pass over one project.

use std::collections::BTreeSet;

use bsync_repo::{Lookup, RefFlag, RepoResult, RepositoryHandle, RepositoryOpener};
use tracing::{debug, info, warn};

use crate::context::SyncContext;
use crate::error::SyncError;
use crate::outcome::{BranchOutcome, OutcomeKind, ProjectReport, ProjectStatus};
use crate::reconcile::BranchReconciler;

/// A side that is missing and will be (or, in a dry run, would be) created.
enum Side<H> {
    Open(H),
    /// Dry run only: the repository does not exist yet.
    Missing,
}

/// Drives the branch reconciler over every branch of a project.
pub struct SyncEngine<'a, O: RepositoryOpener> {
    opener: &'a O,
    ctx: SyncContext,
}

impl<'a, O: RepositoryOpener> SyncEngine<'a, O> {
    pub fn new(opener: &'a O, ctx: SyncContext) -> Self {
        Self { opener, ctx }
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    /// Synchronize `project` between `local_root` and `remote_root`.
    pub fn sync_project(&self, project: &str, local_root: &str, remote_root: &str) -> ProjectReport {
        let local = self.opener.join(local_root, project);
        let remote = self.opener.join(remote_root, project);
        self.sync_locations(project, &local, &remote)
    }

    /// Synchronize the repositories at two resolved locations.
    ///
    /// Never fails: project-level problems are reported through
    /// [`ProjectReport::status`], branch-level ones as outcomes.
    pub fn sync_locations(&self, project: &str, local: &str, remote: &str) -> ProjectReport {
        let mut report = ProjectReport::new(project, local, remote, self.ctx.dry_run);
        info!(project, local, remote, dry_run = self.ctx.dry_run, "syncing project");

        if let Err(e) = self.run(&mut report) {
            let status = match e {
                SyncError::NotARepository(_) => ProjectStatus::NotARepository,
                other => ProjectStatus::ConfigError {
                    detail: other.to_string(),
                },
            };
            warn!(project, status = ?status, "project skipped");
            report.status = status;
        }
        report
    }

    fn run(&self, report: &mut ProjectReport) -> Result<(), SyncError> {
        let local_found = self.opener.open(&report.local)?;
        let remote_found = self.opener.open(&report.remote)?;
        if !local_found.is_found() && !remote_found.is_found() {
            return Err(SyncError::NotARepository(report.project.clone()));
        }

        let local = self.resolve(local_found, &report.local.clone(), false, "local", report)?;
        let remote = self.resolve(
            remote_found,
            &report.remote.clone(),
            self.ctx.bare_remote,
            "remote",
            report,
        )?;

        let (local, remote) = match (local, remote) {
            (Side::Open(local), Side::Open(remote)) => (local, remote),
            (Side::Open(local), Side::Missing) => {
                self.preview_one_sided(&local, OutcomeKind::CreatedRemote, report)?;
                return Ok(());
            }
            (Side::Missing, Side::Open(remote)) => {
                self.preview_one_sided(&remote, OutcomeKind::CreatedLocal, report)?;
                return Ok(());
            }
            (Side::Missing, Side::Missing) => {
                return Err(SyncError::NotARepository(report.project.clone()))
            }
        };

        let target_ready = self
            .ensure_target(&local, &report.remote.clone(), report)
            .map_err(|e| SyncError::ConfigError(format!("remote {}: {e}", self.ctx.target)))?;

        if !remote.is_bare()? {
            if self.ctx.dry_run {
                debug!("dry run: receive.denyCurrentBranch left unchanged");
            } else {
                remote.set_receive_update_instead().map_err(|e| {
                    SyncError::ConfigError(format!("cannot accept pushes on {}: {e}", report.remote))
                })?;
            }
        }

        if self.ctx.prefetch && target_ready {
            self.prefetch(&local, report);
        }
        if self.ctx.mirror_remotes {
            self.mirror_remotes(&local, &remote, report)?;
        }

        let local_branches = local.list_branches()?;
        let remote_branches = remote.list_branches()?;
        let names: BTreeSet<&String> = local_branches.union(&remote_branches).collect();
        debug!(count = names.len(), "reconciling branches");

        let reconciler = BranchReconciler::new(&local, &remote, &self.ctx)
            .with_transport_preview(target_ready);
        for name in names {
            let outcome = reconciler.reconcile(name, &local_branches, &remote_branches);
            report.outcomes.push(outcome);
        }
        Ok(())
    }

    /// Use an existing repository or create one where it is missing.
    fn resolve(
        &self,
        found: Lookup<O::Handle>,
        location: &str,
        bare: bool,
        side: &str,
        report: &mut ProjectReport,
    ) -> Result<Side<O::Handle>, SyncError> {
        match found {
            Lookup::Found(handle) => Ok(Side::Open(handle)),
            Lookup::Absent if self.ctx.dry_run => {
                report.note(format!("would initialize {side} repository at {location}"));
                Ok(Side::Missing)
            }
            Lookup::Absent => {
                let handle = self.opener.init(location, bare).map_err(|e| {
                    SyncError::ConfigError(format!("cannot initialize {location}: {e}"))
                })?;
                let kind = if bare { "bare " } else { "" };
                report.note(format!("initialized {kind}{side} repository at {location}"));
                Ok(Side::Open(handle))
            }
        }
    }

    /// Make the target remote in `local` point at `url`. Returns whether the
    /// remote is usable as configured (always after a real run; in a dry run
    /// only if nothing had to change).
    fn ensure_target(&self, local: &O::Handle, url: &str, report: &mut ProjectReport) -> RepoResult<bool> {
        let target = self.ctx.target.as_str();
        match local.find_remote(target)? {
            Lookup::Found(current) if current == url => Ok(true),
            Lookup::Found(current) => {
                if self.ctx.dry_run {
                    report.note(format!("would correct remote {target}: {current} -> {url}"));
                    return Ok(false);
                }
                local.set_remote_url(target, url)?;
                report.note(format!("corrected remote {target}: {current} -> {url}"));
                Ok(true)
            }
            Lookup::Absent => {
                if self.ctx.dry_run {
                    report.note(format!("would create remote {target} -> {url}"));
                    return Ok(false);
                }
                local.create_remote(target, url)?;
                report.note(format!("created remote {target} -> {url}"));
                Ok(true)
            }
        }
    }

    fn prefetch(&self, local: &O::Handle, report: &mut ProjectReport) {
        let target = self.ctx.target.as_str();
        match local.fetch_remote(target, self.ctx.dry_run) {
            Ok(summary) if summary.is_up_to_date() => {
                report.note(format!("fetched {target}: up to date"));
            }
            Ok(summary) => {
                let moved = summary
                    .updates
                    .iter()
                    .filter(|u| !u.has_flag(RefFlag::HeadUpToDate))
                    .count();
                report.note(format!("fetched {target}: {moved} ref(s) updated"));
                for update in &summary.updates {
                    debug!(%update, "prefetch");
                }
            }
            Err(e) => {
                warn!(remote = target, error = %e, "up-front fetch failed");
                report.note(format!("fetch of {target} failed: {e}"));
            }
        }
    }

    /// Give each side the remotes only the other side has. The sync target
    /// itself is never mirrored.
    fn mirror_remotes(&self, local: &O::Handle, remote: &O::Handle, report: &mut ProjectReport) -> RepoResult<()> {
        let local_remotes = local.remotes()?;
        let remote_remotes = remote.remotes()?;

        let plan = [
            (&local_remotes, &remote_remotes, remote, "remote"),
            (&remote_remotes, &local_remotes, local, "local"),
        ];
        for (from, into, handle, side) in plan {
            for entry in from.iter() {
                if entry.name == self.ctx.target || into.iter().any(|r| r.name == entry.name) {
                    continue;
                }
                if self.ctx.dry_run {
                    report.note(format!("would mirror remote {} to {side}", entry.name));
                    continue;
                }
                handle.create_remote(&entry.name, &entry.url)?;
                report.note(format!("mirrored remote {} -> {} to {side}", entry.name, entry.url));
            }
        }
        Ok(())
    }

    /// Dry run with one side missing: every branch of the existing side
    /// would be created on the other.
    fn preview_one_sided(
        &self,
        existing: &O::Handle,
        kind: OutcomeKind,
        report: &mut ProjectReport,
    ) -> Result<(), SyncError> {
        for name in existing.list_branches()? {
            let tip = existing.branch_commit(&name)?;
            let detail = format!("would create at {}", tip.short());
            report
                .outcomes
                .push(BranchOutcome::new(name, kind, detail).with_dry_run(true));
        }
        Ok(())
    }
}
