//! The project driver: resolves what to sync, runs the engine per project and
//! hands each finished report to the caller.

use std::path::{Path, PathBuf};

use anyhow::Context;
use bsync_core::{ProjectReport, ProjectStatus, SyncContext, SyncEngine};
use bsync_repo::RepositoryOpener;
use serde::Serialize;
use tracing::info;

use crate::cli::Cli;
use crate::config::{Config, FolderSyncSettings};
use crate::folder_sync::{FolderSync, FolderSyncStatus};
use crate::projects;

/// Everything resolved from the command line and config before any
/// repository is touched.
#[derive(Clone, Debug)]
pub struct RunPlan {
    pub local_root: String,
    pub remote_root: String,
    pub projects: Vec<String>,
    pub ctx: SyncContext,
}

impl RunPlan {
    pub fn resolve(cli: &Cli, config: &Config) -> anyhow::Result<Self> {
        let location = config.location(cli.location.as_deref());
        let remote_root = config.remote_root(cli.location.as_deref(), cli.remote_root.as_deref())?;
        let remote_root = absolute_root(&remote_root)?;
        let local_root = absolute_root(&cli.local.to_string_lossy())?;

        let projects = if cli.projects.is_empty() {
            projects::discover(&[Path::new(&local_root), Path::new(&remote_root)])
        } else {
            cli.projects.clone()
        };

        let sync = &config.sync;
        let ctx = SyncContext::new(location)
            .with_dry_run(cli.dry_run)
            .with_reset_on_resync(sync.reset_on_resync)
            .with_prefetch(sync.prefetch && !cli.no_prefetch)
            .with_mirror_remotes(sync.mirror_remotes || cli.mirror_remotes)
            .with_bare_remote(sync.bare_remote);

        Ok(Self {
            local_root,
            remote_root,
            projects,
            ctx,
        })
    }
}

/// Make a filesystem root absolute so that remote URLs written into
/// repositories do not depend on the working directory. URLs pass through.
fn absolute_root(root: &str) -> anyhow::Result<String> {
    if root.contains("://") {
        return Ok(root.to_string());
    }
    let absolute = std::path::absolute(root).with_context(|| format!("cannot resolve {root}"))?;
    Ok(absolute.to_string_lossy().into_owned())
}

/// One project's engine report plus the folder sync that followed it. The
/// folder sync nests under its own key so its fields never collide with the
/// report's.
#[derive(Clone, Debug, Serialize)]
pub struct ProjectRun {
    #[serde(flatten)]
    pub report: ProjectReport,
    pub folder_sync: FolderSyncStatus,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub runs: Vec<ProjectRun>,
}

impl RunSummary {
    /// `true` when any branch ended in `Error` or any project could not be
    /// set up.
    pub fn failed(&self) -> bool {
        self.runs.iter().any(|run| run.report.has_errors())
    }
}

/// Sync every project of `plan` in order, calling `on_run` as each one
/// finishes.
pub fn run<O: RepositoryOpener>(
    opener: &O,
    plan: &RunPlan,
    folder_sync: &FolderSyncSettings,
    mut on_run: impl FnMut(&ProjectRun),
) -> RunSummary {
    let engine = SyncEngine::new(opener, plan.ctx.clone());
    let folder_sync = FolderSync::new(folder_sync);
    let mut summary = RunSummary::default();

    for project in &plan.projects {
        let report = engine.sync_project(project, &plan.local_root, &plan.remote_root);
        let folder_sync = if report.status == ProjectStatus::Synced {
            let local = PathBuf::from(&report.local);
            folder_sync.run(project, &local, Path::new(&plan.remote_root), plan.ctx.dry_run)
        } else {
            FolderSyncStatus::skipped("project not synced")
        };
        let run = ProjectRun {
            report,
            folder_sync,
        };
        on_run(&run);
        summary.runs.push(run);
    }

    info!(projects = summary.runs.len(), failed = summary.failed(), "run finished");
    summary
}
