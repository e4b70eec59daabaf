//! Running the external folder-sync program over a project's auxiliary
//! directory once its branches are reconciled.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::FolderSyncSettings;

/// What the folder sync did for one project.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FolderSyncStatus {
    Skipped { reason: String },
    Ran { batch: PathBuf },
    Failed { detail: String },
}

impl FolderSyncStatus {
    pub fn skipped(reason: impl Into<String>) -> Self {
        FolderSyncStatus::Skipped {
            reason: reason.into(),
        }
    }
}

/// Substitute the project paths into a batch template.
pub fn render_batch(template: &str, local: &Path, remote: &Path) -> String {
    template
        .replace("%LOCAL%", &local.to_string_lossy())
        .replace("%REMOTE%", &remote.to_string_lossy())
}

pub struct FolderSync<'a> {
    settings: &'a FolderSyncSettings,
}

impl<'a> FolderSync<'a> {
    pub fn new(settings: &'a FolderSyncSettings) -> Self {
        Self { settings }
    }

    /// Where the generated batch file for `project` lives: next to the
    /// project in the remote root.
    pub fn batch_path(&self, remote_root: &Path, project: &str) -> PathBuf {
        remote_root.join(format!("{project}.{}", self.settings.batch_name))
    }

    /// Sync `project`'s auxiliary directory. Never fails; problems are
    /// reported as [`FolderSyncStatus::Failed`].
    pub fn run(&self, project: &str, local: &Path, remote_root: &Path, dry_run: bool) -> FolderSyncStatus {
        let settings = self.settings;
        if !settings.enabled {
            return FolderSyncStatus::skipped("disabled");
        }
        if dry_run {
            return FolderSyncStatus::skipped("dry run");
        }
        if !local.join(&settings.aux_dir).is_dir() {
            return FolderSyncStatus::skipped(format!("no {} directory", settings.aux_dir));
        }
        let Some(program) = &settings.program else {
            return FolderSyncStatus::skipped("no program configured");
        };

        let remote = remote_root.join(project);
        let batch = self.batch_path(remote_root, project);
        match self.invoke(program, &batch, local, &remote) {
            Ok(()) => {
                info!(project, batch = %batch.display(), "folder sync finished");
                FolderSyncStatus::Ran { batch }
            }
            Err(e) => FolderSyncStatus::Failed {
                detail: format!("{e:#}"),
            },
        }
    }

    fn invoke(&self, program: &Path, batch: &Path, local: &Path, remote: &Path) -> anyhow::Result<()> {
        if batch.exists() {
            debug!(batch = %batch.display(), "reusing batch file");
        } else {
            self.write_batch(batch, local, remote)?;
        }
        let status = Command::new(program)
            .arg(batch)
            .status()
            .with_context(|| format!("cannot run {}", program.display()))?;
        if !status.success() {
            bail!("{} exited with {status}", program.display());
        }
        Ok(())
    }

    fn write_batch(&self, batch: &Path, local: &Path, remote: &Path) -> anyhow::Result<()> {
        let Some(template) = &self.settings.template else {
            bail!("no batch template configured and {} does not exist", batch.display());
        };
        let contents = fs::read_to_string(template)
            .with_context(|| format!("cannot read template {}", template.display()))?;
        fs::write(batch, render_batch(&contents, local, remote))
            .with_context(|| format!("cannot write {}", batch.display()))?;
        debug!(batch = %batch.display(), "generated batch file");
        Ok(())
    }
}
