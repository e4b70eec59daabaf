//! Per-branch outcomes and the per-project report.

use std::fmt;

use bsync_repo::RefUpdate;
use serde::{Deserialize, Serialize};

/// What happened to one branch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    CreatedLocal,
    CreatedRemote,
    UpToDate,
    PulledToLocal,
    PushedToRemote,
    Diverged,
    Error,
}

impl OutcomeKind {
    pub fn label(&self) -> &'static str {
        match self {
            OutcomeKind::CreatedLocal => "created local",
            OutcomeKind::CreatedRemote => "created remote",
            OutcomeKind::UpToDate => "up to date",
            OutcomeKind::PulledToLocal => "pulled",
            OutcomeKind::PushedToRemote => "pushed",
            OutcomeKind::Diverged => "diverged",
            OutcomeKind::Error => "error",
        }
    }

    /// `true` when the branch ended up (or would end up) moved or created.
    pub fn is_transfer(&self) -> bool {
        matches!(
            self,
            OutcomeKind::CreatedLocal
                | OutcomeKind::CreatedRemote
                | OutcomeKind::PulledToLocal
                | OutcomeKind::PushedToRemote
        )
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of reconciling one branch name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchOutcome {
    pub branch: String,
    pub kind: OutcomeKind,
    /// Human-readable detail, e.g. `[fast forward] 1a2b3c4d..5e6f7a8b`.
    pub detail: String,
    /// Stash restoration notices and tolerated ambiguities.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub dry_run: bool,
}

impl BranchOutcome {
    pub fn new(branch: impl Into<String>, kind: OutcomeKind, detail: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            kind,
            detail: detail.into(),
            warnings: Vec::new(),
            dry_run: false,
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Detail line for a transfer: flags plus the tip range of each update.
pub(crate) fn transfer_detail(updates: &[RefUpdate]) -> String {
    if updates.is_empty() {
        return "nothing to transfer".to_string();
    }
    updates
        .iter()
        .map(|update| {
            let rendered = update.to_string();
            // Drop the ref name, the branch is already on the outcome.
            let rest = match rendered.split_once(": ") {
                Some((_, rest)) => rest.to_string(),
                None => rendered,
            };
            match update.name.strip_prefix("refs/tags/") {
                Some(tag) => format!("tag {tag} {rest}"),
                None => rest,
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// How far a project got.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProjectStatus {
    /// Every branch was reconciled (individual branches may still report
    /// `Diverged` or `Error`).
    Synced,
    /// Neither side holds a repository; nothing was done.
    NotARepository,
    /// Setup failed before any branch was reconciled.
    ConfigError { detail: String },
}

/// Everything one engine pass over a project produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectReport {
    pub project: String,
    pub local: String,
    pub remote: String,
    #[serde(flatten)]
    pub status: ProjectStatus,
    /// Setup steps: repositories initialized, remotes created or corrected,
    /// remotes mirrored, up-front fetch summary.
    pub notes: Vec<String>,
    pub outcomes: Vec<BranchOutcome>,
    pub dry_run: bool,
}

impl ProjectReport {
    pub fn new(
        project: impl Into<String>,
        local: impl Into<String>,
        remote: impl Into<String>,
        dry_run: bool,
    ) -> Self {
        Self {
            project: project.into(),
            local: local.into(),
            remote: remote.into(),
            status: ProjectStatus::Synced,
            notes: Vec::new(),
            outcomes: Vec::new(),
            dry_run,
        }
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    /// Outcome recorded for `branch`, if any.
    pub fn outcome(&self, branch: &str) -> Option<&BranchOutcome> {
        self.outcomes.iter().find(|o| o.branch == branch)
    }

    pub fn count(&self, kind: OutcomeKind) -> usize {
        self.outcomes.iter().filter(|o| o.kind == kind).count()
    }

    /// `true` when the run should be reported as failed: a branch ended in
    /// `Error` or the project could not be set up.
    pub fn has_errors(&self) -> bool {
        matches!(self.status, ProjectStatus::ConfigError { .. })
            || self.outcomes.iter().any(|o| o.kind == OutcomeKind::Error)
    }
}
