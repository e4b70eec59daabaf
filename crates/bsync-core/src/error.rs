//! Error taxonomy of the sync core.

use bsync_repo::RepoError;
use thiserror::Error;

/// Failures the sync core reports. None of them escapes the engine: branch
/// failures become [`OutcomeKind::Error`](crate::OutcomeKind::Error)
/// outcomes and project failures become a project status.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Neither side of a project holds a repository.
    #[error("not a repository: {0}")]
    NotARepository(String),

    /// A fetch or push failed: network, authentication or ref rejection.
    #[error("transport error: {0}")]
    Transport(String),

    /// Both tips moved past their merge base (or share no history).
    #[error("diverged history on {branch}: {detail}")]
    DivergedHistory { branch: String, detail: String },

    /// Untracked stash content could not be restored unambiguously.
    #[error("restore ambiguity: {0}")]
    RestoreAmbiguity(String),

    /// The sync target or a repository could not be set up.
    #[error("config error: {0}")]
    ConfigError(String),

    /// Any other repository failure.
    #[error("repository error: {0}")]
    Repo(#[source] RepoError),
}

impl From<RepoError> for SyncError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Transport(msg) => SyncError::Transport(msg),
            RepoError::NotARepository { location } => SyncError::NotARepository(location),
            other => SyncError::Repo(other),
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
