//! Error types for the libgit2 binding.

use bsync_repo::RepoError;
use thiserror::Error;

/// Errors raised inside the binding before they are mapped onto the
/// repository contract's [`RepoError`] taxonomy.
#[derive(Debug, Error)]
pub enum GitError {
    /// A libgit2 call failed.
    #[error("git: {0}")]
    Git(#[from] git2::Error),

    /// A fetch, push or remote listing failed.
    #[error("{0}")]
    Transport(String),

    /// Something the operation needs is missing.
    #[error("{0}")]
    NotFound(String),

    /// The operation needs a working tree the repository does not have.
    #[error("{0}")]
    Unsupported(String),

    /// The repository lock was poisoned by a panicking thread.
    #[error("lock poisoned: {0}")]
    Poisoned(String),

    /// Contract-level failure (name validation, existing branch or remote).
    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GitError {
    /// Wrap a libgit2 error raised while talking to a remote.
    pub fn transport(err: git2::Error) -> Self {
        GitError::Transport(err.message().to_string())
    }
}

/// Convenience type alias for binding internals.
pub type GitResult<T> = std::result::Result<T, GitError>;

impl From<GitError> for RepoError {
    fn from(err: GitError) -> Self {
        match err {
            GitError::Git(e) => classify(e),
            GitError::Transport(msg) => RepoError::Transport(msg),
            GitError::NotFound(what) => RepoError::NotFound { what },
            GitError::Unsupported(msg) => RepoError::Unsupported(msg),
            GitError::Poisoned(msg) => RepoError::Backend(format!("lock poisoned: {msg}")),
            GitError::Repo(e) => e,
            GitError::Io(e) => RepoError::Io(e),
        }
    }
}

/// Map a libgit2 error code/class onto the contract taxonomy.
fn classify(err: git2::Error) -> RepoError {
    use git2::{ErrorClass, ErrorCode};

    match (err.code(), err.class()) {
        (ErrorCode::NotFound, _) => RepoError::not_found(err.message()),
        (ErrorCode::Auth | ErrorCode::Certificate | ErrorCode::NotFastForward, _) => {
            RepoError::Transport(err.message().to_string())
        }
        (_, ErrorClass::Net | ErrorClass::Ssh | ErrorClass::Http | ErrorClass::Ssl) => {
            RepoError::Transport(err.message().to_string())
        }
        _ => RepoError::Backend(err.message().to_string()),
    }
}
