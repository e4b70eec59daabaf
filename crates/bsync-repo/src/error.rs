//! Error types for repository handle operations.

use thiserror::Error;

/// Errors that can occur while observing or mutating a repository.
#[derive(Debug, Error)]
pub enum RepoError {
    /// A branch, commit, remote or stash entry was not found.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// The location does not hold a version-controlled repository.
    #[error("not a repository: {location}")]
    NotARepository { location: String },

    /// Two commits share no history at all.
    #[error("no common ancestor between {a} and {b}")]
    Unrelated { a: String, b: String },

    /// Fetch or push failed: network, authentication, or ref rejection.
    #[error("transport error: {0}")]
    Transport(String),

    /// A branch with this name already exists.
    #[error("branch already exists: {name}")]
    BranchExists { name: String },

    /// A remote with this name already exists.
    #[error("remote already exists: {name}")]
    RemoteExists { name: String },

    /// The branch or remote name is invalid.
    #[error("invalid name: {name}: {reason}")]
    InvalidName { name: String, reason: String },

    /// Checking out a branch would clobber files that are not tracked yet.
    #[error("checkout would overwrite untracked files: {}", paths.join(", "))]
    WouldOverwrite { paths: Vec<String> },

    /// The operation is not supported by this repository (e.g. a working
    /// tree operation on a bare repository).
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Failure reported by the underlying version-control engine.
    #[error("backend error: {0}")]
    Backend(String),

    /// I/O error while touching the working tree.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RepoError {
    /// Shorthand for [`RepoError::NotFound`].
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Returns `true` for [`RepoError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` for [`RepoError::Transport`].
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Convenience type alias for handle operations.
pub type RepoResult<T> = std::result::Result<T, RepoError>;
