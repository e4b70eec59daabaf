//! libgit2 binding of the bsync repository handle contract.
//!
//! [`GitRepository`] implements [`bsync_repo::RepositoryHandle`] over a
//! `git2::Repository`, and [`GitOpener`] resolves filesystem locations to
//! handles, initializing empty repositories on request.
//!
//! Remotes that are plain filesystem paths are served without libgit2's
//! push transport: pushes are delivered by fetching into the target
//! repository, which also lets a non-bare target honour
//! `receive.denyCurrentBranch=updateInstead`.

pub mod error;
pub mod opener;
pub mod repository;
mod stash;
mod transport;
mod worktree;

pub use error::{GitError, GitResult};
pub use opener::GitOpener;
pub use repository::GitRepository;
