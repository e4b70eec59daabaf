//! Repository handle contract for bsync.
//!
//! The sync core never talks to a version-control system directly. It is
//! written against the [`RepositoryHandle`] trait defined here, and obtains
//! handles through a [`RepositoryOpener`]. A concrete libgit2 binding lives in
//! `bsync-git`; this crate ships an in-memory model used by tests.
//!
//! # Architecture
//!
//! - **Branches** are named pointers to commit tips. The same name in two
//!   repositories is the same logical branch.
//! - **Commits** are identified by an opaque, content-addressed [`CommitId`].
//! - **Remotes** are named locations configured inside a repository.
//! - **Stashes** save tracked and untracked changes as one unit that can be
//!   restored in two independent steps.
//!
//! # Modules
//!
//! - [`error`]: Error types for handle operations
//! - [`types`]: [`CommitId`], [`Lookup`], fetch/push summaries
//! - [`traits`]: The [`RepositoryHandle`] and [`RepositoryOpener`] traits
//! - [`names`]: Branch/remote name validation
//! - [`memory`]: In-memory [`MemoryNetwork`] of replicas for tests

pub mod error;
pub mod memory;
pub mod names;
pub mod traits;
pub mod types;

pub use error::{RepoError, RepoResult};
pub use memory::{CallOp, MemoryNetwork, MemoryRepository, RepoCall};
pub use names::{validate_branch_name, validate_remote_name};
pub use traits::{RepositoryHandle, RepositoryOpener};
pub use types::{CommitId, FetchSummary, Lookup, PushSummary, RefFlag, RefUpdate, Remote};
