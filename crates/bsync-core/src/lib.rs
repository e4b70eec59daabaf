//! Branch synchronization between two replicas of a project.
//!
//! One pass of the [`SyncEngine`] over a project opens (or creates) both
//! replicas, points the local replica's target remote at the other one and
//! then reconciles every branch name either side knows:
//!
//! - a branch present on one side only is created on the other;
//! - a branch whose tip is an ancestor of the other side's is fast-forwarded;
//! - diverged branches are reported and left alone.
//!
//! Transfers that touch a checked-out branch run inside a [`StashGuard`] so
//! uncommitted work survives them.
//!
//! # Modules
//!
//! - [`context`]: [`SyncContext`], per-run settings
//! - [`error`]: [`SyncError`]
//! - [`outcome`]: [`BranchOutcome`] and [`ProjectReport`]
//! - [`stash`]: The [`StashGuard`]
//! - [`reconcile`]: [`decide`] and the [`BranchReconciler`]
//! - [`engine`]: The [`SyncEngine`]

pub mod context;
pub mod engine;
pub mod error;
pub mod outcome;
pub mod reconcile;
pub mod stash;

pub use context::SyncContext;
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use outcome::{BranchOutcome, OutcomeKind, ProjectReport, ProjectStatus};
pub use reconcile::{decide, Action, BranchReconciler};
pub use stash::{Guarded, StashGuard, CLASH_NOTICE};
