//! Resolving filesystem locations to [`GitRepository`] handles.

use std::fs;
use std::path::Path;

use bsync_repo::{Lookup, RepoResult, RepositoryOpener};
use git2::{ErrorCode, Repository};
use tracing::info;

use crate::error::GitError;
use crate::repository::GitRepository;

/// Opens repositories exactly at the given path (no parent discovery), so a
/// project directory nested inside another checkout is not mistaken for it.
#[derive(Clone, Copy, Debug, Default)]
pub struct GitOpener;

impl RepositoryOpener for GitOpener {
    type Handle = GitRepository;

    fn open(&self, location: &str) -> RepoResult<Lookup<GitRepository>> {
        match Repository::open(location) {
            Ok(repo) => Ok(Lookup::Found(GitRepository::new(location, repo))),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(Lookup::Absent),
            Err(e) => Err(GitError::from(e).into()),
        }
    }

    fn init(&self, location: &str, bare: bool) -> RepoResult<GitRepository> {
        fs::create_dir_all(Path::new(location))?;
        let repo = if bare {
            Repository::init_bare(location)
        } else {
            Repository::init(location)
        }
        .map_err(GitError::from)?;
        info!(location, bare, "initialized repository");
        Ok(GitRepository::new(location, repo))
    }
}
