//! Populating the working tree of a repository whose HEAD branch is unborn.

use std::path::Path;

use bsync_repo::RepoError;
use git2::build::CheckoutBuilder;
use git2::{ObjectType, Oid, Repository, Tree, TreeWalkMode, TreeWalkResult};

use crate::error::{GitError, GitResult};

/// Paths of `tree` that something in `workdir` already occupies.
pub(crate) fn collisions(tree: &Tree<'_>, workdir: &Path) -> GitResult<Vec<String>> {
    let mut paths = Vec::new();
    tree.walk(TreeWalkMode::PreOrder, |dir, entry| {
        let Some(name) = entry.name() else {
            return TreeWalkResult::Ok;
        };
        let path = format!("{dir}{name}");
        match (entry.kind(), workdir.join(&path).symlink_metadata()) {
            (Some(ObjectType::Tree), Ok(meta)) if meta.is_dir() => TreeWalkResult::Ok,
            (Some(ObjectType::Tree), Ok(_)) => {
                paths.push(path);
                TreeWalkResult::Skip
            }
            (Some(ObjectType::Tree), Err(_)) => TreeWalkResult::Skip,
            (_, Ok(_)) => {
                paths.push(path);
                TreeWalkResult::Ok
            }
            (_, Err(_)) => TreeWalkResult::Ok,
        }
    })?;
    Ok(paths)
}

/// Fail with [`RepoError::WouldOverwrite`] if `commit`'s tree (looked up in
/// `objects`) collides with anything in `workdir`.
pub(crate) fn check_first_checkout(objects: &Repository, commit: Oid, workdir: &Path) -> GitResult<()> {
    let tree = objects.find_commit(commit)?.tree()?;
    let paths = collisions(&tree, workdir)?;
    if paths.is_empty() {
        Ok(())
    } else {
        Err(GitError::Repo(RepoError::WouldOverwrite { paths }))
    }
}

/// Write `commit`'s tree into the working tree and index of `repo`, whose
/// HEAD is unborn. Nothing already on disk is overwritten; any collision
/// fails the checkout before a file is written.
pub(crate) fn first_checkout(repo: &Repository, commit: Oid) -> GitResult<()> {
    let workdir = repo
        .workdir()
        .ok_or_else(|| GitError::Unsupported("checkout requires a working tree".into()))?;
    check_first_checkout(repo, commit, workdir)?;

    let commit = repo.find_commit(commit)?;
    let mut checkout = CheckoutBuilder::new();
    checkout.safe();
    repo.checkout_tree(commit.as_object(), Some(&mut checkout))?;
    Ok(())
}
