//! Two-step stash restoration.
//!
//! A stash saved with untracked files is a merge commit: its tree holds the
//! tracked working-tree state, its first parent is the commit HEAD pointed
//! at, and its third parent holds the untracked files. The halves are
//! restored independently so that a failure to restore untracked files
//! cannot lose tracked work.

use std::fs;
use std::path::{Path, PathBuf};

use git2::{Delta, ObjectType, Oid, Repository, TreeWalkMode, TreeWalkResult};
use tracing::debug;

use crate::error::{GitError, GitResult};

const STASH_REF: &str = "refs/stash";

fn workdir(repo: &Repository) -> GitResult<PathBuf> {
    repo.workdir()
        .map(Path::to_path_buf)
        .ok_or_else(|| GitError::Unsupported("stash requires a working tree".into()))
}

fn newest_stash(repo: &Repository) -> GitResult<git2::Commit<'_>> {
    let oid = repo
        .refname_to_id(STASH_REF)
        .map_err(|_| GitError::NotFound("stash@{0}".into()))?;
    Ok(repo.find_commit(oid)?)
}

/// Write blob `oid` to `path` (relative to the working tree) and stage it.
fn write_entry(repo: &Repository, index: &mut git2::Index, path: &Path, oid: Oid) -> GitResult<()> {
    let full = workdir(repo)?.join(path);
    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent)?;
    }
    let blob = repo.find_blob(oid)?;
    fs::write(&full, blob.content())?;
    index.add_path(path)?;
    Ok(())
}

fn remove_entry(repo: &Repository, index: &mut git2::Index, path: &Path) -> GitResult<()> {
    let full = workdir(repo)?.join(path);
    if full.exists() {
        fs::remove_file(&full)?;
    }
    index.remove_path(path)?;
    Ok(())
}

/// Restore the tracked half: replay the stash tree's changes against the
/// commit it was taken on.
pub(crate) fn apply_tracked(repo: &Repository) -> GitResult<usize> {
    let stash = newest_stash(repo)?;
    let base = stash.parent(0)?.tree()?;
    let saved = stash.tree()?;
    let diff = repo.diff_tree_to_tree(Some(&base), Some(&saved), None)?;

    let mut index = repo.index()?;
    let mut restored = 0;
    for delta in diff.deltas() {
        match delta.status() {
            Delta::Deleted => {
                if let Some(path) = delta.old_file().path() {
                    remove_entry(repo, &mut index, path)?;
                    restored += 1;
                }
            }
            _ => {
                if let Some(path) = delta.new_file().path() {
                    write_entry(repo, &mut index, path, delta.new_file().id())?;
                    restored += 1;
                }
            }
        }
    }
    index.write()?;
    debug!(restored, "restored tracked stash content");
    Ok(restored)
}

/// Restore the untracked half from the stash's third parent.
pub(crate) fn apply_untracked(repo: &Repository) -> GitResult<usize> {
    let stash = newest_stash(repo)?;
    if stash.parent_count() < 3 {
        return Err(GitError::NotFound("stash@{0}^3".into()));
    }
    let tree = stash.parent(2)?.tree()?;

    let mut files = Vec::new();
    tree.walk(TreeWalkMode::PreOrder, |root, entry| {
        if entry.kind() == Some(ObjectType::Blob) {
            if let Some(name) = entry.name() {
                files.push((PathBuf::from(format!("{root}{name}")), entry.id()));
            }
        }
        TreeWalkResult::Ok
    })?;

    let mut index = repo.index()?;
    for (path, oid) in &files {
        write_entry(repo, &mut index, path, *oid)?;
    }
    index.write()?;
    debug!(restored = files.len(), "restored untracked stash content");
    Ok(files.len())
}
