//! Talking to the other replica: credentials, remote listings and delivery
//! of pushes to filesystem remotes.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use git2::build::CheckoutBuilder;
use git2::{AutotagOption, Cred, Direction, FetchOptions, Oid, PushOptions, RemoteCallbacks, Repository};
use tracing::debug;

use crate::error::{GitError, GitResult};
use crate::worktree;

/// Callbacks that try the ssh agent, then the configured credential helper,
/// then libgit2's default credentials.
pub(crate) fn callbacks<'a>(repo: &Repository) -> RemoteCallbacks<'a> {
    let cfg = repo.config().ok();
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |url, username_from_url, allowed| {
        if allowed.is_ssh_key() {
            if let Some(user) = username_from_url {
                return Cred::ssh_key_from_agent(user);
            }
        }
        if allowed.is_user_pass_plaintext() {
            if let Some(cfg) = cfg.as_ref() {
                if let Ok(cred) = Cred::credential_helper(cfg, url, username_from_url) {
                    return Ok(cred);
                }
            }
        }
        Cred::default()
    });
    callbacks
}

pub(crate) fn fetch_options<'a>(repo: &Repository) -> FetchOptions<'a> {
    let mut options = FetchOptions::new();
    options.remote_callbacks(callbacks(repo));
    options
}

/// The filesystem path behind `url`, if it names an existing directory.
pub(crate) fn local_path(url: &str) -> Option<PathBuf> {
    let path = Path::new(url.strip_prefix("file://").unwrap_or(url));
    path.is_dir().then(|| path.to_path_buf())
}

/// Every ref advertised by `remote`, with `^{}` entries for the commits
/// annotated tags peel to, as `ls-remote` lists them.
fn advertised(repo: &Repository, remote: &str) -> GitResult<Vec<(String, Oid)>> {
    let mut handle = repo.find_remote(remote)?;
    let url = handle
        .url()
        .ok_or_else(|| GitError::NotFound(format!("url of remote {remote}")))?
        .to_string();

    if let Some(path) = local_path(&url) {
        let target = Repository::open(&path).map_err(GitError::transport)?;
        let mut refs = Vec::new();
        for reference in target.references()? {
            let reference = reference?;
            let (Some(name), Some(oid)) = (reference.name(), reference.target()) else {
                continue;
            };
            let name = name.to_string();
            if name.starts_with("refs/tags/") {
                if let Ok(commit) = reference.peel_to_commit() {
                    if commit.id() != oid {
                        refs.push((format!("{name}^{{}}"), commit.id()));
                    }
                }
            }
            refs.push((name, oid));
        }
        return Ok(refs);
    }

    let connection = handle
        .connect_auth(Direction::Fetch, Some(callbacks(repo)), None)
        .map_err(GitError::transport)?;
    let refs = connection
        .list()
        .map_err(GitError::transport)?
        .iter()
        .map(|head| (head.name().to_string(), head.oid()))
        .collect();
    Ok(refs)
}

/// Branch heads (`refs/heads/*`) advertised by `remote`.
pub(crate) fn remote_heads(repo: &Repository, remote: &str) -> GitResult<Vec<(String, Oid)>> {
    Ok(advertised(repo, remote)?
        .into_iter()
        .filter(|(name, _)| name.starts_with("refs/heads/"))
        .collect())
}

/// A tag ref: the object it names and the commit that object peels to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct TagRef {
    pub name: String,
    pub target: Oid,
    pub commit: Oid,
}

impl TagRef {
    /// Annotated tags name a tag object rather than the commit itself.
    pub fn is_annotated(&self) -> bool {
        self.target != self.commit
    }
}

/// Tags (`refs/tags/*`) advertised by `remote`.
pub(crate) fn remote_tags(repo: &Repository, remote: &str) -> GitResult<Vec<TagRef>> {
    let refs = advertised(repo, remote)?;
    let peeled: HashMap<&str, Oid> = refs
        .iter()
        .filter_map(|(name, oid)| name.strip_suffix("^{}").map(|name| (name, *oid)))
        .collect();
    Ok(refs
        .iter()
        .filter(|(name, _)| name.starts_with("refs/tags/") && !name.ends_with("^{}"))
        .map(|(name, target)| TagRef {
            name: name.clone(),
            target: *target,
            commit: peeled.get(name.as_str()).copied().unwrap_or(*target),
        })
        .collect())
}

/// Tags of `repo` itself. Tags that do not peel to a commit are left out.
pub(crate) fn local_tags(repo: &Repository) -> GitResult<Vec<TagRef>> {
    let mut tags = Vec::new();
    for reference in repo.references_glob("refs/tags/*")? {
        let reference = reference?;
        let (Some(name), Some(target)) = (reference.name(), reference.target()) else {
            continue;
        };
        if let Ok(commit) = reference.peel_to_commit() {
            tags.push(TagRef {
                name: name.to_string(),
                target,
                commit: commit.id(),
            });
        }
    }
    Ok(tags)
}

/// Tip of `refs/heads/<name>` on `remote`, if the branch exists there.
pub(crate) fn remote_tip(repo: &Repository, remote: &str, name: &str) -> GitResult<Option<Oid>> {
    let refname = format!("refs/heads/{name}");
    Ok(remote_heads(repo, remote)?
        .into_iter()
        .find(|(head, _)| *head == refname)
        .map(|(_, oid)| oid))
}

/// `true` if `new` fast-forwards `old`, judged from `repo`'s object database.
///
/// An unknown `old` commit cannot be an ancestor of anything `repo` has.
pub(crate) fn fast_forwards(repo: &Repository, old: Oid, new: Oid) -> GitResult<bool> {
    if old == new {
        return Ok(true);
    }
    if repo.find_commit(old).is_err() || repo.find_commit(new).is_err() {
        return Ok(false);
    }
    Ok(repo.graph_descendant_of(new, old)?)
}

/// Push `refs/heads/<name>`, plus the given tag refs, through libgit2's
/// network transport.
pub(crate) fn push_network(repo: &Repository, remote: &str, name: &str, tags: &[String]) -> GitResult<()> {
    let mut handle = repo.find_remote(remote)?;
    let mut refspecs = vec![format!("refs/heads/{name}:refs/heads/{name}")];
    refspecs.extend(tags.iter().map(|tag| format!("{tag}:{tag}")));
    let rejection: RefCell<Option<String>> = RefCell::new(None);

    {
        let mut callbacks = callbacks(repo);
        callbacks.push_update_reference(|refname, status| {
            if let Some(message) = status {
                *rejection.borrow_mut() = Some(format!("{refname}: {message}"));
            }
            Ok(())
        });
        let mut options = PushOptions::new();
        options.remote_callbacks(callbacks);
        handle
            .push(&refspecs, Some(&mut options))
            .map_err(GitError::transport)?;
    }

    match rejection.into_inner() {
        Some(message) => Err(GitError::Transport(message)),
        None => Ok(()),
    }
}

/// Deliver branch `name` at `new`, plus the given tag refs, into the
/// repository at `target_path` by fetching from `source` inside the target.
///
/// Follows git's receive rules: the update must fast-forward, and a
/// checked-out branch of a non-bare target is only updated when
/// `receive.denyCurrentBranch` is `updateInstead` and its working tree is
/// clean, in which case the working tree follows the new tip. An unborn
/// HEAD branch is not checked out yet; delivering it populates the working
/// tree provided no file there would be overwritten.
///
/// A dry run skips the `receive.denyCurrentBranch` check, since the sync
/// turns `updateInstead` on before any real push.
pub(crate) fn deliver_local(
    source: &Repository,
    target_path: &Path,
    name: &str,
    new: Oid,
    tags: &[String],
    dry_run: bool,
) -> GitResult<Option<Oid>> {
    let target = Repository::open(target_path).map_err(GitError::transport)?;
    let refname = format!("refs/heads/{name}");
    let old = target.refname_to_id(&refname).ok();
    let moves = old != Some(new);

    if !moves && tags.is_empty() {
        return Ok(old);
    }
    if let Some(old) = old {
        if !fast_forwards(source, old, new)? {
            return Err(GitError::Transport(format!(
                "{refname}: rejected (non-fast-forward)"
            )));
        }
    }

    let head_names_branch = !target.is_bare()
        && target
            .find_reference("HEAD")?
            .symbolic_target()
            .map_or(false, |head| head == refname);
    let checked_out = moves && head_names_branch && old.is_some();
    let unborn = head_names_branch && old.is_none();

    if checked_out {
        let policy = target
            .config()?
            .get_string("receive.denyCurrentBranch")
            .unwrap_or_default();
        if policy != "updateInstead" && !dry_run {
            return Err(GitError::Transport(format!(
                "refusing to update checked out branch: {refname}"
            )));
        }
        let mut status = git2::StatusOptions::new();
        status.include_untracked(false).include_ignored(false);
        if !target.statuses(Some(&mut status))?.is_empty() {
            return Err(GitError::Transport(format!(
                "{refname}: working directory of the remote is dirty"
            )));
        }
    }
    if unborn {
        if let Some(workdir) = target.workdir() {
            worktree::check_first_checkout(source, new, workdir)?;
        }
    }

    if dry_run {
        return Ok(old);
    }

    let source_path = source.path().to_string_lossy().into_owned();
    let incoming = format!("refs/bsync/incoming/{name}");
    let mut refspecs = vec![format!("+{refname}:{incoming}")];
    refspecs.extend(tags.iter().map(|tag| format!("+{tag}:{tag}")));
    let mut remote = target
        .remote_anonymous(&source_path)
        .map_err(GitError::transport)?;
    let mut options = FetchOptions::new();
    options.download_tags(AutotagOption::None);
    remote
        .fetch(&refspecs, Some(&mut options), None)
        .map_err(GitError::transport)?;

    if unborn {
        if let Err(e) = worktree::first_checkout(&target, new) {
            target.find_reference(&incoming)?.delete()?;
            return Err(e);
        }
    }
    target.reference(&refname, new, true, "bsync: push")?;
    target.find_reference(&incoming)?.delete()?;

    if checked_out {
        let mut checkout = CheckoutBuilder::new();
        checkout.force();
        target.checkout_head(Some(&mut checkout))?;
    }
    debug!(destination = %target_path.display(), branch = name, tags = tags.len(), "delivered branch");
    Ok(old)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::commit_file;

    #[test]
    fn local_path_accepts_file_urls() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("file://{}", dir.path().display());
        assert_eq!(local_path(&url).as_deref(), Some(dir.path()));
        assert!(local_path("https://example.com/repo.git").is_none());
    }

    #[test]
    fn fast_forward_detection() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let c1 = commit_file(&repo, "a", "1", "c1");
        let c2 = commit_file(&repo, "a", "2", "c2");
        assert!(fast_forwards(&repo, c1, c2).unwrap());
        assert!(!fast_forwards(&repo, c2, c1).unwrap());
        assert!(fast_forwards(&repo, c2, c2).unwrap());
    }

    #[test]
    fn remote_heads_of_local_path() {
        let remote_dir = tempfile::tempdir().unwrap();
        let remote = Repository::init(remote_dir.path()).unwrap();
        let tip = commit_file(&remote, "a", "1", "c1");

        let local_dir = tempfile::tempdir().unwrap();
        let local = Repository::init(local_dir.path()).unwrap();
        local
            .remote("work", &remote_dir.path().to_string_lossy())
            .unwrap();

        let heads = remote_heads(&local, "work").unwrap();
        assert_eq!(heads.len(), 1);
        assert_eq!(heads[0].1, tip);
    }
}
