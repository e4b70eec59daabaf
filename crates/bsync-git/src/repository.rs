//! [`GitRepository`]: the repository handle contract over libgit2.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use bsync_repo::{
    validate_branch_name, validate_remote_name, CommitId, FetchSummary, Lookup, PushSummary,
    RefFlag, RefUpdate, Remote, RepoError, RepoResult, RepositoryHandle,
};
use git2::{
    AutotagOption, BranchType, ErrorCode, Oid, Repository, ResetType, Signature, StashFlags,
    StatusOptions,
};
use tracing::{debug, info};

use crate::error::{GitError, GitResult};
use crate::{stash, transport, worktree};

/// A libgit2 repository behind the [`RepositoryHandle`] contract.
///
/// `git2::Repository` is `Send` but not `Sync`; the handle serializes access
/// through a mutex so it can be shared like any other handle.
pub struct GitRepository {
    location: String,
    repo: Mutex<Repository>,
}

impl std::fmt::Debug for GitRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRepository")
            .field("location", &self.location)
            .finish()
    }
}

fn to_commit_id(oid: Oid) -> CommitId {
    CommitId::new(oid.to_string())
}

fn to_oid(id: &CommitId) -> GitResult<Oid> {
    Oid::from_str(id.as_str()).map_err(|_| GitError::NotFound(format!("commit {id}")))
}

fn signature(repo: &Repository) -> GitResult<Signature<'static>> {
    match repo.signature() {
        Ok(sig) => Ok(sig),
        Err(_) => Ok(Signature::now("bsync", "bsync@localhost")?),
    }
}

impl GitRepository {
    /// Wrap an already opened repository.
    pub fn new(location: impl Into<String>, repo: Repository) -> Self {
        Self {
            location: location.into(),
            repo: Mutex::new(repo),
        }
    }

    fn lock(&self) -> GitResult<MutexGuard<'_, Repository>> {
        self.repo
            .lock()
            .map_err(|e| GitError::Poisoned(e.to_string()))
    }

    /// Run `f` against the locked repository, mapping binding errors onto the
    /// contract taxonomy.
    fn with_repo<T>(&self, f: impl FnOnce(&mut Repository) -> GitResult<T>) -> RepoResult<T> {
        let mut repo = self.lock()?;
        Ok(f(&mut repo)?)
    }

    fn require_worktree(repo: &Repository, op: &str) -> GitResult<()> {
        if repo.is_bare() {
            return Err(GitError::Unsupported(format!("{op} requires a working tree")));
        }
        Ok(())
    }

    fn local_tip(repo: &Repository, name: &str) -> GitResult<Option<Oid>> {
        match repo.find_branch(name, BranchType::Local) {
            Ok(branch) => Ok(Some(branch.get().peel_to_commit()?.id())),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remote_url(repo: &Repository, remote: &str) -> GitResult<String> {
        let handle = repo.find_remote(remote).map_err(|e| match e.code() {
            ErrorCode::NotFound => GitError::NotFound(format!("remote {remote}")),
            _ => e.into(),
        })?;
        handle
            .url()
            .map(str::to_string)
            .ok_or_else(|| GitError::NotFound(format!("url of remote {remote}")))
    }

    /// Bring over the tags of `remote` that point into `tip`'s history and
    /// differ locally. A dry run only lists them; ancestry is then judged in
    /// the remote itself when it is a local path, since the new objects are
    /// not here yet.
    fn fetch_tags(repo: &Repository, remote: &str, tip: Oid, dry_run: bool) -> GitResult<Vec<RefUpdate>> {
        let url = Self::remote_url(repo, remote)?;
        let source = match transport::local_path(&url) {
            Some(path) if dry_run => Some(Repository::open(path).map_err(GitError::transport)?),
            _ => None,
        };
        let judge = source.as_ref().unwrap_or(repo);

        let mut wanted = Vec::new();
        for tag in transport::remote_tags(repo, remote)? {
            let old = repo.refname_to_id(&tag.name).ok();
            if old == Some(tag.target) || !transport::fast_forwards(judge, tag.commit, tip)? {
                continue;
            }
            wanted.push((tag, old));
        }

        if !dry_run && !wanted.is_empty() {
            let refspecs: Vec<String> = wanted
                .iter()
                .map(|(tag, _)| format!("+{0}:{0}", tag.name))
                .collect();
            let mut options = transport::fetch_options(repo);
            options.download_tags(AutotagOption::None);
            repo.find_remote(remote)?
                .fetch(&refspecs, Some(&mut options), None)
                .map_err(GitError::transport)?;
        }

        Ok(wanted
            .into_iter()
            .map(|(tag, old)| RefUpdate::tag(tag.name, old.map(to_commit_id), to_commit_id(tag.target)))
            .collect())
    }

    /// Annotated tags reachable from `tip` that `remote` lacks, as
    /// `push --follow-tags` picks them. A tag the remote holds with another
    /// value comes back as a rejected update and is not pushed.
    fn follow_tags(repo: &Repository, remote: &str, tip: Oid) -> GitResult<(Vec<String>, Vec<RefUpdate>)> {
        let theirs: HashMap<String, Oid> = transport::remote_tags(repo, remote)?
            .into_iter()
            .map(|tag| (tag.name, tag.target))
            .collect();

        let mut push = Vec::new();
        let mut updates = Vec::new();
        for tag in transport::local_tags(repo)? {
            if !tag.is_annotated() || !transport::fast_forwards(repo, tag.commit, tip)? {
                continue;
            }
            match theirs.get(&tag.name) {
                Some(target) if *target == tag.target => {}
                Some(target) => updates.push(RefUpdate::rejected(
                    tag.name,
                    Some(to_commit_id(*target)),
                    Some(to_commit_id(tag.target)),
                )),
                None => {
                    updates.push(RefUpdate::tag(tag.name.clone(), None, to_commit_id(tag.target)));
                    push.push(tag.name);
                }
            }
        }
        Ok((push, updates))
    }

    /// Symbolic target of HEAD as a short branch name.
    fn head_branch(repo: &Repository) -> GitResult<Option<String>> {
        let head = repo.find_reference("HEAD")?;
        Ok(head
            .symbolic_target()
            .and_then(|target| target.strip_prefix("refs/heads/"))
            .map(str::to_string))
    }
}

impl RepositoryHandle for GitRepository {
    fn location(&self) -> &str {
        &self.location
    }

    fn is_bare(&self) -> RepoResult<bool> {
        self.with_repo(|repo| Ok(repo.is_bare()))
    }

    fn list_branches(&self) -> RepoResult<BTreeSet<String>> {
        self.with_repo(|repo| {
            let mut names = BTreeSet::new();
            for entry in repo.branches(Some(BranchType::Local))? {
                let (branch, _) = entry?;
                if let Some(name) = branch.name()? {
                    names.insert(name.to_string());
                }
            }
            Ok(names)
        })
    }

    fn branch_commit(&self, name: &str) -> RepoResult<CommitId> {
        self.with_repo(|repo| {
            Self::local_tip(repo, name)?
                .map(to_commit_id)
                .ok_or_else(|| GitError::NotFound(format!("branch {name}")))
        })
    }

    fn merge_base(&self, a: &CommitId, b: &CommitId) -> RepoResult<CommitId> {
        self.with_repo(|repo| {
            let (oa, ob) = (to_oid(a)?, to_oid(b)?);
            for (oid, id) in [(oa, a), (ob, b)] {
                if repo.find_commit(oid).is_err() {
                    return Err(GitError::NotFound(format!("commit {id}")));
                }
            }
            match repo.merge_base(oa, ob) {
                Ok(base) => Ok(to_commit_id(base)),
                Err(e) if e.code() == ErrorCode::NotFound => Err(RepoError::Unrelated {
                    a: a.to_string(),
                    b: b.to_string(),
                }
                .into()),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn is_dirty(&self) -> RepoResult<bool> {
        self.with_repo(|repo| {
            if repo.is_bare() {
                return Ok(false);
            }
            let mut options = StatusOptions::new();
            options
                .include_untracked(true)
                .recurse_untracked_dirs(true)
                .include_ignored(false);
            Ok(!repo.statuses(Some(&mut options))?.is_empty())
        })
    }

    fn active_branch(&self) -> RepoResult<Option<String>> {
        self.with_repo(|repo| Self::head_branch(repo))
    }

    fn stash_save(&self, include_untracked: bool) -> RepoResult<()> {
        self.with_repo(|repo| {
            Self::require_worktree(repo, "stash")?;
            let sig = signature(repo)?;
            let flags = if include_untracked {
                StashFlags::INCLUDE_UNTRACKED
            } else {
                StashFlags::DEFAULT
            };
            let oid = repo.stash_save(&sig, "bsync: saved before sync", Some(flags))?;
            debug!(stash = %oid, "saved working tree");
            Ok(())
        })
    }

    fn stash_apply_tracked(&self) -> RepoResult<()> {
        self.with_repo(|repo| {
            Self::require_worktree(repo, "stash apply")?;
            stash::apply_tracked(repo).map(|_| ())
        })
    }

    fn stash_apply_untracked(&self) -> RepoResult<()> {
        self.with_repo(|repo| {
            Self::require_worktree(repo, "stash apply")?;
            stash::apply_untracked(repo).map(|_| ())
        })
    }

    fn stash_drop(&self) -> RepoResult<()> {
        self.with_repo(|repo| {
            repo.stash_drop(0).map_err(|e| match e.code() {
                ErrorCode::NotFound => GitError::NotFound("stash@{0}".into()),
                _ => e.into(),
            })
        })
    }

    fn reset_head(&self, hard: bool) -> RepoResult<()> {
        self.with_repo(|repo| {
            Self::require_worktree(repo, "reset")?;
            let head = match repo.head() {
                Ok(head) => head,
                Err(e) if e.code() == ErrorCode::UnbornBranch => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            let commit = head.peel_to_commit()?;
            let kind = if hard { ResetType::Hard } else { ResetType::Mixed };
            repo.reset(commit.as_object(), kind, None)?;
            Ok(())
        })
    }

    fn fetch_branch(&self, remote: &str, name: &str, dry_run: bool) -> RepoResult<FetchSummary> {
        validate_branch_name(name)?;
        self.with_repo(|repo| {
            let refname = format!("refs/heads/{name}");
            let tracking = format!("refs/remotes/{remote}/{name}");
            let old = Self::local_tip(repo, name)?;

            let advertised = transport::remote_tip(repo, remote, name)?.ok_or_else(|| {
                GitError::Transport(format!("couldn't find remote ref {refname}"))
            })?;

            let new = if dry_run {
                advertised
            } else {
                let mut options = transport::fetch_options(repo);
                options.download_tags(AutotagOption::None);
                repo.find_remote(remote)?
                    .fetch(&[format!("+{refname}:{tracking}")], Some(&mut options), None)
                    .map_err(GitError::transport)?;
                repo.refname_to_id(&tracking)?
            };

            if let Some(old) = old {
                // Without the new objects a dry run cannot judge ancestry.
                let known = repo.find_commit(new).is_ok();
                if known && !transport::fast_forwards(repo, old, new)? {
                    return Err(GitError::Transport(format!(
                        "{refname}: rejected (non-fast-forward)"
                    )));
                }
            }

            if !dry_run && old != Some(new) {
                // Like `fetch --update-head-ok`: the checked-out branch moves,
                // its working tree does not.
                repo.reference(&refname, new, true, "bsync: fast-forward")?;
            }

            let tags = Self::fetch_tags(repo, remote, new, dry_run)?;

            let mut summary = FetchSummary::new(remote, dry_run);
            summary
                .updates
                .push(RefUpdate::classify(refname, old.map(to_commit_id), to_commit_id(new)));
            summary.updates.extend(tags);
            info!(remote, branch = name, dry_run, "fetched branch");
            Ok(summary)
        })
    }

    fn fetch_remote(&self, remote: &str, dry_run: bool) -> RepoResult<FetchSummary> {
        self.with_repo(|repo| {
            let heads = transport::remote_heads(repo, remote)?;
            let olds: Vec<Option<Oid>> = heads
                .iter()
                .map(|(refname, _)| {
                    let branch = refname.trim_start_matches("refs/heads/");
                    repo.refname_to_id(&format!("refs/remotes/{remote}/{branch}")).ok()
                })
                .collect();

            let tags_before: HashMap<String, Oid> = transport::local_tags(repo)?
                .into_iter()
                .map(|tag| (tag.name, tag.target))
                .collect();
            if !dry_run {
                let mut options = transport::fetch_options(repo);
                options.download_tags(AutotagOption::Auto);
                repo.find_remote(remote)?
                    .fetch(&[] as &[&str], Some(&mut options), None)
                    .map_err(GitError::transport)?;
            }

            let mut summary = FetchSummary::new(remote, dry_run);
            for ((refname, new), old) in heads.into_iter().zip(olds) {
                let branch = refname.trim_start_matches("refs/heads/");
                let mut update = RefUpdate::classify(
                    format!("refs/remotes/{remote}/{branch}"),
                    old.map(to_commit_id),
                    to_commit_id(new),
                );
                if let Some(old) = old {
                    let known = repo.find_commit(new).is_ok();
                    if known && !transport::fast_forwards(repo, old, new)? {
                        update.flags = vec![RefFlag::ForcedUpdate];
                    }
                }
                summary.updates.push(update);
            }
            // Tags that followed the fetched history; a dry run cannot tell.
            if !dry_run {
                for tag in transport::local_tags(repo)? {
                    let old = tags_before.get(&tag.name).copied();
                    if old != Some(tag.target) {
                        summary.updates.push(RefUpdate::tag(
                            tag.name,
                            old.map(to_commit_id),
                            to_commit_id(tag.target),
                        ));
                    }
                }
            }
            Ok(summary)
        })
    }

    fn push_branch(&self, remote: &str, name: &str, dry_run: bool) -> RepoResult<PushSummary> {
        validate_branch_name(name)?;
        self.with_repo(|repo| {
            let refname = format!("refs/heads/{name}");
            let new = Self::local_tip(repo, name)?
                .ok_or_else(|| GitError::NotFound(format!("branch {name}")))?;
            let url = Self::remote_url(repo, remote)?;
            let (tags, tag_updates) = Self::follow_tags(repo, remote, new)?;

            let old = match transport::local_path(&url) {
                Some(path) => transport::deliver_local(repo, &path, name, new, &tags, dry_run)?,
                None => {
                    let old = transport::remote_tip(repo, remote, name)?;
                    if let Some(old) = old {
                        if !transport::fast_forwards(repo, old, new)? {
                            return Err(GitError::Transport(format!(
                                "{refname}: rejected (non-fast-forward)"
                            )));
                        }
                    }
                    if !dry_run && (old != Some(new) || !tags.is_empty()) {
                        transport::push_network(repo, remote, name, &tags)?;
                    }
                    old
                }
            };

            if !dry_run {
                repo.reference(
                    &format!("refs/remotes/{remote}/{name}"),
                    new,
                    true,
                    "bsync: push",
                )?;
            }

            let mut summary = PushSummary::new(remote, dry_run);
            summary
                .updates
                .push(RefUpdate::classify(refname, old.map(to_commit_id), to_commit_id(new)));
            summary.updates.extend(tag_updates);
            info!(remote, branch = name, dry_run, tags = tags.len(), "pushed branch");
            Ok(summary)
        })
    }

    fn find_remote(&self, name: &str) -> RepoResult<Lookup<String>> {
        validate_remote_name(name)?;
        self.with_repo(|repo| match Self::remote_url(repo, name) {
            Ok(url) => Ok(Lookup::Found(url)),
            Err(GitError::NotFound(_)) => Ok(Lookup::Absent),
            Err(e) => Err(e),
        })
    }

    fn remotes(&self) -> RepoResult<Vec<Remote>> {
        self.with_repo(|repo| {
            let mut remotes = Vec::new();
            for name in repo.remotes()?.iter().flatten() {
                if let Ok(url) = Self::remote_url(repo, name) {
                    remotes.push(Remote::new(name, url));
                }
            }
            remotes.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(remotes)
        })
    }

    fn create_remote(&self, name: &str, url: &str) -> RepoResult<()> {
        validate_remote_name(name)?;
        self.with_repo(|repo| {
            if repo.find_remote(name).is_ok() {
                return Err(RepoError::RemoteExists {
                    name: name.to_string(),
                }
                .into());
            }
            repo.remote(name, url)?;
            debug!(remote = name, url, "created remote");
            Ok(())
        })
    }

    fn set_remote_url(&self, name: &str, url: &str) -> RepoResult<()> {
        validate_remote_name(name)?;
        self.with_repo(|repo| {
            Self::remote_url(repo, name)?;
            repo.remote_set_url(name, url)?;
            debug!(remote = name, url, "corrected remote url");
            Ok(())
        })
    }

    fn set_receive_update_instead(&self) -> RepoResult<()> {
        self.with_repo(|repo| {
            repo.config()?
                .set_str("receive.denyCurrentBranch", "updateInstead")?;
            Ok(())
        })
    }

    fn create_branch(&self, name: &str, from: &CommitId, track_remote: Option<&str>) -> RepoResult<()> {
        validate_branch_name(name)?;
        self.with_repo(|repo| {
            if Self::local_tip(repo, name)?.is_some() {
                return Err(RepoError::BranchExists {
                    name: name.to_string(),
                }
                .into());
            }
            let oid = to_oid(from)?;
            if repo.find_commit(oid).is_err() {
                if let Some(remote) = track_remote {
                    let mut options = transport::fetch_options(repo);
                    options.download_tags(AutotagOption::None);
                    repo.find_remote(remote)?
                        .fetch(
                            &[format!("+refs/heads/{name}:refs/remotes/{remote}/{name}")],
                            Some(&mut options),
                            None,
                        )
                        .map_err(GitError::transport)?;
                }
            }
            let commit = repo
                .find_commit(oid)
                .map_err(|_| GitError::NotFound(format!("commit {from}")))?;

            // The first branch of a fresh repository is HEAD's unborn branch.
            // Its files go in before the branch exists, so a collision with
            // files already on disk leaves the repository as it was.
            let is_head = Self::head_branch(repo)?.as_deref() == Some(name);
            if is_head && !repo.is_bare() {
                worktree::first_checkout(repo, oid)?;
            }

            let mut branch = repo.branch(name, &commit, false)?;
            if let Some(remote) = track_remote {
                let tracking = format!("refs/remotes/{remote}/{name}");
                if repo.find_reference(&tracking).is_err() {
                    repo.reference(&tracking, oid, false, "bsync: track")?;
                }
                branch.set_upstream(Some(&format!("{remote}/{name}")))?;
            }

            debug!(branch = name, from = %from.short(), "created branch");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::fixtures::{commit_file, read};

    struct Pair {
        _dirs: (tempfile::TempDir, tempfile::TempDir),
        local: GitRepository,
        remote: GitRepository,
        remote_path: String,
    }

    /// Two non-bare repositories, `local` configured with remote `work`.
    fn pair() -> Pair {
        let local_dir = tempfile::tempdir().unwrap();
        let remote_dir = tempfile::tempdir().unwrap();
        let remote_path = remote_dir.path().to_string_lossy().into_owned();
        let local = GitRepository::new(
            local_dir.path().to_string_lossy(),
            Repository::init(local_dir.path()).unwrap(),
        );
        let remote = GitRepository::new(
            remote_path.clone(),
            Repository::init(remote_dir.path()).unwrap(),
        );
        local.create_remote("work", &remote_path).unwrap();
        Pair {
            _dirs: (local_dir, remote_dir),
            local,
            remote,
            remote_path,
        }
    }

    fn commit(handle: &GitRepository, path: &str, contents: &str) -> CommitId {
        let repo = handle.lock().unwrap();
        to_commit_id(commit_file(&repo, path, contents, "commit"))
    }

    fn head_name(handle: &GitRepository) -> String {
        handle.active_branch().unwrap().expect("HEAD names a branch")
    }

    #[test]
    fn unborn_head_still_names_branch() {
        let p = pair();
        assert!(p.local.active_branch().unwrap().is_some());
        assert!(p.local.list_branches().unwrap().is_empty());
    }

    #[test]
    fn branches_and_tips() {
        let p = pair();
        let c1 = commit(&p.local, "a", "1");
        let head = head_name(&p.local);
        assert_eq!(p.local.branch_commit(&head).unwrap(), c1);
        assert!(p.local.list_branches().unwrap().contains(&head));
        assert!(p.local.branch_commit("missing").unwrap_err().is_not_found());
    }

    #[test]
    fn dirty_includes_untracked() {
        let p = pair();
        commit(&p.local, "a", "1");
        assert!(!p.local.is_dirty().unwrap());
        let workdir = p.local.lock().unwrap().workdir().unwrap().to_path_buf();
        fs::write(workdir.join("scratch.txt"), "x").unwrap();
        assert!(p.local.is_dirty().unwrap());
    }

    #[test]
    fn stash_guard_sequence_round_trips() {
        let p = pair();
        commit(&p.local, "a", "1");
        let workdir = p.local.lock().unwrap().workdir().unwrap().to_path_buf();
        fs::write(workdir.join("a"), "edited").unwrap();
        fs::write(workdir.join("untracked"), "u").unwrap();

        p.local.stash_save(true).unwrap();
        assert!(!p.local.is_dirty().unwrap());
        p.local.reset_head(true).unwrap();
        p.local.stash_apply_tracked().unwrap();
        p.local.stash_apply_untracked().unwrap();
        p.local.stash_drop().unwrap();
        p.local.reset_head(false).unwrap();

        let repo = p.local.lock().unwrap();
        assert_eq!(read(&repo, "a").as_deref(), Some("edited"));
        assert_eq!(read(&repo, "untracked").as_deref(), Some("u"));
        assert!(repo.refname_to_id("refs/stash").is_err());
    }

    #[test]
    fn merge_base_and_unrelated_histories() {
        let p = pair();
        let c1 = commit(&p.local, "a", "1");
        let c2 = commit(&p.local, "a", "2");
        assert_eq!(p.local.merge_base(&c1, &c2).unwrap(), c1);

        let other = commit(&p.remote, "b", "1");
        p.local.fetch_remote("work", false).unwrap();
        let err = p.local.merge_base(&c2, &other).unwrap_err();
        assert!(matches!(err, RepoError::Unrelated { .. }));
    }

    #[test]
    fn fetch_branch_fast_forwards_without_touching_worktree() {
        let p = pair();
        let c1 = commit(&p.remote, "a", "1");
        let head = head_name(&p.remote);
        p.local.create_branch(&head, &c1, Some("work")).unwrap();

        let c2 = commit(&p.remote, "a", "2");
        let summary = p.local.fetch_branch("work", &head, false).unwrap();
        assert_eq!(summary.updates[0].flags, vec![RefFlag::FastForward]);
        assert_eq!(p.local.branch_commit(&head).unwrap(), c2);

        let repo = p.local.lock().unwrap();
        assert_eq!(read(&repo, "a").as_deref(), Some("1"));
    }

    #[test]
    fn dry_run_fetch_reports_without_writing() {
        let p = pair();
        let c1 = commit(&p.remote, "a", "1");
        let head = head_name(&p.remote);
        let summary = p.local.fetch_branch("work", &head, true).unwrap();
        assert!(summary.dry_run);
        assert_eq!(summary.updates[0].new.as_ref(), Some(&c1));
        assert!(!p.local.has_branch(&head).unwrap());
    }

    #[test]
    fn push_into_checked_out_branch_needs_update_instead() {
        let p = pair();
        let c1 = commit(&p.remote, "a", "1");
        let head = head_name(&p.remote);
        p.local.create_branch(&head, &c1, Some("work")).unwrap();
        let c2 = commit(&p.local, "a", "2");

        let err = p.local.push_branch("work", &head, false).unwrap_err();
        assert!(err.is_transport());

        p.remote.set_receive_update_instead().unwrap();
        let summary = p.local.push_branch("work", &head, false).unwrap();
        assert_eq!(summary.updates[0].flags, vec![RefFlag::FastForward]);
        assert_eq!(p.remote.branch_commit(&head).unwrap(), c2);
        let remote = p.remote.lock().unwrap();
        assert_eq!(read(&remote, "a").as_deref(), Some("2"));
    }

    #[test]
    fn push_creates_missing_remote_branch() {
        let p = pair();
        let c1 = commit(&p.local, "f", "1");
        p.local.create_branch("feature", &c1, None).unwrap();
        let summary = p.local.push_branch("work", "feature", false).unwrap();
        assert_eq!(summary.updates[0].flags, vec![RefFlag::NewHead]);
        assert_eq!(p.remote.branch_commit("feature").unwrap(), c1);
        assert_eq!(p.remote.list_branches().unwrap().len(), 1);
    }

    #[test]
    fn dry_run_push_leaves_remote_alone() {
        let p = pair();
        commit(&p.local, "f", "1");
        let head = head_name(&p.local);
        p.local.push_branch("work", &head, true).unwrap();
        assert!(!p.remote.has_branch(&head).unwrap());
    }

    #[test]
    fn remote_lookup_and_correction() {
        let p = pair();
        assert_eq!(
            p.local.find_remote("work").unwrap(),
            Lookup::Found(p.remote_path.clone())
        );
        assert_eq!(p.local.find_remote("home").unwrap(), Lookup::Absent);
        p.local.set_remote_url("work", "/elsewhere").unwrap();
        assert_eq!(p.local.remotes().unwrap(), vec![Remote::new("work", "/elsewhere")]);
        assert!(matches!(
            p.local.create_remote("work", "/x").unwrap_err(),
            RepoError::RemoteExists { .. }
        ));
        assert!(p.local.set_remote_url("home", "/x").unwrap_err().is_not_found());
    }

    #[test]
    fn create_branch_fetches_missing_commit_and_checks_out_head() {
        let p = pair();
        let c1 = commit(&p.remote, "a", "1");
        let head = head_name(&p.remote);
        p.local.create_branch(&head, &c1, Some("work")).unwrap();
        assert_eq!(p.local.branch_commit(&head).unwrap(), c1);
        assert!(!p.local.is_dirty().unwrap());
        let repo = p.local.lock().unwrap();
        assert_eq!(read(&repo, "a").as_deref(), Some("1"));
    }

    #[test]
    fn create_branch_refuses_to_overwrite_untracked_files() {
        let p = pair();
        let c1 = commit(&p.remote, "notes.txt", "theirs");
        let head = head_name(&p.remote);
        let workdir = p.local.lock().unwrap().workdir().unwrap().to_path_buf();
        fs::write(workdir.join("notes.txt"), "mine").unwrap();

        let err = p.local.create_branch(&head, &c1, Some("work")).unwrap_err();
        assert!(matches!(err, RepoError::WouldOverwrite { ref paths } if paths == &["notes.txt"]));
        assert!(!p.local.has_branch(&head).unwrap());
        assert_eq!(fs::read_to_string(workdir.join("notes.txt")).unwrap(), "mine");
    }

    #[test]
    fn push_into_unborn_remote_head_populates_its_worktree() {
        let p = pair();
        let c1 = commit(&p.local, "f", "1");
        let head = head_name(&p.local);
        assert_eq!(head_name(&p.remote), head);

        let summary = p.local.push_branch("work", &head, false).unwrap();
        assert_eq!(summary.updates[0].flags, vec![RefFlag::NewHead]);
        assert_eq!(p.remote.branch_commit(&head).unwrap(), c1);
        assert!(!p.remote.is_dirty().unwrap());
        let remote = p.remote.lock().unwrap();
        assert_eq!(read(&remote, "f").as_deref(), Some("1"));
    }

    fn tag(handle: &GitRepository, name: &str, at: &CommitId, annotated: bool) -> Oid {
        let repo = handle.lock().unwrap();
        let object = repo.find_object(to_oid(at).unwrap(), None).unwrap();
        if annotated {
            let sig = Signature::now("fixture", "fixture@example.com").unwrap();
            repo.tag(name, &object, &sig, name, true).unwrap()
        } else {
            repo.tag_lightweight(name, &object, true).unwrap()
        }
    }

    #[test]
    fn fetch_branch_brings_tags_on_its_history() {
        let p = pair();
        let c1 = commit(&p.remote, "a", "1");
        let head = head_name(&p.remote);
        let v1 = tag(&p.remote, "v1", &c1, true);
        let light = tag(&p.remote, "light", &c1, false);

        let preview = p.local.fetch_branch("work", &head, true).unwrap();
        let mut tags: Vec<&str> = preview.updates.iter().filter(|u| u.is_tag()).map(|u| u.name.as_str()).collect();
        tags.sort_unstable();
        assert_eq!(tags, vec!["refs/tags/light", "refs/tags/v1"]);

        let summary = p.local.fetch_branch("work", &head, false).unwrap();
        let v1_update = summary.updates.iter().find(|u| u.name == "refs/tags/v1").unwrap();
        assert_eq!(v1_update.flags, vec![RefFlag::NewTag]);
        {
            let repo = p.local.lock().unwrap();
            assert_eq!(repo.refname_to_id("refs/tags/v1").unwrap(), v1);
            assert_eq!(repo.refname_to_id("refs/tags/light").unwrap(), light);
        }

        let c2 = commit(&p.remote, "a", "2");
        let moved = tag(&p.remote, "v1", &c2, true);
        let summary = p.local.fetch_branch("work", &head, false).unwrap();
        let v1_update = summary.updates.iter().find(|u| u.name == "refs/tags/v1").unwrap();
        assert_eq!(v1_update.flags, vec![RefFlag::TagUpdate]);
        assert!(summary.updates.iter().all(|u| u.name != "refs/tags/light"));
        let repo = p.local.lock().unwrap();
        assert_eq!(repo.refname_to_id("refs/tags/v1").unwrap(), moved);
    }

    #[test]
    fn push_follows_annotated_tags_only() {
        let p = pair();
        let c1 = commit(&p.local, "f", "1");
        let head = head_name(&p.local);
        let release = tag(&p.local, "release", &c1, true);
        tag(&p.local, "wip", &c1, false);

        let summary = p.local.push_branch("work", &head, false).unwrap();
        let tags: Vec<&RefUpdate> = summary.updates.iter().filter(|u| u.is_tag()).collect();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].name, "refs/tags/release");
        assert_eq!(tags[0].flags, vec![RefFlag::NewTag]);

        let remote = p.remote.lock().unwrap();
        assert_eq!(remote.refname_to_id("refs/tags/release").unwrap(), release);
        assert!(remote.refname_to_id("refs/tags/wip").is_err());
    }

    #[test]
    fn receive_update_instead_is_written_to_config() {
        let p = pair();
        p.remote.set_receive_update_instead().unwrap();
        let repo = p.remote.lock().unwrap();
        let value = repo.config().unwrap().get_string("receive.denyCurrentBranch").unwrap();
        assert_eq!(value, "updateInstead");
    }
}
