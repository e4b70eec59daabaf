//! Core value types shared by every repository handle.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Content-addressed identifier of a commit.
///
/// The address is kept as a lowercase hex string so that engines with
/// different hash widths (SHA-1, SHA-256, BLAKE3) share one representation.
/// Equality is by address, never by content.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(String);

impl CommitId {
    /// Wrap an already hex-encoded address.
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into().to_ascii_lowercase())
    }

    /// Build an address from raw hash bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(bytes))
    }

    /// The full hex address.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short hex representation (first 8 characters).
    pub fn short(&self) -> &str {
        let end = self.0.len().min(8);
        &self.0[..end]
    }
}

impl fmt::Debug for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommitId({})", self.short())
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of looking something up that may legitimately be missing.
///
/// Used instead of "try, and create on failure" so the absent path is an
/// explicit, testable branch rather than a swallowed error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    Absent,
}

impl<T> Lookup<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::Absent => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Found(value) => Lookup::Found(f(value)),
            Lookup::Absent => Lookup::Absent,
        }
    }
}

impl<T> From<Option<T>> for Lookup<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Lookup::Found(value),
            None => Lookup::Absent,
        }
    }
}

/// A remote configured inside a repository.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remote {
    pub name: String,
    pub url: String,
}

impl Remote {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Per-ref status flags reported by fetch and push.
///
/// Mirrors the flag table printed by `git fetch`; a single update may carry
/// several flags (a new head that is also the checked-out head, say).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefFlag {
    NewTag,
    NewHead,
    HeadUpToDate,
    TagUpdate,
    Rejected,
    ForcedUpdate,
    FastForward,
    Error,
}

impl RefFlag {
    pub fn label(&self) -> &'static str {
        match self {
            RefFlag::NewTag => "[new tag]",
            RefFlag::NewHead => "[new head]",
            RefFlag::HeadUpToDate => "[head uptodate]",
            RefFlag::TagUpdate => "[tag update]",
            RefFlag::Rejected => "[rejected]",
            RefFlag::ForcedUpdate => "[forced update]",
            RefFlag::FastForward => "[fast forward]",
            RefFlag::Error => "[error]",
        }
    }
}

impl fmt::Display for RefFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One ref touched (or, in a dry run, that would be touched) by a transfer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefUpdate {
    /// Canonical ref name, e.g. `refs/heads/main`.
    pub name: String,
    pub old: Option<CommitId>,
    pub new: Option<CommitId>,
    pub flags: Vec<RefFlag>,
}

impl RefUpdate {
    /// Classify a fast-forward style update from its old and new tips.
    pub fn classify(name: impl Into<String>, old: Option<CommitId>, new: CommitId) -> Self {
        let flags = match &old {
            None => vec![RefFlag::NewHead],
            Some(old) if *old == new => vec![RefFlag::HeadUpToDate],
            Some(_) => vec![RefFlag::FastForward],
        };
        Self {
            name: name.into(),
            old,
            new: Some(new),
            flags,
        }
    }

    /// A tag transferred alongside a branch. `new` is the object the tag
    /// ref names, which for annotated tags is the tag object itself.
    pub fn tag(name: impl Into<String>, old: Option<CommitId>, new: CommitId) -> Self {
        let flags = match &old {
            None => vec![RefFlag::NewTag],
            Some(old) if *old == new => Vec::new(),
            Some(_) => vec![RefFlag::TagUpdate],
        };
        Self {
            name: name.into(),
            old,
            new: Some(new),
            flags,
        }
    }

    pub fn is_tag(&self) -> bool {
        self.name.starts_with("refs/tags/")
    }

    pub fn rejected(name: impl Into<String>, old: Option<CommitId>, new: Option<CommitId>) -> Self {
        Self {
            name: name.into(),
            old,
            new,
            flags: vec![RefFlag::Rejected],
        }
    }

    pub fn has_flag(&self, flag: RefFlag) -> bool {
        self.flags.contains(&flag)
    }

    /// Space-separated flag labels, e.g. `[new head] [fast forward]`.
    pub fn flag_summary(&self) -> String {
        self.flags
            .iter()
            .map(RefFlag::label)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for RefUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let range = match (&self.old, &self.new) {
            (Some(old), Some(new)) if old != new => format!("{}..{}", old.short(), new.short()),
            (_, Some(new)) => new.short().to_string(),
            (Some(old), None) => old.short().to_string(),
            (None, None) => "-".to_string(),
        };
        write!(f, "{}: {} {}", self.name, self.flag_summary(), range)
    }
}

/// Result of fetching from a remote into the local repository.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchSummary {
    pub remote: String,
    pub updates: Vec<RefUpdate>,
    pub dry_run: bool,
}

impl FetchSummary {
    pub fn new(remote: impl Into<String>, dry_run: bool) -> Self {
        Self {
            remote: remote.into(),
            updates: Vec::new(),
            dry_run,
        }
    }

    /// `true` when no ref moved (or would move).
    pub fn is_up_to_date(&self) -> bool {
        self.updates
            .iter()
            .all(|u| u.has_flag(RefFlag::HeadUpToDate))
    }
}

/// Result of pushing a branch to a remote.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSummary {
    pub remote: String,
    pub updates: Vec<RefUpdate>,
    pub dry_run: bool,
}

impl PushSummary {
    pub fn new(remote: impl Into<String>, dry_run: bool) -> Self {
        Self {
            remote: remote.into(),
            updates: Vec::new(),
            dry_run,
        }
    }

    pub fn is_up_to_date(&self) -> bool {
        self.updates
            .iter()
            .all(|u| u.has_flag(RefFlag::HeadUpToDate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_id_short_and_display() {
        let id = CommitId::new("ABCDEF0123456789");
        assert_eq!(id.as_str(), "abcdef0123456789");
        assert_eq!(id.short(), "abcdef01");
        assert_eq!(id.to_string(), "abcdef0123456789");
        assert_eq!(format!("{id:?}"), "CommitId(abcdef01)");
    }

    #[test]
    fn commit_id_short_of_short_id() {
        let id = CommitId::new("abc");
        assert_eq!(id.short(), "abc");
    }

    #[test]
    fn commit_id_from_bytes() {
        let id = CommitId::from_bytes(&[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(id.as_str(), "deadbeef");
    }

    #[test]
    fn commit_id_serializes_transparently() {
        let id = CommitId::new("deadbeef");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"deadbeef\"");
    }

    #[test]
    fn lookup_conversions() {
        let found: Lookup<u8> = Some(3).into();
        assert!(found.is_found());
        assert_eq!(found.map(|v| v * 2).into_option(), Some(6));
        let absent: Lookup<u8> = None.into();
        assert!(!absent.is_found());
    }

    #[test]
    fn classify_updates() {
        let a = CommitId::new("aaaa");
        let b = CommitId::new("bbbb");
        let new_head = RefUpdate::classify("refs/heads/x", None, a.clone());
        assert_eq!(new_head.flags, vec![RefFlag::NewHead]);
        let same = RefUpdate::classify("refs/heads/x", Some(a.clone()), a.clone());
        assert!(same.has_flag(RefFlag::HeadUpToDate));
        let ff = RefUpdate::classify("refs/heads/x", Some(a), b);
        assert_eq!(ff.flag_summary(), "[fast forward]");
    }

    #[test]
    fn update_display_shows_range() {
        let ff = RefUpdate::classify(
            "refs/heads/main",
            Some(CommitId::new("1111111111")),
            CommitId::new("2222222222"),
        );
        assert_eq!(ff.to_string(), "refs/heads/main: [fast forward] 11111111..22222222");
    }

    #[test]
    fn summary_up_to_date() {
        let mut summary = FetchSummary::new("work", false);
        assert!(summary.is_up_to_date());
        summary.updates.push(RefUpdate::classify(
            "refs/heads/main",
            None,
            CommitId::new("abcd"),
        ));
        assert!(!summary.is_up_to_date());
    }
}
