//! Branch and remote name validation following git-style conventions.
//!
//! Valid branch names:
//! - Must be non-empty
//! - Must not contain whitespace, `~`, `^`, `:`, `?`, `*`, `[`, `\`
//! - Must not contain `..` (double dot) or `@{`
//! - Must not start or end with `/`, nor end with `.` or `.lock`
//! - Components between slashes must be non-empty and not start with `.`
//!
//! Branch names arrive from both replicas, so a name that one side accepted
//! is still checked before it is used to build refspecs for the other.

use crate::error::{RepoError, RepoResult};

/// Characters that are forbidden anywhere in a branch or remote name.
const FORBIDDEN_CHARS: &[char] = &[' ', '\t', '\n', '\r', '~', '^', ':', '?', '*', '[', '\\'];

fn invalid(name: &str, reason: impl Into<String>) -> RepoError {
    RepoError::InvalidName {
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn check_forbidden_chars(name: &str) -> RepoResult<()> {
    match name.chars().find(|ch| FORBIDDEN_CHARS.contains(ch)) {
        Some(ch) => Err(invalid(name, format!("contains forbidden character: {ch:?}"))),
        None => Ok(()),
    }
}

/// Validate a branch name, returning `Ok(())` if valid.
///
/// # Examples
///
/// ```
/// use bsync_repo::names::validate_branch_name;
///
/// assert!(validate_branch_name("main").is_ok());
/// assert!(validate_branch_name("feature/auth").is_ok());
/// assert!(validate_branch_name("").is_err());
/// assert!(validate_branch_name("bad..name").is_err());
/// ```
pub fn validate_branch_name(name: &str) -> RepoResult<()> {
    if name.is_empty() {
        return Err(invalid(name, "branch name must not be empty"));
    }
    check_forbidden_chars(name)?;

    if name.contains("..") {
        return Err(invalid(name, "must not contain '..'"));
    }
    if name.contains("@{") {
        return Err(invalid(name, "must not contain '@{'"));
    }
    if name.ends_with('.') {
        return Err(invalid(name, "must not end with '.'"));
    }
    if name.starts_with('/') || name.ends_with('/') {
        return Err(invalid(name, "must not start or end with '/'"));
    }
    if name.ends_with(".lock") {
        return Err(invalid(name, "must not end with '.lock'"));
    }

    for component in name.split('/') {
        if component.is_empty() {
            return Err(invalid(name, "path components must not be empty"));
        }
        if component.starts_with('.') {
            return Err(invalid(
                name,
                format!("component must not start with '.': {component:?}"),
            ));
        }
    }

    Ok(())
}

/// Validate a remote name. Must be a simple identifier (no slashes).
///
/// Remote names double as location names from the configuration file
/// (`work`, `home`), so they follow the same character rules as branches.
pub fn validate_remote_name(name: &str) -> RepoResult<()> {
    if name.is_empty() {
        return Err(invalid(name, "remote name must not be empty"));
    }
    if name.contains('/') {
        return Err(invalid(name, "remote name must not contain '/'"));
    }
    if name.starts_with('.') || name.contains("..") {
        return Err(invalid(name, "remote name must not start with '.' or contain '..'"));
    }
    check_forbidden_chars(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_branch_names() {
        for name in ["main", "develop", "v1.0", "feature/auth", "user/alice/fix-123"] {
            assert!(validate_branch_name(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn reject_empty_and_traversal() {
        assert!(validate_branch_name("").is_err());
        assert!(validate_branch_name("bad..name").is_err());
        assert!(validate_branch_name("ref@{0}").is_err());
    }

    #[test]
    fn reject_forbidden_chars() {
        for name in ["has space", "a~b", "a^b", "a:b", "a?b", "a*b", "a[b", "a\\b"] {
            let err = validate_branch_name(name).unwrap_err();
            assert!(
                matches!(err, RepoError::InvalidName { .. }),
                "expected InvalidName for {name:?}, got: {err}"
            );
        }
    }

    #[test]
    fn reject_bad_boundaries() {
        assert!(validate_branch_name(".hidden").is_err());
        assert!(validate_branch_name("trailing.").is_err());
        assert!(validate_branch_name("/leading").is_err());
        assert!(validate_branch_name("trailing/").is_err());
        assert!(validate_branch_name("a//b").is_err());
        assert!(validate_branch_name("main.lock").is_err());
        assert!(validate_branch_name("feature/.hidden").is_err());
    }

    #[test]
    fn remote_names() {
        assert!(validate_remote_name("work").is_ok());
        assert!(validate_remote_name("home-nas").is_ok());
        assert!(validate_remote_name("").is_err());
        assert!(validate_remote_name("a/b").is_err());
        assert!(validate_remote_name("my remote").is_err());
        assert!(validate_remote_name(".hidden").is_err());
    }
}
