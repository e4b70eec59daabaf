//! Request-scoped settings passed explicitly to the engine, guard and
//! reconciler.

use serde::{Deserialize, Serialize};

/// Settings for one synchronization run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncContext {
    /// Name of the remote, inside the local repository, that designates the
    /// synchronization partner (`work`, `home`).
    pub target: String,
    /// Perform read-only queries only.
    pub dry_run: bool,
    /// Hard-reset the active branch to its tip after a guarded transfer.
    pub reset_on_resync: bool,
    /// Fetch every head of the target once before reconciling branches.
    pub prefetch: bool,
    /// Copy remotes configured on one side only to the other side.
    pub mirror_remotes: bool,
    /// Initialize a missing remote side as a bare repository.
    pub bare_remote: bool,
}

impl SyncContext {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            dry_run: false,
            reset_on_resync: true,
            prefetch: true,
            mirror_remotes: false,
            bare_remote: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_reset_on_resync(mut self, reset: bool) -> Self {
        self.reset_on_resync = reset;
        self
    }

    pub fn with_prefetch(mut self, prefetch: bool) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn with_mirror_remotes(mut self, mirror: bool) -> Self {
        self.mirror_remotes = mirror;
        self
    }

    pub fn with_bare_remote(mut self, bare: bool) -> Self {
        self.bare_remote = bare;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let ctx = SyncContext::new("work");
        assert_eq!(ctx.target, "work");
        assert!(!ctx.dry_run);
        assert!(ctx.reset_on_resync);
        assert!(ctx.prefetch);
        assert!(!ctx.mirror_remotes);
        assert!(!ctx.bare_remote);
    }

    #[test]
    fn builders_override() {
        let ctx = SyncContext::new("home")
            .with_dry_run(true)
            .with_prefetch(false)
            .with_bare_remote(true);
        assert!(ctx.dry_run && !ctx.prefetch && ctx.bare_remote);
    }
}
