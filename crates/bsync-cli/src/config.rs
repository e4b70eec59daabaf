//! The `bsync.toml` config file.
//!
//! ```toml
//! default_location = "work"
//!
//! [locations]
//! work = "/mnt/work/git"
//! home = "/media/usb/git"
//!
//! [sync]
//! prefetch = true
//! mirror_remotes = false
//! reset_on_resync = true
//! bare_remote = false
//!
//! [folder_sync]
//! program = "/usr/bin/FreeFileSync"
//! template = "~/.config/bsync/template.ffs_batch"
//! ```

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_ENV: &str = "BSYNC_CONFIG";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Location used when `--location` is not given.
    pub default_location: String,
    /// Location name to remote root.
    pub locations: BTreeMap<String, String>,
    pub sync: SyncSettings,
    pub folder_sync: FolderSyncSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_location: "work".to_string(),
            locations: BTreeMap::new(),
            sync: SyncSettings::default(),
            folder_sync: FolderSyncSettings::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Fetch the sync remote once before reconciling branches.
    pub prefetch: bool,
    /// Copy other remotes between the two replicas.
    pub mirror_remotes: bool,
    /// Hard-reset the active branch after a guarded transfer.
    pub reset_on_resync: bool,
    /// Initialize a missing remote replica as a bare repository.
    pub bare_remote: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            prefetch: true,
            mirror_remotes: false,
            reset_on_resync: true,
            bare_remote: false,
        }
    }
}

/// External folder-sync program run for each project's auxiliary directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FolderSyncSettings {
    pub enabled: bool,
    pub program: Option<PathBuf>,
    /// Batch template; `%LOCAL%` and `%REMOTE%` are replaced by the project
    /// paths.
    pub template: Option<PathBuf>,
    /// Directory inside the local project whose presence triggers the sync.
    pub aux_dir: String,
    /// File name of the generated batch file.
    pub batch_name: String,
}

impl Default for FolderSyncSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            program: None,
            template: None,
            aux_dir: ".devel".to_string(),
            batch_name: "gitDevel.ffs_batch".to_string(),
        }
    }
}

impl Config {
    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).context("invalid config")
    }

    /// Load `path`, or the built-in defaults when no path is given.
    pub fn load_from(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        Self::from_toml(&contents).with_context(|| format!("in {}", path.display()))
    }

    /// Load the file named by `--config`, else by `$BSYNC_CONFIG`.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let from_env = env::var_os(CONFIG_ENV).map(PathBuf::from);
        Self::load_from(explicit.or(from_env.as_deref()))
    }

    /// The remote root for this run: `override_root` if given, else the root
    /// configured for `location` (or the default location).
    pub fn remote_root(&self, location: Option<&str>, override_root: Option<&str>) -> anyhow::Result<String> {
        if let Some(root) = override_root {
            return Ok(root.to_string());
        }
        let location = location.unwrap_or(&self.default_location);
        match self.locations.get(location) {
            Some(root) => Ok(root.clone()),
            None if self.locations.is_empty() => {
                bail!("no remote root for location {location}: pass --remote-root or configure [locations]")
            }
            None => {
                let known: Vec<&str> = self.locations.keys().map(String::as_str).collect();
                bail!("unknown location {location} (known: {})", known.join(", "))
            }
        }
    }

    /// The location name the sync remote is called by.
    pub fn location<'a>(&'a self, location: Option<&'a str>) -> &'a str {
        location.unwrap_or(&self.default_location)
    }
}
