//! Project enumeration.

use std::collections::BTreeSet;
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

/// Sorted union of the immediate, non-hidden sub-directories of `roots`.
///
/// A root that does not exist (or is not a directory, such as a URL)
/// contributes nothing.
pub fn discover(roots: &[&Path]) -> Vec<String> {
    let mut projects = BTreeSet::new();
    for root in roots {
        if !root.is_dir() {
            debug!(root = %root.display(), "not a directory, no projects listed");
            continue;
        }
        let entries = WalkDir::new(root)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!(error = %e, "skipping unreadable entry");
                    None
                }
            });
        for entry in entries {
            if !entry.file_type().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if name.starts_with('.') {
                continue;
            }
            projects.insert(name.into_owned());
        }
    }
    projects.into_iter().collect()
}
