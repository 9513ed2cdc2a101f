//! Source-to-backup path mapping
//!
//! Event sources report absolute paths. [`relativize`] strips the watched root
//! from such a path so the remainder can be joined onto a backup root.

use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

/// Returns `path` relative to `root`.
///
/// The prefix test is component-wise, so `/data/ab` is *not* considered to be
/// under `/data/a` and trailing separators on either side are irrelevant.
///
/// A path outside `root` is returned unchanged and a warning is logged: it means
/// the event source and the configured root disagree, which is not fatal.
pub fn relativize(path: &Path, root: &Path) -> PathBuf {
    match path.strip_prefix(root) {
        Ok(relative) => {
            debug!(path = %path.display(), relative = %relative.display(), "Relativized path");
            relative.to_path_buf()
        }
        Err(_) => {
            warn!(
                path = %path.display(),
                root = %root.display(),
                "Path is not under the watched root, using it as-is"
            );
            path.to_path_buf()
        }
    }
}

/// Joins a relativized path onto `base` without letting it escape.
///
/// [`Path::join`] replaces the base when given an absolute path; a path that
/// fell through [`relativize`] unchanged is still absolute, so its root
/// component is dropped here.
pub fn join_relative(base: &Path, relative: &Path) -> PathBuf {
    let mut joined = base.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            other => joined.push(other.as_os_str()),
        }
    }
    joined
}
