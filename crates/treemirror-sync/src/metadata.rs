//! Copy and metadata helpers for backup entries
//!
//! Every helper works on the entry itself and never follows a symbolic link:
//! a symlink in the live tree is mirrored as a symlink, and its ownership and
//! timestamps are applied to the link, not to its target.
//!
//! These return plain [`io::Result`]s; the engine decides which failures are
//! races and which are fatal.

use std::fs::{self, Metadata};
use std::io;
use std::os::unix::fs::{lchown, symlink, MetadataExt};
use std::path::Path;

use filetime::{set_file_times, set_symlink_file_times, FileTime};
use tracing::debug;

/// Owner and group ids of a filesystem entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ownership {
    pub uid: u32,
    pub gid: u32,
}

impl Ownership {
    /// Reads the ownership recorded in `metadata`
    pub fn of(metadata: &Metadata) -> Self {
        Self {
            uid: metadata.uid(),
            gid: metadata.gid(),
        }
    }

    /// Reads the ownership of `path` without following a final symlink
    pub fn read(path: &Path) -> io::Result<Self> {
        fs::symlink_metadata(path).map(|m| Self::of(&m))
    }
}

/// Sets the owner and group of `path` without following a final symlink.
pub fn apply_ownership(path: &Path, ownership: Ownership) -> io::Result<()> {
    debug!(
        path = %path.display(),
        uid = ownership.uid,
        gid = ownership.gid,
        "Setting UID:GID"
    );
    lchown(path, Some(ownership.uid), Some(ownership.gid))
}

/// Copies the access and modification times from `metadata` onto `dest`.
fn apply_times(dest: &Path, metadata: &Metadata) -> io::Result<()> {
    let accessed = FileTime::from_last_access_time(metadata);
    let modified = FileTime::from_last_modification_time(metadata);

    if metadata.file_type().is_symlink() {
        set_symlink_file_times(dest, accessed, modified)
    } else {
        set_file_times(dest, accessed, modified)
    }
}

/// Removes whatever is at `path`, recursing into directories.
///
/// A missing entry is not an error.
pub fn remove_entry(path: &Path) -> io::Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Ensures `dest` can be overwritten by a regular file.
///
/// A regular file may stay (it is truncated by the copy). A symlink is
/// removed so the copy does not write through it; a directory is removed
/// because the entry changed type in the live tree.
fn clear_for_file(dest: &Path) -> io::Result<()> {
    match fs::symlink_metadata(dest) {
        Ok(m) if m.is_file() => Ok(()),
        Ok(_) => remove_entry(dest),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Creates missing parent directories of `dest`.
pub fn ensure_parent(dest: &Path) -> io::Result<()> {
    match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Creates the directory `dest` and any missing ancestors.
///
/// Idempotent. A non-directory already at `dest` is replaced.
pub fn create_directory(dest: &Path) -> io::Result<()> {
    match fs::symlink_metadata(dest) {
        Ok(m) if m.is_dir() => return Ok(()),
        Ok(_) => fs::remove_file(dest)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    fs::create_dir_all(dest)
}

/// Copies the regular file `source` to `dest`, with permission bits and
/// timestamps. `metadata` is the `lstat` of `source`.
pub fn copy_file(source: &Path, dest: &Path, metadata: &Metadata) -> io::Result<()> {
    clear_for_file(dest)?;
    let bytes = fs::copy(source, dest)?;
    debug!(
        source = %source.display(),
        dest = %dest.display(),
        bytes,
        "Copied file contents"
    );
    apply_times(dest, metadata)
}

/// Recreates the symlink `source` at `dest` with the same target.
///
/// Whatever was at `dest` before is replaced. `metadata` is the `lstat` of
/// `source`.
pub fn copy_symlink(source: &Path, dest: &Path, metadata: &Metadata) -> io::Result<()> {
    let target = fs::read_link(source)?;
    remove_entry(dest)?;
    symlink(&target, dest)?;
    debug!(
        source = %source.display(),
        dest = %dest.display(),
        target = %target.display(),
        "Recreated symlink"
    );
    apply_times(dest, metadata)
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_ownership_read_matches_metadata() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, b"x").unwrap();

        let meta = fs::symlink_metadata(&path).unwrap();
        let owner = Ownership::read(&path).unwrap();
        assert_eq!(owner.uid, meta.uid());
        assert_eq!(owner.gid, meta.gid());
    }

    #[test]
    fn test_apply_ownership_to_current_owner() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, b"x").unwrap();

        // Re-applying the current owner is allowed for unprivileged users
        let owner = Ownership::read(&path).unwrap();
        apply_ownership(&path, owner).unwrap();
        assert_eq!(Ownership::read(&path).unwrap(), owner);
    }

    #[test]
    fn test_copy_file_preserves_content_mode_and_mtime() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("src.db");
        let dest = dir.path().join("dst.db");
        fs::write(&source, b"sqlite pages").unwrap();
        fs::set_permissions(&source, fs::Permissions::from_mode(0o640)).unwrap();
        let mtime = FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&source, mtime).unwrap();

        let meta = fs::symlink_metadata(&source).unwrap();
        copy_file(&source, &dest, &meta).unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"sqlite pages");
        let dest_meta = fs::metadata(&dest).unwrap();
        assert_eq!(dest_meta.permissions().mode() & 0o777, 0o640);
        assert_eq!(FileTime::from_last_modification_time(&dest_meta), mtime);
    }

    #[test]
    fn test_copy_file_does_not_write_through_symlink() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("src");
        let victim = dir.path().join("victim");
        let dest = dir.path().join("dst");
        fs::write(&source, b"new").unwrap();
        fs::write(&victim, b"untouched").unwrap();
        symlink(&victim, &dest).unwrap();

        let meta = fs::symlink_metadata(&source).unwrap();
        copy_file(&source, &dest, &meta).unwrap();

        assert_eq!(fs::read(&victim).unwrap(), b"untouched");
        assert!(fs::symlink_metadata(&dest).unwrap().is_file());
        assert_eq!(fs::read(&dest).unwrap(), b"new");
    }

    #[test]
    fn test_copy_file_replaces_directory() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("src");
        let dest = dir.path().join("dst");
        fs::write(&source, b"file now").unwrap();
        fs::create_dir_all(dest.join("inner")).unwrap();

        let meta = fs::symlink_metadata(&source).unwrap();
        copy_file(&source, &dest, &meta).unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"file now");
    }

    #[test]
    fn test_copy_file_missing_source_is_not_found() {
        let dir = TempDir::new().unwrap();
        let present = dir.path().join("present");
        fs::write(&present, b"x").unwrap();
        let meta = fs::symlink_metadata(&present).unwrap();

        let err = copy_file(&dir.path().join("gone"), &dir.path().join("dst"), &meta).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_copy_symlink_keeps_link() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("target");
        let source = dir.path().join("link");
        let dest = dir.path().join("copy");
        fs::write(&target, b"data").unwrap();
        symlink("target", &source).unwrap();
        fs::write(&dest, b"stale").unwrap();

        let meta = fs::symlink_metadata(&source).unwrap();
        copy_symlink(&source, &dest, &meta).unwrap();

        let dest_meta = fs::symlink_metadata(&dest).unwrap();
        assert!(dest_meta.file_type().is_symlink());
        assert_eq!(fs::read_link(&dest).unwrap(), Path::new("target"));
    }

    #[test]
    fn test_copy_dangling_symlink() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("link");
        let dest = dir.path().join("copy");
        symlink("/nonexistent/target", &source).unwrap();

        let meta = fs::symlink_metadata(&source).unwrap();
        copy_symlink(&source, &dest, &meta).unwrap();

        assert_eq!(
            fs::read_link(&dest).unwrap(),
            Path::new("/nonexistent/target")
        );
    }

    #[test]
    fn test_create_directory_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/c");

        create_directory(&path).unwrap();
        create_directory(&path).unwrap();
        assert!(path.is_dir());
    }

    #[test]
    fn test_create_directory_replaces_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a");
        fs::write(&path, b"was a file").unwrap();

        create_directory(&path).unwrap();
        assert!(path.is_dir());
    }

    #[test]
    fn test_remove_entry() {
        let dir = TempDir::new().unwrap();
        let tree = dir.path().join("tree");
        fs::create_dir_all(tree.join("x/y")).unwrap();
        fs::write(tree.join("x/y/z"), b"z").unwrap();
        let file = dir.path().join("file");
        fs::write(&file, b"f").unwrap();

        remove_entry(&tree).unwrap();
        remove_entry(&file).unwrap();
        remove_entry(&dir.path().join("missing")).unwrap();

        assert!(!tree.exists());
        assert!(!file.exists());
    }

    #[test]
    fn test_ensure_parent() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("p/q/file");

        ensure_parent(&dest).unwrap();
        assert!(dir.path().join("p/q").is_dir());
        assert!(!dest.exists());
    }
}
