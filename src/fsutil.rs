// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Atomic filesystem primitives.
//!
//! Every file the synchronizer writes goes through the write-to-temp-then-
//! rename strategy: content lands in a temporary file created in the target
//! file's own directory (so the rename never crosses a filesystem boundary),
//! permissions are set on the temporary file, and only then does it get
//! renamed into place. A crash mid-apply leaves either the old content or
//! the new content, never a truncated file.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

/// Atomically replace `path` with `content`.
///
/// Creates missing parent directories. On Unix the file mode is applied to
/// the temporary file before the rename, so the final file never exists
/// with interim permissions.
///
/// # Errors
///
/// - Return [`FsError::CreateDir`] if a parent directory cannot be created.
/// - Return [`FsError::Write`] if the temporary file cannot be created,
///   written, or renamed into place.
pub fn write_atomic(path: &Path, content: &[u8], mode: u32) -> Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    mkdirp::mkdirp(parent).map_err(|err| FsError::CreateDir {
        path: parent.to_path_buf(),
        source: err,
    })?;

    let wrap = |err: std::io::Error| FsError::Write {
        path: path.to_path_buf(),
        source: err,
    };

    let mut temp = tempfile::Builder::new()
        .prefix(".dotsmith-")
        .tempfile_in(parent)
        .map_err(wrap)?;
    temp.write_all(content).map_err(wrap)?;
    temp.as_file().sync_all().map_err(wrap)?;
    set_mode(temp.path(), mode).map_err(wrap)?;

    temp.persist(path).map_err(|err| FsError::Write {
        path: path.to_path_buf(),
        source: err.error,
    })?;

    Ok(())
}

/// Atomically replace `path` with a symlink pointing at `dest`.
///
/// The link is created under a temporary name in the same directory, then
/// renamed over the final path so an existing file or symlink is swapped
/// out in one step.
///
/// # Errors
///
/// - Return [`FsError::CreateDir`] if a parent directory cannot be created.
/// - Return [`FsError::Symlink`] if the link cannot be created or renamed.
pub fn symlink_atomic(path: &Path, dest: &Path) -> Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    mkdirp::mkdirp(parent).map_err(|err| FsError::CreateDir {
        path: parent.to_path_buf(),
        source: err,
    })?;

    let wrap = |err: std::io::Error| FsError::Symlink {
        path: path.to_path_buf(),
        source: err,
    };

    let temp = tempfile::Builder::new()
        .prefix(".dotsmith-")
        .make_in(parent, |temp| symlink(dest, temp))
        .map_err(wrap)?;

    // INVARIANT: The temporary link gets renamed away, so disarm tempfile's
    // delete-on-drop before it can chase the moved path.
    let temp_path = temp.into_temp_path();
    fs::rename(&temp_path, path).map_err(wrap)?;
    let _ = temp_path.keep();

    Ok(())
}

/// Ensure a directory exists with the requested mode.
///
/// # Errors
///
/// - Return [`FsError::CreateDir`] if the directory cannot be created or
///   its permissions cannot be set.
pub fn ensure_dir(path: &Path, mode: u32) -> Result<()> {
    let wrap = |err: std::io::Error| FsError::CreateDir {
        path: path.to_path_buf(),
        source: err,
    };

    mkdirp::mkdirp(path).map_err(wrap)?;
    set_mode(path, mode).map_err(wrap)?;

    Ok(())
}

/// Remove a file, symlink, or directory tree.
///
/// # Errors
///
/// - Return [`FsError::Remove`] if removal fails.
pub fn remove_any(path: &Path) -> Result<()> {
    let wrap = |err: std::io::Error| FsError::Remove {
        path: path.to_path_buf(),
        source: err,
    };

    let metadata = fs::symlink_metadata(path).map_err(wrap)?;
    if metadata.is_dir() {
        fs::remove_dir_all(path).map_err(wrap)
    } else {
        fs::remove_file(path).map_err(wrap)
    }
}

/// Set permission bits on a path.
///
/// # Errors
///
/// - Return [`FsError::SetMode`] if permissions cannot be changed.
pub fn chmod(path: &Path, mode: u32) -> Result<()> {
    set_mode(path, mode).map_err(|err| FsError::SetMode {
        path: path.to_path_buf(),
        source: err,
    })
}

/// Read permission bits of a path, if the platform tracks them.
pub fn read_mode(metadata: &fs::Metadata) -> Option<u32> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        Some(metadata.permissions().mode() & 0o7777)
    }
    #[cfg(not(unix))]
    {
        let _ = metadata;
        None
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn symlink(dest: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(dest, link)
}

#[cfg(not(unix))]
fn symlink(_dest: &Path, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::other("symlinks are not supported here"))
}

/// Filesystem primitive error types.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    /// Directory creation failed.
    #[error("cannot create directory {path:?}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Atomic file write failed.
    #[error("cannot write {path:?}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Symlink creation failed.
    #[error("cannot create symlink {path:?}")]
    Symlink {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Removal failed.
    #[error("cannot remove {path:?}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Permission change failed.
    #[error("cannot set permissions on {path:?}")]
    SetMode {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Friendly result alias :3
type Result<T, E = FsError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn write_atomic_creates_parents_and_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("file.txt");

        write_atomic(&path, b"export X=1", 0o644).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"export X=1");
    }

    #[test]
    fn write_atomic_replaces_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");

        write_atomic(&path, b"old", 0o644).unwrap();
        write_atomic(&path, b"new", 0o644).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"new");
    }

    #[test]
    fn write_atomic_leaves_no_temp_files_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");

        write_atomic(&path, b"content", 0o644).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("file.txt")]);
    }

    #[cfg(unix)]
    #[test]
    fn write_atomic_applies_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret");

        write_atomic(&path, b"hush", 0o600).unwrap();

        let metadata = fs::metadata(&path).unwrap();
        assert_eq!(read_mode(&metadata), Some(0o600));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_atomic_replaces_existing_link() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("link");

        symlink_atomic(&link, Path::new("/usr/bin/nvim")).unwrap();
        symlink_atomic(&link, Path::new("/usr/bin/vim")).unwrap();

        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("/usr/bin/vim"));
    }

    #[test]
    fn remove_any_handles_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        let tree = dir.path().join("tree");
        fs::write(&file, "x").unwrap();
        fs::create_dir_all(tree.join("deep")).unwrap();

        remove_any(&file).unwrap();
        remove_any(&tree).unwrap();

        assert!(!file.exists());
        assert!(!tree.exists());
    }
}
