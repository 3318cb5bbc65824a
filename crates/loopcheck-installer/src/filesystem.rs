//! File-system seam used by the installer, with credential-gated writes.

use std::io;
use std::path::Path;

/// Operations the installer needs from the host file system.
pub trait ShimFilesystem {
    /// True for any entry, including dangling symlinks.
    fn exists(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
    fn symlink(&self, source: &Path, destination: &Path) -> io::Result<()>;
    /// Replaces `destination` with the content of `source` atomically.
    fn copy_file(&self, source: &Path, destination: &Path) -> io::Result<()>;
    fn read_to_string(&self, path: &Path) -> io::Result<String>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
}

/// Host-local file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalShimFilesystem;

impl ShimFilesystem for LocalShimFilesystem {
    fn exists(&self, path: &Path) -> bool {
        std::fs::symlink_metadata(path).is_ok()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    #[cfg(unix)]
    fn symlink(&self, source: &Path, destination: &Path) -> io::Result<()> {
        std::os::unix::fs::symlink(source, destination)
    }

    #[cfg(not(unix))]
    fn symlink(&self, _source: &Path, _destination: &Path) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "symbolic links are not supported on this platform",
        ))
    }

    fn copy_file(&self, source: &Path, destination: &Path) -> io::Result<()> {
        loopcheck_core::replace_file_atomic(source, destination)
            .map_err(|error| io::Error::other(format!("{error:#}")))
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }
}

/// Obtains write access to the must-load directory, interactively if the
/// host requires it.
pub trait FilesystemCredentials {
    /// Returns false when access could not be confirmed; the caller reports
    /// `NeedsCredentials` and retries after the operator provides them.
    fn request_write_access(&self, target_dir: &Path) -> bool;
}

/// Credentials already available (e.g. direct file-system access).
#[derive(Debug, Clone, Copy, Default)]
pub struct GrantedCredentials;

impl FilesystemCredentials for GrantedCredentials {
    fn request_write_access(&self, _target_dir: &Path) -> bool {
        true
    }
}

/// Credentials the operator has not supplied yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeniedCredentials;

impl FilesystemCredentials for DeniedCredentials {
    fn request_write_access(&self, _target_dir: &Path) -> bool {
        false
    }
}

/// Grants access when the target directory, or its nearest existing ancestor,
/// is writable by this process.
#[derive(Debug, Clone, Copy, Default)]
pub struct WritableDirectoryCredentials;

impl FilesystemCredentials for WritableDirectoryCredentials {
    fn request_write_access(&self, target_dir: &Path) -> bool {
        let Some(existing) = target_dir.ancestors().find(|candidate| candidate.exists()) else {
            return false;
        };
        match std::fs::metadata(existing) {
            Ok(metadata) => metadata.is_dir() && !metadata.permissions().readonly(),
            Err(error) => {
                tracing::debug!(path = %existing.display(), %error, "cannot inspect directory");
                false
            }
        }
    }
}
