//! Installs and version-syncs the troubleshooting shim in the host's
//! must-load directory.
//!
//! Every operation ends in an [`InstallOutcome`]; file-system failures are
//! reported with a remediation message and never propagate as errors.

use std::path::{Path, PathBuf};

use loopcheck_shim::{shim_install_path, ShimManifest};
use serde::Serialize;

mod filesystem;
mod version;

pub use filesystem::{
    DeniedCredentials, FilesystemCredentials, GrantedCredentials, LocalShimFilesystem,
    ShimFilesystem, WritableDirectoryCredentials,
};
pub use version::{compare_versions, is_strictly_newer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
/// What a successful install/update/uninstall did.
pub enum InstallAction {
    Linked,
    Copied,
    Updated,
    AlreadyCurrent,
    Removed,
    NotInstalled,
}

impl InstallAction {
    pub fn as_str(self) -> &'static str {
        match self {
            InstallAction::Linked => "linked",
            InstallAction::Copied => "copied",
            InstallAction::Updated => "updated",
            InstallAction::AlreadyCurrent => "already_current",
            InstallAction::Removed => "removed",
            InstallAction::NotInstalled => "not_installed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
/// Result of an installer operation.
pub enum InstallOutcome {
    Success { action: InstallAction },
    NeedsCredentials { message: String },
    Failed { message: String },
}

impl InstallOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, InstallOutcome::Success { .. })
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            InstallOutcome::Success { .. } => None,
            InstallOutcome::NeedsCredentials { message } | InstallOutcome::Failed { message } => {
                Some(message)
            }
        }
    }
}

/// Places the canonical shim into the must-load directory.
#[derive(Debug, Clone)]
pub struct ShimInstaller<F, C> {
    filesystem: F,
    credentials: C,
    source_path: PathBuf,
    must_load_dir: PathBuf,
}

impl<F: ShimFilesystem, C: FilesystemCredentials> ShimInstaller<F, C> {
    pub fn new(
        filesystem: F,
        credentials: C,
        source_path: impl Into<PathBuf>,
        must_load_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            filesystem,
            credentials,
            source_path: absolute_source_path(source_path.into()),
            must_load_dir: must_load_dir.into(),
        }
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn destination_path(&self) -> PathBuf {
        shim_install_path(&self.must_load_dir)
    }

    pub fn is_installed(&self) -> bool {
        self.filesystem.exists(&self.destination_path())
    }

    /// Installs the shim if missing (symlink first, copy as fallback), or
    /// brings an existing install up to date.
    pub fn ensure_installed(&self) -> InstallOutcome {
        if self.is_installed() {
            return self.check_and_update();
        }
        if !self.filesystem.exists(&self.source_path) {
            return self.failed(format!(
                "The troubleshooting shim source {} is missing; reinstall loopcheck to restore it.",
                self.source_path.display()
            ));
        }
        if !self.credentials.request_write_access(&self.must_load_dir) {
            return self.needs_credentials();
        }

        if !self.filesystem.is_dir(&self.must_load_dir) {
            if let Err(error) = self.filesystem.create_dir_all(&self.must_load_dir) {
                return self.failed(format!(
                    "We were unable to create the must-load directory {} ({error}). Create it manually and make it writable by the application.",
                    self.must_load_dir.display()
                ));
            }
        }

        let destination = self.destination_path();
        match self.filesystem.symlink(&self.source_path, &destination) {
            Ok(()) if self.filesystem.read_to_string(&destination).is_ok() => {
                tracing::info!(
                    source = %self.source_path.display(),
                    destination = %destination.display(),
                    "troubleshooting shim linked"
                );
                InstallOutcome::Success {
                    action: InstallAction::Linked,
                }
            }
            Ok(()) => {
                tracing::warn!(
                    source = %self.source_path.display(),
                    destination = %destination.display(),
                    "shim link does not resolve; copying shim instead"
                );
                if let Err(error) = self.filesystem.remove_file(&destination) {
                    tracing::warn!(%error, "failed to remove unresolved shim link");
                }
                self.copy_into_place(&destination)
            }
            Err(link_error) => {
                tracing::debug!(%link_error, "symlink unavailable; copying shim instead");
                self.copy_into_place(&destination)
            }
        }
    }

    fn copy_into_place(&self, destination: &Path) -> InstallOutcome {
        match self.filesystem.copy_file(&self.source_path, destination) {
            Ok(()) => {
                tracing::info!(
                    destination = %destination.display(),
                    "troubleshooting shim copied"
                );
                InstallOutcome::Success {
                    action: InstallAction::Copied,
                }
            }
            Err(error) => self.failed(format!(
                "We were unable to copy the shim file required to enable troubleshooting mode ({error}). Copy {} to {} manually.",
                self.source_path.display(),
                destination.display()
            )),
        }
    }

    /// Replaces the installed shim by copy when the source declares a
    /// strictly newer version; equal or older is a no-op.
    pub fn check_and_update(&self) -> InstallOutcome {
        let destination = self.destination_path();
        if !self.is_installed() {
            return self.failed(format!(
                "The troubleshooting shim is not installed at {}; install it before updating.",
                destination.display()
            ));
        }

        let Some(source_version) = self.declared_version(&self.source_path) else {
            tracing::warn!(
                source = %self.source_path.display(),
                "shim source declares no readable version; keeping installed copy"
            );
            return InstallOutcome::Success {
                action: InstallAction::AlreadyCurrent,
            };
        };
        let needs_replacement = match self.declared_version(&destination) {
            Some(installed_version) => {
                match is_strictly_newer(&source_version, &installed_version) {
                    Some(newer) => newer,
                    None => {
                        tracing::warn!(
                            %source_version,
                            %installed_version,
                            "shim versions are not comparable; keeping installed copy"
                        );
                        false
                    }
                }
            }
            None => true,
        };
        if !needs_replacement {
            return InstallOutcome::Success {
                action: InstallAction::AlreadyCurrent,
            };
        }

        if !self.credentials.request_write_access(&self.must_load_dir) {
            return self.needs_credentials();
        }
        match self.filesystem.copy_file(&self.source_path, &destination) {
            Ok(()) => {
                tracing::info!(
                    %source_version,
                    destination = %destination.display(),
                    "troubleshooting shim updated"
                );
                InstallOutcome::Success {
                    action: InstallAction::Updated,
                }
            }
            Err(error) => self.failed(format!(
                "We were unable to replace the shim file required to enable troubleshooting mode ({error}). Copy {} to {} manually.",
                self.source_path.display(),
                destination.display()
            )),
        }
    }

    /// Removes the installed shim; removing an absent shim succeeds.
    pub fn uninstall(&self) -> InstallOutcome {
        let destination = self.destination_path();
        if !self.is_installed() {
            return InstallOutcome::Success {
                action: InstallAction::NotInstalled,
            };
        }
        if !self.credentials.request_write_access(&self.must_load_dir) {
            return self.needs_credentials();
        }
        match self.filesystem.remove_file(&destination) {
            Ok(()) => {
                tracing::info!(destination = %destination.display(), "troubleshooting shim removed");
                InstallOutcome::Success {
                    action: InstallAction::Removed,
                }
            }
            Err(error) => self.failed(format!(
                "We were unable to remove the shim file {} ({error}). Delete it manually to leave troubleshooting mode permanently.",
                destination.display()
            )),
        }
    }

    fn declared_version(&self, path: &Path) -> Option<String> {
        let raw = match self.filesystem.read_to_string(path) {
            Ok(raw) => raw,
            Err(error) => {
                tracing::debug!(path = %path.display(), %error, "shim file unreadable");
                return None;
            }
        };
        match ShimManifest::parse(&raw) {
            Ok(manifest) => Some(manifest.version),
            Err(error) => {
                tracing::debug!(path = %path.display(), error = %format!("{error:#}"), "shim manifest invalid");
                None
            }
        }
    }

    fn needs_credentials(&self) -> InstallOutcome {
        tracing::info!(
            must_load_dir = %self.must_load_dir.display(),
            "file-system credentials required to install shim"
        );
        InstallOutcome::NeedsCredentials {
            message: format!(
                "File-system write access is required to place the troubleshooting shim in {}. Provide file-system credentials and retry.",
                self.must_load_dir.display()
            ),
        }
    }

    fn failed(&self, message: String) -> InstallOutcome {
        tracing::warn!(%message, "shim installation failed");
        InstallOutcome::Failed { message }
    }
}

/// Anchors a relative shim source at the working directory so a link to it
/// resolves from inside the must-load directory.
fn absolute_source_path(source_path: PathBuf) -> PathBuf {
    if source_path.is_absolute() {
        return source_path;
    }
    match std::env::current_dir() {
        Ok(working_dir) => working_dir.join(source_path),
        Err(error) => {
            tracing::warn!(%error, "working directory unavailable; keeping relative shim source");
            source_path
        }
    }
}
