use loopcheck_installer::InstallOutcome;
use loopcheck_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
/// Enumerates supported `TroubleshootError` values.
pub enum TroubleshootError {
    #[error("you do not have permission to run site diagnostics; ask an administrator")]
    PermissionDenied,
    #[error("file system credentials are required: {message}")]
    CredentialsRequired { message: String },
    #[error("the troubleshooting shim could not be installed: {message}")]
    InstallFailure { message: String },
    #[error(
        "a troubleshooting session is already active for '{owner}'; stop it before starting another"
    )]
    SessionConflict { owner: String },
    #[error("failed to update the troubleshooting cookie: {0}")]
    Cookie(#[source] std::io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TroubleshootError {
    /// Maps a non-successful install outcome; `None` for success.
    pub(crate) fn from_install_outcome(outcome: InstallOutcome) -> Option<Self> {
        match outcome {
            InstallOutcome::Success { .. } => None,
            InstallOutcome::NeedsCredentials { message } => {
                Some(TroubleshootError::CredentialsRequired { message })
            }
            InstallOutcome::Failed { message } => Some(TroubleshootError::InstallFailure { message }),
        }
    }
}
