//! Shared error types for the services crate.

use thiserror::Error;

use course_core::model::ProgressError;
use storage::repository::StorageError;

use crate::remote::RemoteError;

/// Errors emitted by the sync engine.
///
/// The guard variants (`NotAuthenticated`, `Offline`, `AlreadySyncing`) are
/// fail-fast outcomes that never enter the retry loop and never touch dirty
/// flags. Only network-shaped failures are transient.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("offline")]
    Offline,

    #[error("sync already in progress")]
    AlreadySyncing,

    #[error("remote rejected the identity token")]
    Unauthorized,

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("remote payload invalid: {0}")]
    InvalidRemote(String),

    #[error("remote rejected the request: {0}")]
    Rejected(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SyncError {
    /// Whether this failure should drive the retry/backoff loop.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Network(_) | SyncError::Timeout)
    }

    /// Fail-fast guard outcomes, expected in background operation and not
    /// worth surfacing to the user.
    #[must_use]
    pub fn is_guard(&self) -> bool {
        matches!(
            self,
            SyncError::NotAuthenticated | SyncError::Offline | SyncError::AlreadySyncing
        )
    }
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        // Throttling and server errors are worth retrying; a client error
        // means retrying the same request cannot help.
        let transient = err.is_transient();
        match err {
            RemoteError::Unauthorized => SyncError::Unauthorized,
            RemoteError::Timeout => SyncError::Timeout,
            RemoteError::Status(status) if transient => {
                SyncError::Network(format!("unexpected status {status}"))
            }
            RemoteError::Status(status) => SyncError::Rejected(format!("status {status}")),
            RemoteError::Transport(e) => SyncError::Network(e.to_string()),
        }
    }
}

/// Errors emitted by `ProgressService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressServiceError {
    #[error(transparent)]
    Progress(#[from] ProgressError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("sync is not configured for this session")]
    SyncUnavailable,

    #[error(transparent)]
    Sync(#[from] SyncError),
}
