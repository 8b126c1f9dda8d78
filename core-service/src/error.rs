use core_sync::SyncError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Runtime(#[from] core_runtime::Error),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Storage error: {0}")]
    Storage(#[from] bridge_traits::BridgeError),
}

/// Coarse classification for transports that map errors to status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Authentication,
    NotFound,
    Internal,
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Sync(SyncError::Validation { .. }) => ErrorKind::Validation,
            CoreError::Sync(SyncError::NotAuthenticated { .. }) => ErrorKind::Authentication,
            CoreError::Sync(SyncError::ItemNotFound { .. }) => ErrorKind::NotFound,
            CoreError::Runtime(core_runtime::Error::Config(_)) => ErrorKind::Validation,
            _ => ErrorKind::Internal,
        }
    }

    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        CoreError::Sync(SyncError::validation(field, message))
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
