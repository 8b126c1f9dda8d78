use bridge_traits::{BridgeError, ItemKind, UserId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Not logged in")]
    NotAuthenticated { user_id: UserId },

    #[error("{kind} {item_id} not found")]
    ItemNotFound { item_id: String, kind: ItemKind },

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Storage error: {0}")]
    Storage(#[from] BridgeError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        SyncError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
