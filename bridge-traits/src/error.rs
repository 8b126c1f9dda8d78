use thiserror::Error;

/// Failure reported by a host collaborator (state store, catalog client)
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The collaborator rejected or could not complete the call
    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    /// The backing database refused a query or connection
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
