use thiserror::Error;

use costreport_core::{InvalidCategory, InvalidKey, StorageError};

#[derive(Debug, Error)]
pub enum Error {
    /// Rejected before any store access.
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    AlreadyExists(String),
    /// Infrastructure failure, passed through without retry.
    #[error("{0}")]
    StoreUnavailable(StorageError),
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::UserAlreadyExists(_) => Error::AlreadyExists("User already exists".to_string()),
            other => Error::StoreUnavailable(other),
        }
    }
}

impl From<InvalidKey> for Error {
    fn from(e: InvalidKey) -> Self {
        Error::Validation(e.to_string())
    }
}

impl From<InvalidCategory> for Error {
    fn from(_: InvalidCategory) -> Self {
        Error::Validation("Invalid category".to_string())
    }
}
