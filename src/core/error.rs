use super::types::Reference;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(Reference),

    #[error("Unresolved reference: {0}")]
    UnresolvedReference(Reference),

    #[error("Stale object {reference}: expected version {expected}, found {found}")]
    StaleObject {
        reference: Reference,
        expected: i64,
        found: i64,
    },

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Unknown object: {0}")]
    UnknownObject(String),

    #[error("Duplicate object: {0}")]
    DuplicateObject(Reference),

    #[error("Object {0} references an unsaved object")]
    TransientObject(Reference),

    #[error("Transaction error: {0}")]
    TransactionError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

pub type Result<T> = std::result::Result<T, AssemblyError>;

impl<T> From<std::sync::PoisonError<T>> for AssemblyError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for AssemblyError {
    fn from(err: serde_json::Error) -> Self {
        Self::StorageError(err.to_string())
    }
}

impl From<std::io::Error> for AssemblyError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageError(err.to_string())
    }
}
