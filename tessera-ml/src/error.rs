//! Error types for the tessera-ml crate.

use thiserror::Error;

use tessera_core::{ConfigError, StorageError};

/// Top-level error type for lifecycle, validation, and metric operations.
#[derive(Debug, Error)]
pub enum MlError {
    /// An operation was attempted in the wrong lifecycle state.
    #[error("Cannot {operation} while {state}")]
    State {
        operation: &'static str,
        state: &'static str,
    },

    #[error("No {kind} stored under '{name}'")]
    NotFound { kind: String, name: String },

    #[error("Artifact '{name}' is a {found}, not a {requested}")]
    TypeMismatch {
        name: String,
        requested: String,
        found: String,
    },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Corrupt artifact {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker pool error: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl From<StorageError> for MlError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { kind, name } => Self::NotFound { kind, name },
            other => Self::Storage(other),
        }
    }
}

impl MlError {
    pub fn state(operation: &'static str, state: &'static str) -> Self {
        Self::State { operation, state }
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether the caller can reasonably continue (e.g. fall back to training).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_not_found_maps_to_not_found() {
        let err: MlError = StorageError::NotFound {
            kind: "ordinal_regression".into(),
            name: "wines".into(),
        }
        .into();
        assert!(matches!(err, MlError::NotFound { .. }));
        assert!(err.is_recoverable());
        assert_eq!(err.to_string(), "No ordinal_regression stored under 'wines'");
    }

    #[test]
    fn test_other_storage_errors_are_wrapped() {
        let err: MlError = StorageError::Backend {
            message: "poisoned".into(),
        }
        .into();
        assert!(matches!(err, MlError::Storage(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_state_display() {
        let err = MlError::state("predict", "configured");
        assert_eq!(err.to_string(), "Cannot predict while configured");
        assert!(!err.is_recoverable());
    }
}
