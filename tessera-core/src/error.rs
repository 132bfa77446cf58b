//! Error types for the Tessera core library.
//!
//! Uses `thiserror` for public API error types, with structured variants for
//! the storage backends and the configuration system. Higher layers wrap these
//! (see `tessera_ml::MlError`).

use std::path::PathBuf;

/// Errors from named blob storage.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("No artifact stored under {kind}/{name}")]
    NotFound { kind: String, name: String },

    #[error("Invalid storage {field} '{value}': {reason}")]
    InvalidKey {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Storage backend failure: {message}")]
    Backend { message: String },

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Failed to prepare storage root {path}: {source}")]
    StorageRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = StorageError::NotFound {
            kind: "dataframe".into(),
            name: "wines".into(),
        };
        assert_eq!(err.to_string(), "No artifact stored under dataframe/wines");
    }

    #[test]
    fn test_invalid_key_display() {
        let err = StorageError::InvalidKey {
            field: "name",
            value: "../etc".into(),
            reason: "path separators are not allowed".into(),
        };
        assert!(err.to_string().contains("Invalid storage name '../etc'"));
    }
}
