//! # Tessera Core
//!
//! Core library for Tessera.
//! Provides layered configuration, the named blob storage that every persisted
//! artifact goes through, and the error types shared by the higher crates.

pub mod config;
pub mod error;
pub mod storage;

// Re-export commonly used types at the crate root.
pub use config::{
    Configuration, LoggingSettings, Settings, StorageBackend, StorageSettings,
    ValidationSettings, load_settings,
};
pub use error::{ConfigError, StorageError};
pub use storage::{BlobStore, FileStore, InMemoryStore, StorageKey};
