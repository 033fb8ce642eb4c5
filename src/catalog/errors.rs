//! Catalog error types.

use thiserror::Error;

/// Errors raised while loading a server catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog file could not be read.
    #[error("failed to read catalog {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    /// The catalog file is not valid JSON/YAML or has the wrong shape.
    #[error("failed to parse catalog {path}: {reason}")]
    ParseFailed { path: String, reason: String },

    /// A single entry is unusable (missing command, unknown type, ...).
    #[error("invalid catalog entry '{name}': {reason}")]
    InvalidEntry { name: String, reason: String },

    /// A package lookup on the npm registry failed.
    #[error("registry lookup for {package} failed: {reason}")]
    Registry { package: String, reason: String },
}
