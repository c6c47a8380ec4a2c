//! Error types for rlm-memory

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::layer::Layer;
use crate::schema::SchemaWarning;

/// Result type alias for rlm-memory operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in rlm-memory
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown layer: {0}")]
    UnknownLayer(String),

    #[error("Layer '{0}' is not enabled for writes")]
    LayerNotWritable(Layer),

    #[error("Writes to layer '{0}' are blocked by policy")]
    PermissionDenied(Layer),

    #[error("Invalid record: {0}")]
    Validation(Box<SchemaWarning>),

    #[error("Timed out after {waited:?} acquiring lock for {}", path.display())]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn unknown_layer(name: impl Into<String>) -> Self {
        Self::UnknownLayer(name.into())
    }

    pub fn validation(warning: SchemaWarning) -> Self {
        Self::Validation(Box::new(warning))
    }
}
