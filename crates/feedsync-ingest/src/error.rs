//! Error types for feed ingestion

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Fatal errors raised by parsing, configuration and storage
///
/// Per-document upsert rejections are not represented here; they are
/// collected into [`crate::sink::UpsertReport`] so sibling operations
/// still apply.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("No parser for {0} format")]
    UnknownFormat(String),

    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    #[error("Failed to read feed {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed delimited feed {path}: {source}")]
    Delimited {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Malformed XML feed {path} at byte {position}: {source}")]
    Xml {
        path: PathBuf,
        position: u64,
        #[source]
        source: quick_xml::Error,
    },

    #[error("XML feed {path} ended with {open_elements} unclosed element(s)")]
    TruncatedXml { path: PathBuf, open_elements: usize },

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Failed to ensure unique key on collection '{collection}': {source}")]
    ConstraintSetup {
        collection: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Document with id '{key}' already exists in collection '{collection}'")]
    DuplicateKey { collection: String, key: String },

    #[error("Failed to encode document: {0}")]
    Encode(#[from] serde_json::Error),
}

impl IngestError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error was caused by the caller's configuration rather than data or I/O
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::UnknownFormat(_) | Self::InvalidConfig(_))
    }
}
