use std::path::PathBuf;

/// Errors from document processing and index operations.
///
/// These surface to clients as `error` envelopes — they terminate the
/// operation that caused them, never the connection.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("unsupported file type: {0} (allowed: plain text)")]
    UnsupportedFileType(String),

    #[error("invalid filename: {0}")]
    InvalidFilename(String),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("index persistence error: {0}")]
    Persistence(#[from] serde_json::Error),

    #[error("document produced no indexable text")]
    EmptyDocument,
}
