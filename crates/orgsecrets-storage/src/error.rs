//! Value store error types.
//!
//! Every variant carries the path or prefix involved so a failed operation
//! can be diagnosed from the log line alone. Secret payloads never appear in
//! error messages.

/// Errors that can occur during value store operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Failed to open or connect to the backend.
    #[error("failed to open value store at '{location}': {reason}")]
    Open { location: String, reason: String },

    /// Failed to read a payload.
    #[error("failed to read path '{path}': {reason}")]
    Read { path: String, reason: String },

    /// Failed to write a payload.
    #[error("failed to write path '{path}': {reason}")]
    Write { path: String, reason: String },

    /// Failed to delete a payload.
    #[error("failed to delete path '{path}': {reason}")]
    Delete { path: String, reason: String },

    /// Failed to list children of a prefix.
    #[error("failed to list prefix '{prefix}': {reason}")]
    List { prefix: String, reason: String },

    /// A stored payload or key could not be decoded.
    #[error("invalid encoding at '{path}': {reason}")]
    Encoding { path: String, reason: String },
}
