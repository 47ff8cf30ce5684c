//! Fatal package errors
//!
//! Anything recoverable is a `Diagnostic` on the package report instead.

use ssisflow_core::ProtectionLevel;

/// Package document could not be loaded
#[derive(Debug, thiserror::Error)]
pub enum DocumentLoadError {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Failed to read document {0}: {1}")]
    Io(String, String),

    #[error("Malformed document at byte {position}: {message}")]
    Malformed { position: u64, message: String },

    #[error("Document has no root element")]
    NoRootElement,

    #[error("Expected root element {expected}, found {found}")]
    RootMismatch { expected: String, found: String },
}

/// Package is encrypted in a way that cannot be read
#[derive(Debug, thiserror::Error)]
#[error("Package protected with {level} cannot be read: {reason}")]
pub struct EncryptionError {
    pub level: ProtectionLevel,
    pub reason: String,
}

/// Fatal error for a single package parse
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error(transparent)]
    Load(#[from] DocumentLoadError),

    #[error(transparent)]
    Encryption(#[from] EncryptionError),
}
