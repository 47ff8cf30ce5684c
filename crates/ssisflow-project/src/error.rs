//! Project-level fatal errors
//!
//! Only failures that stop the whole project end up here. A package that
//! cannot be read becomes a placeholder instead.

/// Errors opening or reading a project container
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("Project not found: {0}")]
    NotFound(String),

    #[error("Failed to read {0}: {1}")]
    Io(String, String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Not a project container: {0}")]
    InvalidContainer(String),

    #[error("Member not found in project: {0}")]
    MissingMember(String),
}
