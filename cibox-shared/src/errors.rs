//! Error taxonomy for container lifecycle operations.
//!
//! Errors are categorized by where in the lifecycle they are raised:
//! - [`CiboxError::Creation`]: cloning failed, no container exists yet
//! - [`CiboxError::Timeout`]: a bounded wait ran past its deadline
//! - [`CiboxError::InvalidState`]: operation attempted in the wrong phase
//! - [`CiboxError::Operation`]: the container runtime reported failure
//! - [`CiboxError::Archive`]: moving a container into the archive failed
//! - [`CiboxError::Permission`]: workspace sync outside the permitted boundary

use thiserror::Error;

/// Result alias used across the cibox crates.
pub type CiboxResult<T> = Result<T, CiboxError>;

#[derive(Debug, Error)]
pub enum CiboxError {
    /// Clone or name-collision failure. Raised before any container exists.
    #[error("creation failed: {0}")]
    Creation(String),

    /// Boot, network, ssh or stop wait exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Operation attempted in the wrong lifecycle phase.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The container runtime reported failure for start/stop/destroy.
    #[error("operation failed: {0}")]
    Operation(String),

    /// Clone-to-archive or the post-archive destroy failed.
    ///
    /// Both the runtime and the archive copy may exist afterwards.
    #[error("archive failed: {0}")]
    Archive(String),

    /// Workspace sync source outside the permitted boundary.
    #[error("permission denied: {0}")]
    Permission(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Configuration could not be loaded or is invalid.
    #[error("config: {0}")]
    Config(String),

    /// Host filesystem operation failed.
    #[error("storage: {0}")]
    Storage(String),

    /// Metadata record could not be read or written.
    #[error("metadata: {0}")]
    Metadata(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl CiboxError {
    /// Short category name, used as the prefix on CLI error output.
    pub fn kind(&self) -> &'static str {
        match self {
            CiboxError::Creation(_) => "CreationError",
            CiboxError::Timeout(_) => "TimeoutError",
            CiboxError::InvalidState(_) => "InvalidStateError",
            CiboxError::Operation(_) => "OperationError",
            CiboxError::Archive(_) => "ArchiveError",
            CiboxError::Permission(_) => "PermissionError",
            CiboxError::NotFound(_) => "NotFoundError",
            CiboxError::Config(_) => "ConfigError",
            CiboxError::Storage(_) => "StorageError",
            CiboxError::Metadata(_) => "MetadataError",
            CiboxError::Internal(_) => "InternalError",
        }
    }
}

impl From<std::io::Error> for CiboxError {
    fn from(e: std::io::Error) -> Self {
        CiboxError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for CiboxError {
    fn from(e: serde_json::Error) -> Self {
        CiboxError::Metadata(e.to_string())
    }
}
