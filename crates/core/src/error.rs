//! Domain-level error taxonomy.
//!
//! Per-route render failures are deliberately NOT represented here: they
//! are non-fatal and travel in the render report instead of aborting the
//! job.

/// Errors surfaced by the core domain and the pipeline stages.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Upload failed validation (archive too large, too many files,
    /// path traversal). Fatal before any external process runs.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// An external tool exited nonzero or hit its deadline. Fatal.
    #[error("{step} step failed: {detail}")]
    Tool {
        step: &'static str,
        detail: String,
    },

    /// A referenced entity does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// Invalid service credential or download token.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The artifact was already redeemed or reaped.
    #[error("Gone: {0}")]
    Gone(String),

    /// The request conflicts with the job's current state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Unexpected internal failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience alias used across the pipeline crates.
pub type CoreResult<T> = Result<T, CoreError>;

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Internal(format!("I/O error: {err}"))
    }
}
