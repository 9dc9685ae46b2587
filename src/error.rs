// Error taxonomy for the dedup/merge engine
// Every rejection class maps to an HTTP-equivalent status for the API layer

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, MergeError>;

#[derive(Error, Debug)]
pub enum MergeError {
    /// Malformed or missing input, self-merge, kind mismatch
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No credential, or a credential that resolves to nobody
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Insufficient role or out-of-scope country (always audited)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Referenced account does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Secondary already claimed by a merge into a different primary
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MergeError {
    /// HTTP-equivalent status code
    pub fn status_code(&self) -> u16 {
        match self {
            MergeError::InvalidRequest(_) => 400,
            MergeError::Unauthenticated(_) => 401,
            MergeError::Forbidden(_) => 403,
            MergeError::NotFound(_) => 404,
            MergeError::Conflict(_) => 409,
            MergeError::Database(_)
            | MergeError::Serialization(_)
            | MergeError::Config(_)
            | MergeError::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code for API bodies
    pub fn code(&self) -> &'static str {
        match self {
            MergeError::InvalidRequest(_) => "INVALID_REQUEST",
            MergeError::Unauthenticated(_) => "UNAUTHENTICATED",
            MergeError::Forbidden(_) => "FORBIDDEN",
            MergeError::NotFound(_) => "NOT_FOUND",
            MergeError::Conflict(_) => "CONFLICT",
            MergeError::Database(_)
            | MergeError::Serialization(_)
            | MergeError::Config(_)
            | MergeError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
