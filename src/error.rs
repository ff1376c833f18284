//! Domain error type shared by the store, the permission checks and the
//! scheduling rules.
//!
//! Every failure is a variant here; the HTTP layer maps them to status codes
//! through [`DomainError::status_code`].

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Debug, Error)]
pub enum DomainError {
    /// No session user
    #[error("UNAUTHENTICATED")]
    Unauthenticated,

    /// Session user lacks the required role
    #[error("FORBIDDEN")]
    Forbidden,

    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed input shape or range
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    /// Recalculation target disappeared, usually a concurrent delete
    #[error("Task not found during recalculation: {0}")]
    TaskNotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// HTTP-equivalent status for the calling boundary
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Unauthenticated => 401,
            Self::Forbidden => 403,
            Self::NotFound(_) => 404,
            Self::Validation(_) | Self::InvalidDate(_) => 400,
            Self::TaskNotFound(_) | Self::Database(_) | Self::Serialization(_) => 500,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InvalidDate(_) => "INVALID_DATE",
            Self::TaskNotFound(_) => "TASK_NOT_FOUND",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}
