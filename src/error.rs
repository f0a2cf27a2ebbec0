//! Error types for portal-gamification

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GamificationError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Authentication required: {0}")]
    Unauthorized(String),

    #[error("Object storage error: {0}")]
    ExternalIo(String),

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Map a failed INSERT to `Conflict` when it hit a uniqueness constraint
pub fn conflict_on_unique(e: diesel::result::Error, message: &str) -> GamificationError {
    use diesel::result::{DatabaseErrorKind, Error};

    match e {
        Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            GamificationError::Conflict(message.to_string())
        }
        other => GamificationError::Database(other),
    }
}

pub type Result<T, E = GamificationError> = std::result::Result<T, E>;
