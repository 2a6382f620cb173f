//! Error types for the Warden system.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WardenError {
    #[error("Entity not found: {entity} with uuid {uuid}")]
    NotFound { entity: String, uuid: String },

    #[error("Entity already exists: {entity}")]
    AlreadyExists { entity: String },

    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Permission denied: {reason}")]
    Forbidden { reason: String },

    #[error("Integrity violation: {reason}")]
    Integrity { reason: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WardenError {
    pub fn not_found(entity: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            uuid: uuid.into(),
        }
    }

    pub fn integrity(reason: impl Into<String>) -> Self {
        Self::Integrity {
            reason: reason.into(),
        }
    }
}

pub type WardenResult<T> = Result<T, WardenError>;
