//! Database-specific error types and conversions.

use warden_core::error::WardenError;

/// Database-layer error type.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SurrealDB error: {0}")]
    Surreal(#[from] surrealdb::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Query rejected: {0}")]
    Query(String),

    #[error("Record not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("Corrupt row in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },
}

impl DbError {
    pub(crate) fn not_found(entity: &str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }
}

impl From<DbError> for WardenError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => WardenError::NotFound { entity, uuid: id },
            DbError::Integrity(reason) => WardenError::Integrity { reason },
            other => WardenError::Database(other.to_string()),
        }
    }
}
