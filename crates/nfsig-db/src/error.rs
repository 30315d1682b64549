//! Database-specific error types and conversions.

use nfsig_core::error::NfsigError;

/// Database-layer error type.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SurrealDB error: {0}")]
    Surreal(#[from] surrealdb::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Corrupt {entity} record {id}: {reason}")]
    Corrupt {
        entity: &'static str,
        id: String,
        reason: String,
    },

    #[error("Record not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },
}

impl From<DbError> for NfsigError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => NfsigError::NotFound { entity, id },
            other => NfsigError::PersistenceFailed(other.to_string()),
        }
    }
}
