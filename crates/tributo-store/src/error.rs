//! Store errors.

use thiserror::Error;

/// Errors produced by a storage backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A row violated a uniqueness constraint. Retried once by callers
    /// that upsert; counted as an error afterwards.
    #[error("uniqueness conflict on {entity}: {detail}")]
    Conflict { entity: &'static str, detail: String },

    /// A referenced row does not exist.
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// A stored value could not be decoded into its domain type.
    #[error("corrupt {entity} row: {detail}")]
    Decode { entity: &'static str, detail: String },

    /// Store configuration is invalid.
    #[error("store configuration error: {0}")]
    Config(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn decode(entity: &'static str, detail: impl std::fmt::Display) -> Self {
        Self::Decode {
            entity,
            detail: detail.to_string(),
        }
    }

    /// Whether this is a uniqueness conflict (including the database's own
    /// unique-violation report), which upsert paths retry once.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Conflict { .. } => true,
            Self::Database(sqlx::Error::Database(e)) => e.is_unique_violation(),
            _ => false,
        }
    }
}
