//! Storage error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

impl From<DbError> for buildit_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => buildit_core::Error::NotFound(msg),
            DbError::Duplicate(msg) => buildit_core::Error::Conflict(msg),
            DbError::Backend(msg) => buildit_core::Error::Storage(msg),
        }
    }
}
