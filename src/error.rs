//! Crate-wide error type.

use thiserror::Error;

use crate::platform::PlatformError;
use crate::validate::ValidationError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("gave up after {attempts} attempts: {cause}")]
    RetriesExhausted { attempts: u32, cause: String },

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("search index error: {0}")]
    Index(#[from] tantivy::TantivyError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no such source: {0}")]
    SourceNotFound(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for a unique-constraint violation; insert paths treat those as
    /// "already catalogued" rather than failures.
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            Error::Database(diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            ))
        )
    }
}

impl<E: std::fmt::Display> From<crate::platform::RetriesExhausted<E>> for Error {
    fn from(err: crate::platform::RetriesExhausted<E>) -> Self {
        Error::RetriesExhausted {
            attempts: err.attempts,
            cause: err.cause.to_string(),
        }
    }
}
