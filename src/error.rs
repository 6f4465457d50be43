//! Error types for fieldops-rs.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed payload or a duplicate external job id on create.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Missing or archived group, assignment, job, or exception record.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid transition, e.g. returning a job that is already closed.
    /// The caller must re-fetch state before retrying.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Unique-constraint violation surfaced to the caller; the owning
    /// transaction has been rolled back entirely.
    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True when the underlying cause is a Postgres unique violation.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db)) => db.code().as_deref() == Some("23505"),
            _ => false,
        }
    }

    /// Remap a unique violation into an [`Error::Integrity`] with the
    /// given user-facing message; other errors pass through unchanged.
    pub fn integrity_on_unique(self, message: &str) -> Self {
        if self.is_unique_violation() {
            Error::Integrity(message.to_string())
        } else {
            self
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
