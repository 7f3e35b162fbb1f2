//! Error types for geppeto-chat

use thiserror::Error;

/// Result type alias using geppeto-chat Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the conversation core
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the completion endpoint layer
    #[error(transparent)]
    Ai(#[from] geppeto_ai::Error),

    /// A conversation, message or record id that does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// `add` of a record whose id is already stored
    #[error("{entity} already exists: {id}")]
    AlreadyExists { entity: &'static str, id: String },

    /// Filesystem failure in a file-backed table
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored record could not be (de)serialized
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The remote store rejected or failed a sync call
    #[error("Sync error: {0}")]
    Sync(String),

    /// A generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Check if this error is a caller-initiated cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Ai(e) if e.is_cancelled())
    }

    /// Check if this error indicates a context overflow
    pub fn is_context_overflow(&self) -> bool {
        match self {
            Error::Ai(e) => e.is_context_overflow(),
            _ => false,
        }
    }
}
