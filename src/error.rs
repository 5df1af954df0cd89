//! Error taxonomy shared by the stores and the transfer pipeline.
//!
//! Messages name the asset or the step that failed, never a filesystem path,
//! so they can be logged verbatim and mapped to client responses.

use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The document or request is malformed (e.g. missing project name).
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Import session {0} not found or expired")]
    SessionNotFound(Uuid),

    /// Exclusive create lost against an existing pool entry.
    #[error("Asset already exists: {0}")]
    AlreadyExists(String),

    /// Not a zip, missing `data.json`, or invalid JSON.
    #[error("Invalid archive: {0}")]
    Format(String),

    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Import commit failed on {filename}: {source}")]
    CommitFailed {
        filename: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::SessionNotFound(_))
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(e: zip::result::ZipError) -> Self {
        match e {
            zip::result::ZipError::Io(source) => Self::io("reading archive", source),
            other => Self::Format(other.to_string()),
        }
    }
}
