//! Error types for pidata-core

use thiserror::Error;

/// Main error type for the pidata-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error (missing engine binary, unreadable config file)
    #[error("configuration error: {0}")]
    Config(String),

    /// Caller input rejected before any I/O
    #[error("validation error: {0}")]
    Validation(String),

    /// Referenced identifier is unknown to this workspace
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The engine rejected the SQL or failed mid-run; message is the engine's stderr
    #[error("query execution failed: {0}")]
    Execution(String),

    /// Operation aborted through its cancellation token
    #[error("operation cancelled")]
    Cancelled,

    /// Path escape attempt
    #[error("security error: {0}")]
    Security(String),
}

impl Error {
    /// Shorthand for a not-found error.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Stable machine-readable error kind, used at the tool boundary.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Config(_) => "configuration",
            Error::Validation(_) => "validation",
            Error::NotFound { .. } => "not_found",
            Error::Execution(_) => "execution",
            Error::Cancelled => "cancelled",
            Error::Security(_) => "security",
        }
    }
}

/// Result type alias for pidata-core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_are_distinct() {
        assert_eq!(Error::Cancelled.kind(), "cancelled");
        assert_eq!(Error::Execution("boom".into()).kind(), "execution");
        assert_eq!(Error::not_found("result", "r_1").kind(), "not_found");
        assert_eq!(Error::Security("escape".into()).kind(), "security");
    }

    #[test]
    fn test_not_found_message_names_identifier() {
        let err = Error::not_found("notebook", "nb_abc");
        assert_eq!(err.to_string(), "notebook not found: nb_abc");
    }
}
