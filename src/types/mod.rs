#![forbid(unsafe_code)]

//! Crate-wide error type and result alias.

use crate::connection::ConnectionError;
use crate::query::errors::{MappingError, TranslationError};

/// Top-level error returned by every fallible `hiveq` operation.
#[derive(thiserror::Error, Debug)]
pub enum HiveError {
    /// The query tree cannot be expressed in the Hive dialect.
    #[error("translation: {0}")]
    Translation(#[from] TranslationError),
    /// A referenced entity, member, or association has no descriptor.
    #[error("mapping: {0}")]
    Mapping(#[from] MappingError),
    /// The connection could not be configured or opened.
    #[error("connection: {0}")]
    Connection(#[from] ConnectionError),
    /// The engine rejected a submitted command.
    #[error("execution failed (status {status}): {message}")]
    Execution {
        /// Status code reported by the engine or client process.
        status: i32,
        /// Message reported by the engine, verbatim.
        message: String,
    },
    /// A result stream observed its cancel token.
    #[error("query cancelled")]
    Cancelled,
    /// Underlying I/O failure.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// API misuse or a violated result-shape expectation.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
}

impl HiveError {
    /// Builds an [`HiveError::Execution`] from a status and message.
    pub fn execution(status: i32, message: impl Into<String>) -> Self {
        HiveError::Execution {
            status,
            message: message.into(),
        }
    }

    /// Stable short code used in CLI output and logs.
    pub fn code(&self) -> &'static str {
        match self {
            HiveError::Translation(err) => err.code(),
            HiveError::Mapping(err) => err.code(),
            HiveError::Connection(_) => "Connection",
            HiveError::Execution { .. } => "Execution",
            HiveError::Cancelled => "Cancelled",
            HiveError::Io(_) => "Io",
            HiveError::Invalid(_) => "Invalid",
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, HiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_error_keeps_server_message() {
        let err = HiveError::execution(40000, "FAILED: SemanticException [Error 10001]");
        assert_eq!(err.code(), "Execution");
        assert_eq!(
            err.to_string(),
            "execution failed (status 40000): FAILED: SemanticException [Error 10001]"
        );
    }

    #[test]
    fn translation_code_passes_through() {
        let err: HiveError = TranslationError::ApplyJoinSurvived.into();
        assert_eq!(err.code(), "ApplyJoinSurvived");
    }
}
