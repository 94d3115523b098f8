use serde::{Deserialize, Serialize};

/// Shared error type used across all MCP Fleet crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("config: {0}")]
    ConfigInvalid(String),

    #[error("connection: {0}")]
    Connection(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("schema validation: {0}")]
    SchemaValidation(String),

    #[error("execution: {0}")]
    Execution(String),

    #[error("circuit open: {0}")]
    CircuitOpen(String),

    #[error("aborted: {0}")]
    Aborted(String),

    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The stable classification of this error, used in metrics records and
    /// structured tool failures.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConfigInvalid(_) => ErrorKind::ConfigInvalid,
            Error::Connection(_) | Error::Io(_) => ErrorKind::ConnectionError,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::SchemaValidation(_) => ErrorKind::SchemaValidationError,
            Error::Execution(_) | Error::Json(_) => ErrorKind::ExecutionError,
            Error::CircuitOpen(_) => ErrorKind::CircuitOpen,
            Error::Aborted(_) => ErrorKind::Aborted,
            Error::CacheUnavailable(_) => ErrorKind::CacheUnavailable,
        }
    }
}

/// Stable error classification. The `as_str` form is what reaches metrics
/// sinks and cached status entries, so the strings must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConfigInvalid,
    ConnectionError,
    Timeout,
    SchemaValidationError,
    ExecutionError,
    CircuitOpen,
    Aborted,
    CacheUnavailable,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConfigInvalid => "config_invalid",
            ErrorKind::ConnectionError => "connection_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::SchemaValidationError => "schema_validation_error",
            ErrorKind::ExecutionError => "execution_error",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Aborted => "aborted",
            ErrorKind::CacheUnavailable => "cache_unavailable",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(ErrorKind::ConnectionError.as_str(), "connection_error");
        assert_eq!(
            ErrorKind::SchemaValidationError.as_str(),
            "schema_validation_error"
        );
        assert_eq!(ErrorKind::CircuitOpen.as_str(), "circuit_open");
    }

    #[test]
    fn io_errors_classify_as_connection() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe").into();
        assert_eq!(err.kind(), ErrorKind::ConnectionError);
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::Timeout).unwrap();
        assert_eq!(json, "\"timeout\"");
    }
}
