//! Domain error types for qabench.
//!
//! Typed errors at module boundaries; command handlers wrap them in
//! `anyhow::Error` with context and can still downcast when they need to.

use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Provider errors
// ---------------------------------------------------------------------------

/// Errors from LLM provider operations (serving endpoint or judge).
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Failed to read response body: {0}")]
    ResponseReadError(String),

    #[error("Failed to parse response JSON: {0}")]
    JsonParseError(String),

    #[error("Authentication failed (status {status}): {message}")]
    AuthError { status: u16, message: String },

    #[error("Server error (status {status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Response contained no message content")]
    EmptyResponse,

    #[error("Endpoint {0} is unreachable")]
    Unreachable(String),
}

impl ProviderError {
    /// Map a non-success HTTP status and body to the matching variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => ProviderError::AuthError {
                status,
                message: body,
            },
            _ => ProviderError::ServerError {
                status,
                message: body,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Dataset errors
// ---------------------------------------------------------------------------

/// Errors raised while loading the QA dataset. All of them are fatal.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Cannot read dataset {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Dataset {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid QA file schema: expected object with 'qa_pairs': {0}")]
    MissingPairs(PathBuf),

    #[error("Invalid QA file schema: 'qa_pairs' must be a list of {{question, answer}} objects: {0}")]
    MalformedPairs(PathBuf),
}

// ---------------------------------------------------------------------------
// Record store errors
// ---------------------------------------------------------------------------

/// Errors loading answers/log files. Writes go through `write_atomic`.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0} is empty")]
    Empty(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_auth() {
        let err = ProviderError::from_status(401, "bad key".into());
        assert!(matches!(err, ProviderError::AuthError { status: 401, .. }));
    }

    #[test]
    fn test_from_status_server() {
        let err = ProviderError::from_status(503, "overloaded".into());
        assert!(matches!(err, ProviderError::ServerError { status: 503, .. }));
        assert!(err.to_string().contains("overloaded"));
    }

    #[test]
    fn test_missing_pairs_message_names_key() {
        let err = DatasetError::MissingPairs(PathBuf::from("qa.json"));
        assert!(err.to_string().contains("qa_pairs"));
        assert!(err.to_string().contains("qa.json"));
    }

    #[test]
    fn test_record_error_names_path() {
        let err = RecordError::Empty(PathBuf::from("results/qwen3:8b-en.json"));
        assert_eq!(err.to_string(), "results/qwen3:8b-en.json is empty");
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = RecordError::Parse {
            path: PathBuf::from("run.log"),
            source,
        };
        assert!(err.to_string().starts_with("run.log is not valid JSON"));
    }
}
