//! Error types for the Snowflow client

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to the warehouse
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Endpoint returned an error status code
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the endpoint
        message: String,
    },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Login was rejected
    #[error("Login failed: {0}")]
    LoginFailed(String),

    /// Statement was rejected or failed remotely
    #[error("Query failed ({code}, SQL state {sql_state}): {message}\n  statement: {statement}")]
    QueryFailed {
        code: String,
        sql_state: String,
        message: String,
        statement: String,
    },

    /// Stage upload command failed
    #[error("Stage upload failed: {0}")]
    UploadFailed(String),
}

impl ClientError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_message() {
        let err = ClientError::api_error(403, "Forbidden");
        assert!(matches!(err, ClientError::ApiError { status: 403, .. }));
        assert_eq!(err.to_string(), "API error (status 403): Forbidden");
    }

    #[test]
    fn test_query_failed_message() {
        let err = ClientError::QueryFailed {
            code: "002003".into(),
            sql_state: "02000".into(),
            message: "Stage does not exist".into(),
            statement: "drop stage X;".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("002003"));
        assert!(msg.contains("drop stage X;"));
    }
}
