//! Error handling for storage reads
//!
//! This module defines the error types used throughout the library,
//! including the integrity failures raised by the retrying read stream.

use thiserror::Error;

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, StorageError>;

/// Error types that can occur while reading from the storage service
#[derive(Error, Debug)]
pub enum StorageError {
    /// Malformed range string or invalid range values
    #[error("Invalid range: {message}")]
    InvalidRange { message: String },

    /// Invalid parameter
    #[error("Invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },

    /// The service response is missing data the client relies on
    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    /// The body ended short and the retry budget is spent
    #[error(
        "Data corruption failure: received less data than required and reached max retries. \
         First missing offset: {first_missing}, data needed offset: {end}, \
         retries: {retries}, max retries: {max_retries}"
    )]
    IncompleteRead {
        /// First byte the consumer has not received
        first_missing: u64,
        end: u64,
        retries: u32,
        max_retries: u32,
    },

    /// The body produced more bytes than the requested range
    #[error(
        "Data corruption failure: received more data than original request, \
         data needed offset is {end}, received offset: {received}"
    )]
    OverRead { received: u64, end: u64 },

    /// Error raised by the transport layer or the body stream itself
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Operation was cancelled
    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StorageError {
    /// Create a new invalid range error
    pub fn invalid_range(message: impl Into<String>) -> Self {
        StorageError::InvalidRange {
            message: message.into(),
        }
    }

    /// Create a new invalid parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        StorageError::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a new invalid response error
    pub fn invalid_response(message: impl Into<String>) -> Self {
        StorageError::InvalidResponse {
            message: message.into(),
        }
    }

    /// Create a new transport error
    pub fn transport(message: impl Into<String>) -> Self {
        StorageError::Transport {
            message: message.into(),
        }
    }

    /// Create a new cancelled error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        StorageError::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create a new configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        StorageError::ConfigError {
            message: message.into(),
        }
    }

    /// Whether the error was caused by the caller aborting the operation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StorageError::Cancelled { .. })
    }

    /// Whether the error reports a mismatch between requested and received data
    pub fn is_data_corruption(&self) -> bool {
        matches!(
            self,
            StorageError::IncompleteRead { .. } | StorageError::OverRead { .. }
        )
    }
}

impl From<StorageError> for std::io::Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Io(e) => e,
            StorageError::Cancelled { .. } => {
                std::io::Error::new(std::io::ErrorKind::Interrupted, err)
            }
            StorageError::IncompleteRead { .. } => {
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, err)
            }
            StorageError::OverRead { .. } => {
                std::io::Error::new(std::io::ErrorKind::InvalidData, err)
            }
            other => std::io::Error::other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = StorageError::invalid_range("bad");
        assert!(matches!(err, StorageError::InvalidRange { .. }));

        let err = StorageError::cancelled("read");
        assert!(err.is_cancelled());
        assert!(!err.is_data_corruption());

        let err = StorageError::OverRead {
            received: 10,
            end: 9,
        };
        assert!(err.is_data_corruption());
    }

    #[test]
    fn test_error_display() {
        let err = StorageError::invalid_parameter("end", "must not precede start");
        assert_eq!(
            err.to_string(),
            "Invalid parameter: end - must not precede start"
        );

        let err = StorageError::IncompleteRead {
            first_missing: 500,
            end: 999,
            retries: 5,
            max_retries: 5,
        };
        let text = err.to_string();
        assert!(text.contains("First missing offset: 500"));
        assert!(text.contains("data needed offset: 999"));
        assert!(text.contains("retries: 5, max retries: 5"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io: std::io::Error = StorageError::cancelled("read").into();
        assert_eq!(io.kind(), std::io::ErrorKind::Interrupted);

        let io: std::io::Error = StorageError::OverRead {
            received: 3,
            end: 2,
        }
        .into();
        assert_eq!(io.kind(), std::io::ErrorKind::InvalidData);
    }
}
