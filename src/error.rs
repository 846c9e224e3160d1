//! Error types and result aliases for the faultline crate.
//!
//! This module defines the core error type [`FaultlineError`] and the [`Result`] type alias
//! used throughout the library. Capture calls never fail; errors surface from
//! initialisation, DSN parsing and delivery.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FaultlineError {
    #[error("Invalid DSN: {0}")]
    InvalidDsn(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Transport error: {message}")]
    TransportError {
        message: String,
        retryable: bool,
        retry_after: Option<Duration>,
    },

    #[error("Dispatcher error: {0}")]
    DispatcherError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl FaultlineError {
    /// Build a transport error that should not be retried.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::TransportError {
            message: message.into(),
            retryable: false,
            retry_after: None,
        }
    }

    /// Build a transport error that may succeed on a later attempt.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransportError {
            message: message.into(),
            retryable: true,
            retry_after: None,
        }
    }
}

pub type Result<T> = std::result::Result<T, FaultlineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_dsn_display() {
        let err = FaultlineError::InvalidDsn("missing project id".to_string());
        assert_eq!(err.to_string(), "Invalid DSN: missing project id");
    }

    #[test]
    fn test_config_error_display() {
        let err = FaultlineError::ConfigError("sample_rate out of range".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: sample_rate out of range");
    }

    #[test]
    fn test_transport_error_display() {
        let err = FaultlineError::transient("HTTP 503 Service Unavailable");
        assert_eq!(err.to_string(), "Transport error: HTTP 503 Service Unavailable");
    }

    #[test]
    fn test_permanent_and_transient_flags() {
        match FaultlineError::permanent("HTTP 400") {
            FaultlineError::TransportError { retryable, .. } => assert!(!retryable),
            _ => panic!("Expected TransportError"),
        }

        match FaultlineError::transient("connection reset") {
            FaultlineError::TransportError { retryable, .. } => assert!(retryable),
            _ => panic!("Expected TransportError"),
        }
    }

    #[test]
    fn test_serialization_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: FaultlineError = json_err.into();

        match err {
            FaultlineError::SerializationError(_) => {}
            _ => panic!("Expected SerializationError"),
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: FaultlineError = io_err.into();

        match err {
            FaultlineError::IoError(_) => {}
            _ => panic!("Expected IoError"),
        }
    }

    #[test]
    fn test_error_debug() {
        let err = FaultlineError::DispatcherError("worker gone".to_string());
        let debug_str = format!("{:?}", err);
        assert!(debug_str.contains("DispatcherError"));
    }
}
