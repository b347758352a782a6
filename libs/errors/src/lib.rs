//! Unified error handling for the meter acquisition service
//!
//! Every crate surfaces failures through [`MeterError`] at its public
//! boundary. The link layer keeps its own error type and implements
//! [`MeterErrorTrait`] so callers can classify either one the same way.

use thiserror::Error;

/// Service-level error
#[derive(Debug, Error)]
pub enum MeterError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Acquisition is already running")]
    AlreadyRunning,

    /// Device answered with a Modbus exception
    #[error("Protocol error: {protocol}: {message}")]
    Protocol { protocol: String, message: String },

    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Connection failed: {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Timeout waiting for response from {0}")]
    Timeout(String),

    /// Malformed frame (length, CRC, payload size)
    #[error("Modbus error: {0}")]
    Modbus(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type MeterResult<T> = Result<T, MeterError>;

impl MeterError {
    pub fn is_retryable(&self) -> bool {
        MeterErrorTrait::is_retryable(self)
    }
}

impl From<serde_json::Error> for MeterError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl MeterErrorTrait for MeterError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::AlreadyRunning => "ALREADY_RUNNING",
            Self::Protocol { .. } => "PROTOCOL_ERROR",
            Self::Communication(_) => "COMMUNICATION_ERROR",
            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::Timeout(_) => "TIMEOUT",
            Self::Modbus(_) => "MODBUS_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) | Self::InvalidConfig { .. } => ErrorCategory::Configuration,
            Self::AlreadyRunning => ErrorCategory::Conflict,
            Self::Protocol { .. } => ErrorCategory::Protocol,
            Self::Modbus(_) => ErrorCategory::Framing,
            Self::Communication(_) | Self::ConnectionFailed { .. } => ErrorCategory::Connection,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Io(_) | Self::Serialization(_) => ErrorCategory::Storage,
        }
    }
}

/// Coarse classification shared by every error type in the workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    /// Operation not allowed in the current lifecycle state
    Conflict,
    /// Port missing, busy, closed or failing I/O
    Connection,
    Timeout,
    /// Frame arrived but failed structural or CRC checks
    Framing,
    /// Well-formed exception response from the device
    Protocol,
    /// Local files (config snapshot)
    Storage,
}

/// Error capability trait
///
/// Implemented by each crate's own error type to expose the common
/// classification.
pub trait MeterErrorTrait: std::error::Error + Send + Sync + 'static {
    /// Stable code for logs and status reporting
    fn error_code(&self) -> &'static str;

    fn category(&self) -> ErrorCategory;

    /// Whether another attempt on the same link may succeed
    fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Connection
                | ErrorCategory::Timeout
                | ErrorCategory::Framing
                | ErrorCategory::Protocol
        )
    }
}
