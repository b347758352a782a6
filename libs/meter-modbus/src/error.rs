//! Link-level error types
//!
//! Every failure on the acquisition path falls into one of four
//! [`FailureKind`]s. The poller only cares whether a failure consumes a retry
//! slot (all of them do), the controller uses the kind for status reporting.

use errors::{ErrorCategory, MeterError, MeterErrorTrait};
use thiserror::Error;

use crate::frame::{exception_description, Frame};

/// Result type for meter-modbus operations
pub type Result<T> = std::result::Result<T, ModbusError>;

/// Modbus RTU link errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModbusError {
    /// Fewer bytes than the frame layout requires
    #[error("Frame too short: got {actual} bytes, need {needed}")]
    FrameTooShort { actual: usize, needed: usize },

    /// Locally computed CRC disagrees with the transmitted one
    #[error("CRC mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },

    /// Slave answered with an exception response. The parsed frame is kept
    /// for diagnostics.
    #[error("Modbus exception 0x{code:02X} ({}) from slave {}", describe(.code), .frame.slave_id)]
    Exception { frame: Frame, code: u8 },

    /// Payload shorter than the requested register count
    #[error("Short payload: expected {expected} bytes, got {actual}")]
    ShortPayload { expected: usize, actual: usize },

    /// Transport is closed
    #[error("Port not open")]
    NotOpen,

    /// Transport is already open
    #[error("Port already open")]
    AlreadyOpen,

    /// Nothing (or fewer than a minimal frame) came back
    #[error("No response from slave {0}")]
    NoResponse(u8),

    /// Read timed out with no data
    #[error("Timeout: {0}")]
    Timeout(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(String),

    /// Port could not be opened or was lost
    #[error("Connection error: {0}")]
    Connection(String),

    /// Serial parameters rejected before opening
    #[error("Invalid configuration: {field}: {reason}")]
    Config { field: &'static str, reason: String },
}

fn describe(code: &u8) -> &'static str {
    exception_description(*code)
}

/// Coarse classification of link failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Port not open, write failure, read timeout, no response
    Transport,
    /// Too-short frame, CRC mismatch, short payload
    Framing,
    /// Device returned an exception response
    Exception,
    /// Missing port or invalid slave address
    Configuration,
}

impl ModbusError {
    pub fn io(msg: impl Into<String>) -> Self {
        ModbusError::Io(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        ModbusError::Timeout(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        ModbusError::Connection(msg.into())
    }

    pub fn config(field: &'static str, reason: impl Into<String>) -> Self {
        ModbusError::Config {
            field,
            reason: reason.into(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> FailureKind {
        match self {
            ModbusError::FrameTooShort { .. }
            | ModbusError::CrcMismatch { .. }
            | ModbusError::ShortPayload { .. } => FailureKind::Framing,
            ModbusError::Exception { .. } => FailureKind::Exception,
            ModbusError::Config { .. } => FailureKind::Configuration,
            ModbusError::NotOpen
            | ModbusError::AlreadyOpen
            | ModbusError::NoResponse(_)
            | ModbusError::Timeout(_)
            | ModbusError::Io(_)
            | ModbusError::Connection(_) => FailureKind::Transport,
        }
    }

    /// Frame carried by an exception response, if any
    pub fn frame(&self) -> Option<&Frame> {
        match self {
            ModbusError::Exception { frame, .. } => Some(frame),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::TimedOut {
            ModbusError::Timeout(err.to_string())
        } else {
            ModbusError::Io(err.to_string())
        }
    }
}

impl MeterErrorTrait for ModbusError {
    fn error_code(&self) -> &'static str {
        match self {
            ModbusError::FrameTooShort { .. } => "FRAME_TOO_SHORT",
            ModbusError::CrcMismatch { .. } => "CRC_MISMATCH",
            ModbusError::Exception { .. } => "MODBUS_EXCEPTION",
            ModbusError::ShortPayload { .. } => "SHORT_PAYLOAD",
            ModbusError::NotOpen => "PORT_NOT_OPEN",
            ModbusError::AlreadyOpen => "PORT_ALREADY_OPEN",
            ModbusError::NoResponse(_) => "NO_RESPONSE",
            ModbusError::Timeout(_) => "TIMEOUT",
            ModbusError::Io(_) => "IO_ERROR",
            ModbusError::Connection(_) => "CONNECTION_FAILED",
            ModbusError::Config { .. } => "INVALID_CONFIG",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self.kind() {
            FailureKind::Framing => ErrorCategory::Framing,
            FailureKind::Exception => ErrorCategory::Protocol,
            FailureKind::Configuration => ErrorCategory::Configuration,
            FailureKind::Transport => match self {
                ModbusError::Timeout(_) | ModbusError::NoResponse(_) => ErrorCategory::Timeout,
                _ => ErrorCategory::Connection,
            },
        }
    }
}

impl From<ModbusError> for MeterError {
    fn from(err: ModbusError) -> Self {
        match err {
            ModbusError::Config { field, reason } => MeterError::InvalidConfig {
                field: field.to_string(),
                reason,
            },
            ModbusError::Timeout(msg) => MeterError::Timeout(msg),
            ModbusError::NoResponse(slave) => MeterError::Timeout(format!("slave {}", slave)),
            ModbusError::Connection(reason) => MeterError::ConnectionFailed {
                endpoint: "serial".to_string(),
                reason,
            },
            ModbusError::NotOpen | ModbusError::AlreadyOpen | ModbusError::Io(_) => {
                MeterError::Communication(err.to_string())
            },
            ModbusError::Exception { .. } => MeterError::Protocol {
                protocol: "Modbus RTU".to_string(),
                message: err.to_string(),
            },
            ModbusError::FrameTooShort { .. }
            | ModbusError::CrcMismatch { .. }
            | ModbusError::ShortPayload { .. } => MeterError::Modbus(err.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_failure_kinds() {
        assert_eq!(
            ModbusError::CrcMismatch {
                expected: 1,
                actual: 2
            }
            .kind(),
            FailureKind::Framing
        );
        assert_eq!(ModbusError::NotOpen.kind(), FailureKind::Transport);
        assert_eq!(
            ModbusError::config("port", "empty").kind(),
            FailureKind::Configuration
        );
    }

    #[test]
    fn test_exception_display_and_frame() {
        let frame = Frame {
            slave_id: 0x0C,
            function: 0x83,
            data: vec![0x02],
            crc: 0,
        };
        let err = ModbusError::Exception {
            frame: frame.clone(),
            code: 0x02,
        };
        assert_eq!(
            err.to_string(),
            "Modbus exception 0x02 (Illegal Data Address) from slave 12"
        );
        assert_eq!(err.frame(), Some(&frame));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_conversion_to_meter_error() {
        let err: MeterError = ModbusError::config("slave_id", "must be 1..=247").into();
        assert!(matches!(err, MeterError::InvalidConfig { ref field, .. } if field == "slave_id"));

        let err: MeterError = ModbusError::NoResponse(3).into();
        assert!(matches!(err, MeterError::Timeout(_)));
    }

    #[test]
    fn test_io_timeout_maps_to_timeout() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out");
        assert!(matches!(ModbusError::from(io), ModbusError::Timeout(_)));
    }
}
