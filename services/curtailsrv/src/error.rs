//! Error handling for the curtailment service
//!
//! One enum covers the register/protocol layer, the fleet layer and the
//! soft aggregation signal. Fleet errors never leave the aggregation or
//! regulation boundary; protocol errors become Modbus exception responses.

use errors::ServiceError;
use thiserror::Error;

use crate::registers::Bank;

/// Curtailment service error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CurtailError {
    // ======================================
    // Register / protocol layer
    // ======================================
    /// Span not covered by defined entries or beyond the register count
    #[error("Register span {address}+{count} out of range in {bank} bank")]
    OutOfRange { bank: Bank, address: u16, count: u16 },

    /// Master-path write aimed at the device-owned input bank
    #[error("Write to read-only {bank} register {address}")]
    ReadOnlyViolation { bank: Bank, address: u16 },

    /// Function code not mapped to a bank operation
    #[error("Illegal function: 0x{0:02X}")]
    IllegalFunction(u8),

    /// Request addresses outside the configured register count
    #[error("Illegal data address: {address} (count {count})")]
    IllegalDataAddress { address: u16, count: u16 },

    /// Malformed quantity or byte count in a request
    #[error("Illegal data value: {0}")]
    IllegalDataValue(String),

    /// Float split across a span boundary or decoded from a wrong word count
    #[error("Incomplete encoding: {0}")]
    IncompleteEncoding(String),

    // ======================================
    // Fleet layer
    // ======================================
    #[error("Device {0} unreachable")]
    DeviceUnreachable(String),

    #[error("Device {device} transport error: {message}")]
    DeviceTransportError { device: String, message: String },

    #[error("Device {device} protocol error: {message}")]
    DeviceProtocolError { device: String, message: String },

    // ======================================
    // Soft
    // ======================================
    /// At least one device contributed zero because of a lower-layer failure
    #[error("Aggregation degraded: {failed} of {total} devices contributed zero")]
    AggregationDegraded { failed: usize, total: usize },

    // ======================================
    // Ambient
    // ======================================
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(String),
}

/// Result type alias for the curtailment service
pub type Result<T> = std::result::Result<T, CurtailError>;

impl CurtailError {
    pub fn config(msg: impl Into<String>) -> Self {
        CurtailError::ConfigError(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        CurtailError::IoError(msg.into())
    }

    pub fn incomplete(msg: impl Into<String>) -> Self {
        CurtailError::IncompleteEncoding(msg.into())
    }

    pub fn illegal_value(msg: impl Into<String>) -> Self {
        CurtailError::IllegalDataValue(msg.into())
    }

    pub fn unreachable(device: impl Into<String>) -> Self {
        CurtailError::DeviceUnreachable(device.into())
    }

    pub fn transport(device: impl Into<String>, msg: impl std::fmt::Display) -> Self {
        CurtailError::DeviceTransportError {
            device: device.into(),
            message: msg.to_string(),
        }
    }

    pub fn device_protocol(device: impl Into<String>, msg: impl std::fmt::Display) -> Self {
        CurtailError::DeviceProtocolError {
            device: device.into(),
            message: msg.to_string(),
        }
    }

    /// Transport-level failures are worth another attempt; a well-formed rejection is not
    pub fn is_retryable(&self) -> bool {
        matches!(self, CurtailError::DeviceTransportError { .. })
    }

    /// Modbus exception code reported to the master, if this is a protocol-layer error
    pub fn exception_code(&self) -> Option<u8> {
        match self {
            CurtailError::IllegalFunction(_) | CurtailError::ReadOnlyViolation { .. } => Some(0x01),
            CurtailError::IllegalDataAddress { .. }
            | CurtailError::OutOfRange { .. }
            | CurtailError::IncompleteEncoding(_) => Some(0x02),
            CurtailError::IllegalDataValue(_) => Some(0x03),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CurtailError {
    fn from(err: std::io::Error) -> Self {
        CurtailError::IoError(err.to_string())
    }
}

impl From<figment::Error> for CurtailError {
    fn from(err: figment::Error) -> Self {
        CurtailError::ConfigError(err.to_string())
    }
}

impl From<CurtailError> for ServiceError {
    fn from(err: CurtailError) -> Self {
        match err {
            CurtailError::ConfigError(msg) => ServiceError::Configuration(msg),
            CurtailError::IoError(msg) => ServiceError::StartupFailed(msg),
            other => ServiceError::Runtime(other.to_string()),
        }
    }
}
