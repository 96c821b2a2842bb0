//! Service-level error handling
//!
//! Errors that abort startup or end the process. Runtime faults inside the
//! service (device failures, rejected Modbus requests) are absorbed where they
//! happen and never reach this type.

use thiserror::Error;

/// Top-level error type returned by service bootstrap and `main`
#[derive(Debug, Error)]
pub enum ServiceError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ======================================
    // Startup & Runtime Errors
    // ======================================
    #[error("Service startup failed: {0}")]
    StartupFailed(String),

    #[error("Failed to bind {endpoint}: {reason}")]
    BindFailed { endpoint: String, reason: String },

    #[error("Logging initialization failed: {0}")]
    Logging(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    // ======================================
    // File & I/O Errors
    // ======================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using ServiceError
pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 78,  // EX_CONFIG
            Self::BindFailed { .. } => 69, // EX_UNAVAILABLE
            Self::Io(_) => 74,             // EX_IOERR
            Self::StartupFailed(_) | Self::Logging(_) | Self::Runtime(_) => 70,
        }
    }

    /// Whether the error stems from a bad configuration artifact
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
