//! curtailsrv - fleet curtailment service
//!
//! Exposes a virtual Modbus TCP device carrying a curtailment setpoint and an
//! activation flag, regulates a heterogeneous inverter fleet proportionally to
//! that setpoint, and reports aggregate fleet power back onto the same link.

pub mod aggregator;
pub mod analog;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod fleet;
pub mod gateway;
pub mod registers;
pub mod regulation;
pub mod runtime;
pub mod scheduler;
pub mod status;

pub use config::AppConfig;
pub use error::{CurtailError, Result};
pub use runtime::Runtime;

/// Service name used for logs and the default configuration file
pub const SERVICE_NAME: &str = "curtailsrv";
