//! Shared bootstrap library
//!
//! Provides the pieces every service binary needs before it does real work:
//! - logging initialization (console + daily rolling file)
//! - shutdown signal handling

pub mod logging;
pub mod shutdown;

pub use logging::{init_with_config, parse_level, LogConfig, LogGuard};
pub use shutdown::{shutdown_on_signal, wait_for_shutdown};
