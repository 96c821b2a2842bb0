//! Service bootstrap
//!
//! Command-line parsing, configuration loading and logging setup. Anything
//! that fails here aborts startup with a `ServiceError`.

use std::path::PathBuf;

use clap::Parser;
use common::{LogConfig, LogGuard};
use errors::ServiceResult;
use tracing::Level;

use crate::config::{AppConfig, DEFAULT_CONFIG_PATH};

/// Command-line arguments for curtailsrv
#[derive(Parser, Debug, Clone)]
#[command(
    name = "curtailsrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Fleet Curtailment Service",
    long_about = None
)]
pub struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides logging.level
    #[arg(short = 'l', long)]
    pub log_level: Option<String>,

    /// Directory for rotated log files; overrides logging.dir
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Log device setpoints instead of applying them
    #[arg(long)]
    pub dry_run: bool,

    /// Validation mode - only validate configuration without starting service
    #[arg(long)]
    pub validate: bool,
}

/// Load the configuration file and fold in command-line overrides
pub fn load_configuration(args: &Args) -> ServiceResult<AppConfig> {
    let mut config = AppConfig::load(&args.config)?;
    if args.dry_run {
        config.regulation.dry_run = true;
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if let Some(dir) = &args.log_dir {
        config.logging.dir = Some(dir.clone());
    }
    Ok(config)
}

/// Initialize logging; the guard must live as long as the process
pub fn initialize_logging(config: &AppConfig, args: &Args) -> ServiceResult<LogGuard> {
    let mut log_config = LogConfig::new(&config.service.name);
    log_config.console_level = common::parse_level(&config.logging.level);
    log_config.file_level = Level::DEBUG;
    log_config.log_dir = config.logging.dir.clone();
    log_config.ansi = !args.no_color;
    log_config.json_file = config.logging.json;
    log_config.max_log_files = config.logging.max_files;
    common::init_with_config(log_config)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_default_args() {
        let args = Args::parse_from(["curtailsrv"]);
        assert_eq!(args.config, PathBuf::from("config/curtailsrv.yaml"));
        assert!(args.log_level.is_none());
        assert!(!args.dry_run);
        assert!(!args.validate);
    }

    #[test]
    fn test_cli_overrides() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(b"regulation:\n  dry_run: false\nlogging:\n  level: warn\n")
            .unwrap();
        let path = file.path().to_string_lossy().to_string();

        let args = Args::parse_from(["curtailsrv", "--config", &path]);
        let config = load_configuration(&args).unwrap();
        assert!(!config.regulation.dry_run);
        assert_eq!(config.logging.level, "warn");

        let args = Args::parse_from([
            "curtailsrv",
            "--config",
            &path,
            "--dry-run",
            "-l",
            "debug",
            "--log-dir",
            "/tmp/curtailsrv-logs",
        ]);
        let config = load_configuration(&args).unwrap();
        assert!(config.regulation.dry_run);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.dir, Some(PathBuf::from("/tmp/curtailsrv-logs")));
    }

    #[test]
    fn test_missing_config_is_config_error() {
        let args = Args::parse_from(["curtailsrv", "--config", "/nonexistent/curtailsrv.yaml"]);
        let err = load_configuration(&args).unwrap_err();
        assert!(err.is_config_error());
        assert_eq!(err.exit_code(), 78);
    }
}
