//! Service configuration
//!
//! One YAML file merged with `CURTAILSRV_` environment variables (nested
//! keys split on `__`). Every field has a default; `validate` runs once at
//! startup and is the only place configuration is rejected.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::analog::CurrentLoopScale;
use crate::error::{CurtailError, Result};
use crate::fleet::{DeviceFamily, InverterDescriptor};
use crate::registers::RegisterLayout;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "CURTAILSRV_";

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "config/curtailsrv.yaml";

/// Complete service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceInfo,
    pub logging: LoggingConfig,
    pub gateway: GatewayConfig,
    pub registers: RegisterConfig,
    pub regulation: RegulationConfig,
    pub reporting: ReportingConfig,
    pub metering: MeteringConfig,
    pub drive: DriveConfig,
    pub fleet: FleetConfig,
    pub analog: AnalogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceInfo {
    pub name: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            name: "curtailsrv".to_string(),
        }
    }
}

/// Logging configuration; CLI flags take precedence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Daily-rotated log files are written here when set
    pub dir: Option<PathBuf>,
    pub json: bool,
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            json: false,
            max_files: 7,
        }
    }
}

/// Modbus TCP listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,
}

fn default_bind_address() -> String {
    "0.0.0.0:502".to_string()
}

fn default_status_interval() -> u64 {
    300
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            status_interval_secs: default_status_interval(),
        }
    }
}

/// Status register bit offsets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusBitsConfig {
    pub call_activated: u8,
    pub operating: u8,
    pub ready: u8,
}

impl Default for StatusBitsConfig {
    fn default() -> Self {
        Self {
            call_activated: 0,
            operating: 8,
            ready: 12,
        }
    }
}

/// Register addresses (16-bit words) and initial values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterConfig {
    /// Registers per bank; addresses at or above are out of range
    pub register_count: u16,
    pub aggregate_power: u16,
    pub power_cap: u16,
    pub auxiliary: u16,
    pub status: u16,
    pub status_bits: StatusBitsConfig,
    pub available_power: u16,
    /// Input entry that mirrors the holding setpoint
    pub setpoint_echo: u16,
    pub setpoint: u16,
    pub activation: u16,
    pub activation_bit: u8,
    pub initial_power_cap: f32,
}

impl Default for RegisterConfig {
    fn default() -> Self {
        Self {
            register_count: 14,
            aggregate_power: 0,
            power_cap: 2,
            auxiliary: 4,
            status: 6,
            status_bits: StatusBitsConfig::default(),
            available_power: 8,
            setpoint_echo: 10,
            setpoint: 10,
            activation: 12,
            activation_bit: 0,
            initial_power_cap: 100.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegulationConfig {
    pub interval_secs: u64,
    /// Log device setpoints instead of applying them
    pub dry_run: bool,
}

impl Default for RegulationConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3,
            dry_run: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingConfig {
    pub interval_secs: u64,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self { interval_secs: 5 }
    }
}

/// HTTP metering endpoint shared by all meters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeteringConfig {
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_ms: u64,
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8084".to_string(),
            username: None,
            password: None,
            timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 10,
            initial_backoff_ms: 50,
            max_backoff_ms: 2000,
        }
    }
}

/// Drive line protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveConfig {
    #[serde(default = "default_drive_port")]
    pub port: u16,
    #[serde(default = "default_drive_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_active_power_parameter")]
    pub active_power_parameter: u32,
    #[serde(default = "default_setpoint_parameter")]
    pub setpoint_parameter: u32,
    /// Regulation factor -> native device units
    #[serde(default = "default_setpoint_scale")]
    pub setpoint_scale: f64,
    /// Rated power of all drives together, in watts
    #[serde(default = "default_fleet_peak_power")]
    pub fleet_peak_power: f64,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_drive_port() -> u16 {
    21063
}

fn default_drive_timeout() -> u64 {
    2000
}

fn default_probe_timeout() -> u64 {
    1000
}

fn default_active_power_parameter() -> u32 {
    1106
}

fn default_setpoint_parameter() -> u32 {
    1162
}

fn default_setpoint_scale() -> f64 {
    1000.0
}

fn default_fleet_peak_power() -> f64 {
    579_000.0
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            port: default_drive_port(),
            timeout_ms: default_drive_timeout(),
            probe_timeout_ms: default_probe_timeout(),
            active_power_parameter: default_active_power_parameter(),
            setpoint_parameter: default_setpoint_parameter(),
            setpoint_scale: default_setpoint_scale(),
            fleet_peak_power: default_fleet_peak_power(),
            retry: RetryConfig::default(),
        }
    }
}

/// Static fleet membership
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Upper bound on concurrent device queries per pass
    pub query_concurrency: usize,
    pub inverters: Vec<InverterDescriptor>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            query_concurrency: 4,
            inverters: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalogConfig {
    pub enabled: bool,
    pub scale: CurrentLoopScale,
}

impl AppConfig {
    /// Load from a YAML file plus environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CurtailError::config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        Self::from_figment(
            Figment::new()
                .merge(Yaml::file(path))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    /// Extract and validate
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: AppConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.service.name.is_empty() {
            return Err(CurtailError::config("service.name cannot be empty"));
        }

        self.gateway
            .bind_address
            .parse::<SocketAddr>()
            .map_err(|e| {
                CurtailError::config(format!(
                    "gateway.bind_address '{}' is not a socket address: {e}",
                    self.gateway.bind_address
                ))
            })?;

        for (name, value) in [
            ("gateway.status_interval_secs", self.gateway.status_interval_secs),
            ("regulation.interval_secs", self.regulation.interval_secs),
            ("reporting.interval_secs", self.reporting.interval_secs),
            ("metering.timeout_ms", self.metering.timeout_ms),
            ("drive.timeout_ms", self.drive.timeout_ms),
            ("drive.probe_timeout_ms", self.drive.probe_timeout_ms),
        ] {
            if value == 0 {
                return Err(CurtailError::config(format!("{name} must be greater than 0")));
            }
        }

        RegisterLayout::from_config(&self.registers)?;
        if !self.registers.initial_power_cap.is_finite() {
            return Err(CurtailError::config("registers.initial_power_cap must be finite"));
        }

        if self.drive.port == 0 {
            return Err(CurtailError::config("drive.port cannot be 0"));
        }
        if self.drive.retry.attempts == 0 {
            return Err(CurtailError::config("drive.retry.attempts must be at least 1"));
        }
        if self.drive.retry.max_backoff_ms < self.drive.retry.initial_backoff_ms {
            return Err(CurtailError::config(
                "drive.retry.max_backoff_ms must not be below initial_backoff_ms",
            ));
        }
        if !(self.drive.setpoint_scale.is_finite() && self.drive.setpoint_scale > 0.0) {
            return Err(CurtailError::config("drive.setpoint_scale must be a positive number"));
        }
        if !(self.drive.fleet_peak_power.is_finite() && self.drive.fleet_peak_power >= 0.0) {
            return Err(CurtailError::config(
                "drive.fleet_peak_power must be a non-negative number",
            ));
        }

        if self.fleet.query_concurrency == 0 {
            return Err(CurtailError::config("fleet.query_concurrency must be at least 1"));
        }
        let mut seen = HashSet::new();
        for inverter in &self.fleet.inverters {
            if inverter.id.trim().is_empty() {
                return Err(CurtailError::config("fleet.inverters entries need an id"));
            }
            if !seen.insert(inverter.id.as_str()) {
                return Err(CurtailError::config(format!(
                    "fleet.inverters lists '{}' twice",
                    inverter.id
                )));
            }
        }
        if self.meter_count() > 0
            && !(self.metering.base_url.starts_with("http://")
                || self.metering.base_url.starts_with("https://"))
        {
            return Err(CurtailError::config(format!(
                "metering.base_url '{}' must be an http(s) URL",
                self.metering.base_url
            )));
        }

        if self.analog.enabled {
            self.analog.scale.validate()?;
        }

        Ok(())
    }

    fn meter_count(&self) -> usize {
        self.fleet
            .inverters
            .iter()
            .filter(|i| i.family == DeviceFamily::Meter)
            .count()
    }

    /// One-paragraph overview for `--validate`
    pub fn summary(&self) -> String {
        let meters = self.meter_count();
        format!(
            "service={} gateway={} registers={} regulation={}s{} reporting={}s \
             fleet={} devices ({} meters, {} drives) pooled_peak={}W analog={}",
            self.service.name,
            self.gateway.bind_address,
            self.registers.register_count,
            self.regulation.interval_secs,
            if self.regulation.dry_run { " (dry run)" } else { "" },
            self.reporting.interval_secs,
            self.fleet.inverters.len(),
            meters,
            self.fleet.inverters.len() - meters,
            self.drive.fleet_peak_power,
            if self.analog.enabled { "on" } else { "off" },
        )
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use std::io::Write;

    use figment::providers::Serialized;

    use super::*;

    const SAMPLE: &str = r#"
gateway:
  bind_address: "127.0.0.1:1502"
regulation:
  interval_secs: 3
  dry_run: false
metering:
  base_url: "http://10.0.0.5:8084"
  username: "x"
  password: "admin"
fleet:
  inverters:
    - { id: meter2, family: meter }
    - { id: meter3, family: meter }
    - { id: "192.168.0.221", family: drive }
"#;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.gateway.bind_address, "0.0.0.0:502");
        assert_eq!(config.gateway.status_interval_secs, 300);
        assert_eq!(config.registers.register_count, 14);
        assert_eq!(config.drive.port, 21063);
        assert_eq!(config.drive.fleet_peak_power, 579_000.0);
        assert_eq!(config.drive.retry.attempts, 10);
        assert!(config.regulation.dry_run);
        assert!(!config.analog.enabled);
    }

    #[test]
    fn test_load_from_file() {
        let file = write_temp(SAMPLE);
        let config = AppConfig::load(file.path()).unwrap();

        assert_eq!(config.gateway.bind_address, "127.0.0.1:1502");
        assert!(!config.regulation.dry_run);
        assert_eq!(config.metering.username.as_deref(), Some("x"));
        assert_eq!(config.fleet.inverters.len(), 3);
        assert_eq!(config.fleet.inverters[2], InverterDescriptor::drive("192.168.0.221"));
        // untouched sections keep defaults
        assert_eq!(config.reporting.interval_secs, 5);
        assert_eq!(config.drive.setpoint_parameter, 1162);
        assert!(config.summary().contains("3 devices (2 meters, 1 drives)"));
    }

    #[test]
    fn test_missing_file() {
        let err = AppConfig::load("/nonexistent/curtailsrv.yaml").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_overrides_merge_over_file() {
        let figment = Figment::new()
            .merge(Yaml::string(SAMPLE))
            .merge(Serialized::default("drive.fleet_peak_power", 600_000.0))
            .merge(Serialized::default("regulation.dry_run", true));
        let config = AppConfig::from_figment(figment).unwrap();
        assert_eq!(config.drive.fleet_peak_power, 600_000.0);
        assert!(config.regulation.dry_run);
    }

    #[test]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "curtailsrv.yaml",
                "regulation:\n  dry_run: true\ndrive:\n  fleet_peak_power: 579000.0\n",
            )?;
            jail.set_env("CURTAILSRV_DRIVE__FLEET_PEAK_POWER", "600000");
            jail.set_env("CURTAILSRV_REGULATION__DRY_RUN", "false");

            let config = AppConfig::load("curtailsrv.yaml").map_err(|e| e.to_string())?;
            assert_eq!(config.drive.fleet_peak_power, 600_000.0);
            assert!(!config.regulation.dry_run);
            // untouched keys keep file or default values
            assert_eq!(config.drive.setpoint_parameter, 1162);
            Ok(())
        });
    }

    #[test]
    fn test_unknown_family_rejected() {
        let figment = Figment::new().merge(Yaml::string(
            "fleet:\n  inverters:\n    - { id: x, family: turbine }\n",
        ));
        let err = AppConfig::from_figment(figment).unwrap_err();
        assert!(matches!(err, CurtailError::ConfigError(_)));
        assert!(err.to_string().contains("turbine"));
        let err: errors::ServiceError = err.into();
        assert_eq!(err.exit_code(), 78);
    }

    #[test]
    fn test_validation_failures() {
        let mut config = AppConfig::default();
        config.regulation.interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.gateway.bind_address = "not-an-address".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.registers.setpoint_echo = 9;
        assert!(config.validate().unwrap_err().to_string().contains("overlap"));

        let mut config = AppConfig::default();
        config.fleet.inverters = vec![
            InverterDescriptor::meter("meter2"),
            InverterDescriptor::meter("meter2"),
        ];
        assert!(config.validate().unwrap_err().to_string().contains("twice"));

        let mut config = AppConfig::default();
        config.fleet.inverters = vec![InverterDescriptor::meter("meter2")];
        config.metering.base_url = "ftp://host".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.analog.enabled = true;
        config.analog.scale.max_dac = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.drive.fleet_peak_power = f64::NAN;
        assert!(config.validate().is_err());
    }
}
