//! 4-20 mA current-loop output

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{CurtailError, Result};

/// Linear mapping from aggregate power (kW) to DAC counts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurrentLoopScale {
    pub min_power: f64,
    pub max_power: f64,
    pub min_dac: u16,
    pub max_dac: u16,
}

impl Default for CurrentLoopScale {
    fn default() -> Self {
        Self {
            min_power: -1200.0,
            max_power: 1200.0,
            min_dac: 745,
            max_dac: 3723,
        }
    }
}

impl CurrentLoopScale {
    pub fn validate(&self) -> Result<()> {
        if !(self.max_power > self.min_power) {
            return Err(CurtailError::config(format!(
                "analog.max_power ({}) must be greater than analog.min_power ({})",
                self.max_power, self.min_power
            )));
        }
        if self.max_dac <= self.min_dac {
            return Err(CurtailError::config(format!(
                "analog.max_dac ({}) must be greater than analog.min_dac ({})",
                self.max_dac, self.min_dac
            )));
        }
        Ok(())
    }

    /// DAC value for `power`, rounded and clamped to the DAC range
    pub fn dac_value(&self, power: f64) -> u16 {
        let min_dac = f64::from(self.min_dac);
        let max_dac = f64::from(self.max_dac);
        let slope = (max_dac - min_dac) / (self.max_power - self.min_power);
        let dac = (min_dac + slope * (power - self.min_power)).round();
        if dac.is_nan() {
            return self.min_dac;
        }
        dac.clamp(min_dac, max_dac) as u16
    }
}

/// Narrow interface to the analog output hardware
pub trait AnalogOutput: Send + Sync {
    fn write(&self, dac_value: u16) -> Result<()>;
}

/// Output that only records the value in the log
#[derive(Debug, Default)]
pub struct LoggingOutput;

impl AnalogOutput for LoggingOutput {
    fn write(&self, dac_value: u16) -> Result<()> {
        info!("Calculated DAC value: {}", dac_value);
        Ok(())
    }
}
