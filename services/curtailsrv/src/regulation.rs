//! Regulation and reporting loops
//!
//! Regulation: `Idle -> PollActivation -> (Regulating | Idle)` once per tick.
//! Reporting: writes fleet active power into the input bank.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use crate::aggregator::{FleetReading, PowerAggregator};
use crate::analog::{AnalogOutput, CurrentLoopScale};
use crate::error::Result;
use crate::fleet::{Inverter, InverterFleet};
use crate::registers::{Bank, RegisterMap};

/// Proportional factor, undefined for a non-positive fleet rating
pub fn regulation_factor(setpoint: f64, total_peak_power: f64) -> Option<f64> {
    (total_peak_power > 0.0).then(|| setpoint / total_peak_power)
}

/// Observable result of one regulation tick
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Activation bit clear
    Idle,
    Skipped(String),
    Regulated {
        factor: f64,
        /// Devices that received (or in dry run, would receive) a setpoint
        commanded: usize,
        failed: usize,
    },
}

/// Activation-gated setpoint dispatch
pub struct RegulationLoop {
    map: Arc<RegisterMap>,
    fleet: Arc<InverterFleet>,
    aggregator: PowerAggregator,
    dry_run: bool,
}

impl RegulationLoop {
    pub fn new(
        map: Arc<RegisterMap>,
        fleet: Arc<InverterFleet>,
        aggregator: PowerAggregator,
        dry_run: bool,
    ) -> Self {
        Self {
            map,
            fleet,
            aggregator,
            dry_run,
        }
    }

    fn skip(reason: String) -> TickOutcome {
        error!("Regulation tick skipped: {}", reason);
        TickOutcome::Skipped(reason)
    }

    pub async fn tick(&self) -> TickOutcome {
        let points = *self.map.layout().points();

        let active = match self.map.read_bit(
            Bank::Holding,
            points.activation.address,
            points.activation.bit,
        ) {
            Ok(active) => active,
            Err(e) => return Self::skip(format!("activation read failed: {e}")),
        };
        debug!("Polling activation: {}", active);
        if !active {
            return TickOutcome::Idle;
        }

        let peak = self.aggregator.total_peak_power(&self.fleet).await;
        let setpoint = match self.map.read_f32(Bank::Holding, points.setpoint) {
            Ok(value) if value.is_finite() => f64::from(value),
            Ok(value) => return Self::skip(format!("setpoint {value} is not a finite number")),
            Err(e) => return Self::skip(format!("setpoint read failed: {e}")),
        };
        let Some(factor) = regulation_factor(setpoint, peak.total) else {
            return Self::skip(format!("total peak power {} is not positive", peak.total));
        };

        info!(
            "Regulating {} devices: setpoint={} total_peak_power={} factor={}",
            self.fleet.len(),
            setpoint,
            peak.total,
            factor
        );

        let commands: Vec<_> = self
            .fleet
            .devices()
            .iter()
            .cloned()
            .map(|device| command(device, factor, self.dry_run))
            .collect();
        let results = stream::iter(commands)
            .buffer_unordered(self.fleet.query_concurrency())
            .collect::<Vec<_>>()
            .await;

        let mut commanded = 0;
        let mut failed = 0;
        for (id, result) in results {
            match result {
                Ok(()) => commanded += 1,
                Err(e) => {
                    warn!("Setpoint for {} failed: {}", id, e);
                    failed += 1;
                },
            }
        }

        TickOutcome::Regulated {
            factor,
            commanded,
            failed,
        }
    }
}

async fn command(device: Arc<dyn Inverter>, factor: f64, dry_run: bool) -> (String, Result<()>) {
    let result = apply(&device, factor, dry_run).await;
    (device.id().to_string(), result)
}

async fn apply(device: &Arc<dyn Inverter>, factor: f64, dry_run: bool) -> Result<()> {
    let value = device.setpoint_for(factor).await?;
    if dry_run {
        info!(
            "Dry run: {} {} setpoint would be {:.4}",
            device.family(),
            device.id(),
            value
        );
        return Ok(());
    }
    device.apply_setpoint(value).await?;
    info!("{} {} setpoint {:.4} applied", device.family(), device.id(), value);
    Ok(())
}

/// Publishes fleet active power to the register map and the analog output
pub struct ReportingLoop {
    map: Arc<RegisterMap>,
    fleet: Arc<InverterFleet>,
    aggregator: PowerAggregator,
    analog: Option<(CurrentLoopScale, Arc<dyn AnalogOutput>)>,
}

impl ReportingLoop {
    pub fn new(map: Arc<RegisterMap>, fleet: Arc<InverterFleet>, aggregator: PowerAggregator) -> Self {
        Self {
            map,
            fleet,
            aggregator,
            analog: None,
        }
    }

    pub fn with_analog(mut self, scale: CurrentLoopScale, output: Arc<dyn AnalogOutput>) -> Self {
        self.analog = Some((scale, output));
        self
    }

    pub async fn tick(&self) -> FleetReading {
        let reading = self.aggregator.total_active_power(&self.fleet).await;
        info!("Total active power: {} kW", reading.total);

        if let Some((scale, output)) = &self.analog {
            if let Err(e) = output.write(scale.dac_value(reading.total)) {
                error!("Analog output write failed: {}", e);
            }
        }

        let address = self.map.layout().points().aggregate_power;
        if let Err(e) = self.map.set_input_f32(address, reading.total as f32) {
            error!("Failed to publish aggregate power: {}", e);
        }
        reading
    }
}
