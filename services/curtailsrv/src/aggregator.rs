//! Fleet-wide power totals
//!
//! Device failures never abort a pass: the device contributes zero and is
//! listed in the reading so callers can see the degradation.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::warn;

use crate::error::{CurtailError, Result};
use crate::fleet::{Inverter, InverterFleet, PeakRating};

/// W -> kW
const WATTS_PER_KILOWATT: f64 = 1000.0;

/// Result of one aggregation pass
#[derive(Debug, Clone, PartialEq)]
pub struct FleetReading {
    pub total: f64,
    pub devices: usize,
    /// Devices that contributed zero, with the absorbed error
    pub failures: Vec<(String, CurtailError)>,
}

impl FleetReading {
    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn degradation(&self) -> Option<CurtailError> {
        self.is_degraded().then(|| CurtailError::AggregationDegraded {
            failed: self.failures.len(),
            total: self.devices,
        })
    }

    fn log_degradation(&self, what: &str) {
        if let Some(soft) = self.degradation() {
            for (id, err) in &self.failures {
                warn!("{} of {} counted as zero: {}", what, id, err);
            }
            warn!("{}: {}", what, soft);
        }
    }
}

async fn query_active(device: Arc<dyn Inverter>) -> (String, Result<f64>) {
    let result = device.active_power().await;
    (device.id().to_string(), result)
}

async fn query_peak(device: Arc<dyn Inverter>) -> (String, Result<PeakRating>) {
    let result = device.peak_power().await;
    (device.id().to_string(), result)
}

/// Combines per-device readings into fleet totals
#[derive(Debug, Clone, Copy)]
pub struct PowerAggregator {
    pooled_peak_power: f64,
}

impl PowerAggregator {
    /// `pooled_peak_power` stands in for every device that reports `Pooled`
    pub fn new(pooled_peak_power: f64) -> Self {
        Self { pooled_peak_power }
    }

    /// Sum of active power in kW
    pub async fn total_active_power(&self, fleet: &InverterFleet) -> FleetReading {
        let queries: Vec<_> = fleet.devices().iter().cloned().map(query_active).collect();
        let results = stream::iter(queries)
            .buffer_unordered(fleet.query_concurrency())
            .collect::<Vec<_>>()
            .await;

        let mut watts = 0.0;
        let mut failures = Vec::new();
        for (id, result) in results {
            match result {
                Ok(power) => watts += power,
                Err(err) => failures.push((id, err)),
            }
        }

        let reading = FleetReading {
            total: watts / WATTS_PER_KILOWATT,
            devices: fleet.len(),
            failures,
        };
        reading.log_degradation("Active power");
        reading
    }

    /// Sum of rated power, plus the pooled constant if any device is pooled
    pub async fn total_peak_power(&self, fleet: &InverterFleet) -> FleetReading {
        let queries: Vec<_> = fleet.devices().iter().cloned().map(query_peak).collect();
        let results = stream::iter(queries)
            .buffer_unordered(fleet.query_concurrency())
            .collect::<Vec<_>>()
            .await;

        let mut total = 0.0;
        let mut pooled = false;
        let mut failures = Vec::new();
        for (id, result) in results {
            match result {
                Ok(PeakRating::Reported(peak)) => total += peak,
                Ok(PeakRating::Pooled) => pooled = true,
                Err(err) => failures.push((id, err)),
            }
        }
        if pooled {
            total += self.pooled_peak_power;
        }

        let reading = FleetReading {
            total,
            devices: fleet.len(),
            failures,
        };
        reading.log_degradation("Peak power");
        reading
    }
}
