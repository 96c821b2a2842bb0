//! Inverter fleet
//!
//! Two device families sit behind one object-safe trait. Aggregation and
//! regulation only ever see `Arc<dyn Inverter>`.

pub mod drive;
pub mod line_client;
pub mod meter;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

pub use drive::DriveInverter;
pub use line_client::{LineClient, RetryPolicy};
pub use meter::{MeterInverter, MeteringClient};

use crate::config::{DriveConfig, FleetConfig, MeteringConfig};
use crate::error::Result;

/// Device family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceFamily {
    /// Addressed through the HTTP channel API
    Meter,
    /// Addressed through the raw-socket line protocol
    Drive,
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceFamily::Meter => write!(f, "meter"),
            DeviceFamily::Drive => write!(f, "drive"),
        }
    }
}

/// Static fleet membership entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InverterDescriptor {
    /// Logical meter name or network address
    pub id: String,
    pub family: DeviceFamily,
}

impl InverterDescriptor {
    pub fn meter(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            family: DeviceFamily::Meter,
        }
    }

    pub fn drive(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            family: DeviceFamily::Drive,
        }
    }
}

/// Rated power of one device
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PeakRating {
    /// Device-reported rating in watts
    Reported(f64),
    /// Covered by the fleet-wide drive constant
    Pooled,
}

/// Uniform query/command surface over every device family
#[async_trait]
pub trait Inverter: Send + Sync {
    fn id(&self) -> &str;

    fn family(&self) -> DeviceFamily;

    /// Current active power in watts
    async fn active_power(&self) -> Result<f64>;

    async fn peak_power(&self) -> Result<PeakRating>;

    /// Device command value for a regulation factor
    async fn setpoint_for(&self, factor: f64) -> Result<f64>;

    async fn apply_setpoint(&self, value: f64) -> Result<()>;
}

/// Configured set of devices
pub struct InverterFleet {
    devices: Vec<Arc<dyn Inverter>>,
    query_concurrency: usize,
}

impl InverterFleet {
    pub fn new(devices: Vec<Arc<dyn Inverter>>, query_concurrency: usize) -> Self {
        Self {
            devices,
            query_concurrency: query_concurrency.max(1),
        }
    }

    /// One device per descriptor; all meters share a single metering client
    pub fn from_config(
        fleet: &FleetConfig,
        metering: &MeteringConfig,
        drive: &DriveConfig,
    ) -> Result<Self> {
        let metering_client = Arc::new(MeteringClient::new(metering)?);

        let devices = fleet
            .inverters
            .iter()
            .map(|descriptor| -> Arc<dyn Inverter> {
                match descriptor.family {
                    DeviceFamily::Meter => Arc::new(MeterInverter::new(
                        descriptor.id.clone(),
                        Arc::clone(&metering_client),
                    )),
                    DeviceFamily::Drive => {
                        Arc::new(DriveInverter::from_config(descriptor.id.clone(), drive))
                    },
                }
            })
            .collect::<Vec<_>>();

        let meters = devices
            .iter()
            .filter(|d| d.family() == DeviceFamily::Meter)
            .count();
        info!(
            "Fleet configured: {} devices ({} meters, {} drives)",
            devices.len(),
            meters,
            devices.len() - meters
        );

        Ok(Self::new(devices, fleet.query_concurrency))
    }

    pub fn devices(&self) -> &[Arc<dyn Inverter>] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn query_concurrency(&self) -> usize {
        self.query_concurrency
    }
}
