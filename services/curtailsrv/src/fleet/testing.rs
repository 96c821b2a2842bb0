//! Scripted inverter for aggregation and regulation tests

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{DeviceFamily, Inverter, PeakRating};
use crate::error::{CurtailError, Result};

pub struct StubInverter {
    id: String,
    family: DeviceFamily,
    active: Result<f64>,
    peak: Result<PeakRating>,
    scale: f64,
    pub active_calls: AtomicUsize,
    pub peak_calls: AtomicUsize,
    pub applied: Mutex<Vec<f64>>,
}

impl StubInverter {
    pub fn meter(id: &str, active: f64, peak: f64) -> Self {
        Self {
            id: id.to_string(),
            family: DeviceFamily::Meter,
            active: Ok(active),
            peak: Ok(PeakRating::Reported(peak)),
            scale: peak,
            active_calls: AtomicUsize::new(0),
            peak_calls: AtomicUsize::new(0),
            applied: Mutex::new(Vec::new()),
        }
    }

    pub fn drive(id: &str, active: f64) -> Self {
        Self {
            id: id.to_string(),
            family: DeviceFamily::Drive,
            active: Ok(active),
            peak: Ok(PeakRating::Pooled),
            scale: 1000.0,
            active_calls: AtomicUsize::new(0),
            peak_calls: AtomicUsize::new(0),
            applied: Mutex::new(Vec::new()),
        }
    }

    pub fn unreachable_drive(id: &str) -> Self {
        Self {
            active: Err(CurtailError::unreachable(id)),
            ..Self::drive(id, 0.0)
        }
    }

    pub fn failing_meter(id: &str) -> Self {
        let err = CurtailError::device_protocol(id, "HTTP 500");
        Self {
            active: Err(err.clone()),
            peak: Err(err),
            ..Self::meter(id, 0.0, 0.0)
        }
    }

    pub fn applied(&self) -> Vec<f64> {
        self.applied.lock().clone()
    }
}

#[async_trait]
impl Inverter for StubInverter {
    fn id(&self) -> &str {
        &self.id
    }

    fn family(&self) -> DeviceFamily {
        self.family
    }

    async fn active_power(&self) -> Result<f64> {
        self.active_calls.fetch_add(1, Ordering::SeqCst);
        self.active.clone()
    }

    async fn peak_power(&self) -> Result<PeakRating> {
        self.peak_calls.fetch_add(1, Ordering::SeqCst);
        self.peak.clone()
    }

    async fn setpoint_for(&self, factor: f64) -> Result<f64> {
        self.peak.clone()?;
        Ok(factor * self.scale)
    }

    async fn apply_setpoint(&self, value: f64) -> Result<()> {
        self.active.clone()?;
        self.applied.lock().push(value);
        Ok(())
    }
}
