//! HTTP-addressed meters
//!
//! Channel values live at `{base_url}/rest/channel/{id}/{channel}` and are
//! exchanged as `{"value": <number>}`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{DeviceFamily, Inverter, PeakRating};
use crate::config::MeteringConfig;
use crate::error::{CurtailError, Result};

pub const ACTIVE_POWER_CHANNEL: &str = "ActivePower";
pub const PEAK_POWER_CHANNEL: &str = "MaxApparentPower";
pub const SETPOINT_CHANNEL: &str = "SetActivePower";

/// Body of a channel read or write
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelValue {
    #[serde(default)]
    pub value: Option<f64>,
}

/// Shared client for the metering endpoint
#[derive(Debug)]
pub struct MeteringClient {
    client: Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
}

impl MeteringClient {
    pub fn new(config: &MeteringConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| CurtailError::config(format!("Failed to build metering client: {e}")))?;

        debug!(
            "Creating metering client: base_url={}, auth={}",
            config.base_url,
            config.username.is_some()
        );

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn channel_url(&self, id: &str, channel: &str) -> String {
        format!("{}/rest/channel/{}/{}", self.base_url, id, channel)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.username {
            Some(user) => request.basic_auth(user, self.password.as_deref()),
            None => request,
        }
    }

    async fn into_value(id: &str, channel: &str, response: reqwest::Response) -> Result<f64> {
        let status = response.status();
        if status != StatusCode::OK {
            return Err(CurtailError::device_protocol(
                id,
                format!("{channel} returned HTTP {status}"),
            ));
        }

        let body: ChannelValue = response.json().await.map_err(|e| {
            CurtailError::device_protocol(id, format!("{channel} body is not a channel value: {e}"))
        })?;

        body.value
            .ok_or_else(|| CurtailError::device_protocol(id, format!("{channel} value is null")))
    }

    /// Read one channel value
    pub async fn read_channel(&self, id: &str, channel: &str) -> Result<f64> {
        let url = self.channel_url(id, channel);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| CurtailError::transport(id, format!("GET {channel}: {e}")))?;

        let value = Self::into_value(id, channel, response).await?;
        debug!("Meter {} {} = {}", id, channel, value);
        Ok(value)
    }

    /// Write one channel value; the endpoint must echo a value back
    pub async fn write_channel(&self, id: &str, channel: &str, value: f64) -> Result<()> {
        let url = self.channel_url(id, channel);
        let response = self
            .authorize(self.client.post(&url))
            .json(&ChannelValue { value: Some(value) })
            .send()
            .await
            .map_err(|e| CurtailError::transport(id, format!("POST {channel}: {e}")))?;

        let echoed = Self::into_value(id, channel, response).await?;
        debug!("Meter {} {} <- {} (echo {})", id, channel, value, echoed);
        Ok(())
    }
}

/// Meter-family inverter
pub struct MeterInverter {
    id: String,
    client: Arc<MeteringClient>,
}

impl MeterInverter {
    pub fn new(id: impl Into<String>, client: Arc<MeteringClient>) -> Self {
        Self {
            id: id.into(),
            client,
        }
    }
}

#[async_trait]
impl Inverter for MeterInverter {
    fn id(&self) -> &str {
        &self.id
    }

    fn family(&self) -> DeviceFamily {
        DeviceFamily::Meter
    }

    async fn active_power(&self) -> Result<f64> {
        self.client
            .read_channel(&self.id, ACTIVE_POWER_CHANNEL)
            .await
    }

    async fn peak_power(&self) -> Result<PeakRating> {
        self.client
            .read_channel(&self.id, PEAK_POWER_CHANNEL)
            .await
            .map(PeakRating::Reported)
    }

    async fn setpoint_for(&self, factor: f64) -> Result<f64> {
        let peak = self
            .client
            .read_channel(&self.id, PEAK_POWER_CHANNEL)
            .await?;
        Ok(factor * peak)
    }

    async fn apply_setpoint(&self, value: f64) -> Result<()> {
        self.client
            .write_channel(&self.id, SETPOINT_CHANNEL, value)
            .await
    }
}
