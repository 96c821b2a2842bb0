//! Socket-addressed drives

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::line_client::{LineClient, RetryPolicy};
use super::{DeviceFamily, Inverter, PeakRating};
use crate::config::DriveConfig;
use crate::error::{CurtailError, Result};

/// Drive-family inverter
pub struct DriveInverter {
    id: String,
    client: LineClient,
    active_power_parameter: u32,
    setpoint_parameter: u32,
    setpoint_scale: f64,
}

impl DriveInverter {
    pub fn new(id: impl Into<String>, client: LineClient, config: &DriveConfig) -> Self {
        Self {
            id: id.into(),
            client,
            active_power_parameter: config.active_power_parameter,
            setpoint_parameter: config.setpoint_parameter,
            setpoint_scale: config.setpoint_scale,
        }
    }

    pub fn from_config(id: String, config: &DriveConfig) -> Self {
        let client = LineClient::new(
            &id,
            config.port,
            Duration::from_millis(config.timeout_ms),
            Duration::from_millis(config.probe_timeout_ms),
            RetryPolicy::from(&config.retry),
        );
        Self::new(id, client, config)
    }

    fn parse_power(&self, reply: &str) -> Result<f64> {
        reply
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(f64::trunc)
            .ok_or_else(|| {
                CurtailError::device_protocol(&self.id, format!("non-numeric reply '{reply}'"))
            })
    }
}

#[async_trait]
impl Inverter for DriveInverter {
    fn id(&self) -> &str {
        &self.id
    }

    fn family(&self) -> DeviceFamily {
        DeviceFamily::Drive
    }

    async fn active_power(&self) -> Result<f64> {
        self.client.probe().await?;
        let reply = self
            .client
            .request(&format!("REFU.GetParameter {}", self.active_power_parameter))
            .await?;
        let power = self.parse_power(&reply)?;
        debug!("Drive {} active power = {} W", self.id, power);
        Ok(power)
    }

    async fn peak_power(&self) -> Result<PeakRating> {
        Ok(PeakRating::Pooled)
    }

    async fn setpoint_for(&self, factor: f64) -> Result<f64> {
        Ok(factor * self.setpoint_scale)
    }

    async fn apply_setpoint(&self, value: f64) -> Result<()> {
        self.client.probe().await?;
        // Reply is not read back
        self.client
            .send(&format!(
                "REFU.SetParameter {},0,{}",
                self.setpoint_parameter, value
            ))
            .await
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    use super::*;
    use crate::config::RetryConfig;

    /// Fake drive: counts command lines and answers with `reply(n)`
    async fn fake_drive<F>(reply: F) -> (u16, Arc<AtomicUsize>, mpsc::UnboundedReceiver<String>)
    where
        F: Fn(usize) -> Option<&'static str> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let commands = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::unbounded_channel();

        let counter = Arc::clone(&commands);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let mut reader = BufReader::new(stream);
                let mut line = String::new();
                // Probe connections close without sending anything
                if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                    continue;
                }
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(line.trim().to_string());
                if let Some(answer) = reply(n) {
                    let _ = reader.get_mut().write_all(answer.as_bytes()).await;
                }
            }
        });

        (port, commands, rx)
    }

    fn config(port: u16) -> DriveConfig {
        DriveConfig {
            port,
            timeout_ms: 500,
            probe_timeout_ms: 200,
            retry: RetryConfig {
                attempts: 10,
                initial_backoff_ms: 1,
                max_backoff_ms: 4,
            },
            ..DriveConfig::default()
        }
    }

    #[tokio::test]
    async fn test_active_power_truncates_reply() {
        let (port, commands, mut rx) = fake_drive(|_| Some("12345.9\n")).await;
        let drive = DriveInverter::from_config("127.0.0.1".to_string(), &config(port));

        assert_eq!(drive.active_power().await.unwrap(), 12345.0);
        assert_eq!(commands.load(Ordering::SeqCst), 1);
        assert_eq!(rx.recv().await.unwrap(), "REFU.GetParameter 1106");
    }

    #[tokio::test]
    async fn test_empty_replies_are_retried() {
        // First three exchanges close without a reply
        let (port, commands, _rx) = fake_drive(|n| if n < 3 { None } else { Some("250\n") }).await;
        let drive = DriveInverter::from_config("127.0.0.1".to_string(), &config(port));

        assert_eq!(drive.active_power().await.unwrap(), 250.0);
        assert_eq!(commands.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_retries_stop_at_configured_attempts() {
        let (port, commands, _rx) = fake_drive(|_| None).await;
        let drive = DriveInverter::from_config("127.0.0.1".to_string(), &config(port));

        let err = drive.active_power().await.unwrap_err();
        assert!(matches!(err, CurtailError::DeviceTransportError { .. }));
        assert_eq!(commands.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_non_numeric_reply_is_not_retried() {
        let (port, commands, _rx) = fake_drive(|_| Some("ERR\n")).await;
        let drive = DriveInverter::from_config("127.0.0.1".to_string(), &config(port));

        let err = drive.active_power().await.unwrap_err();
        assert!(matches!(err, CurtailError::DeviceProtocolError { .. }));
        assert_eq!(commands.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreachable_drive() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let drive = DriveInverter::from_config("127.0.0.1".to_string(), &config(port));

        assert_eq!(
            drive.active_power().await.unwrap_err(),
            CurtailError::unreachable("127.0.0.1")
        );
        assert_eq!(
            drive.apply_setpoint(100.0).await.unwrap_err(),
            CurtailError::unreachable("127.0.0.1")
        );
    }

    #[tokio::test]
    async fn test_apply_setpoint_sends_scaled_command() {
        let (port, commands, mut rx) = fake_drive(|_| None).await;
        let drive = DriveInverter::from_config("127.0.0.1".to_string(), &config(port));

        let value = drive.setpoint_for(0.5).await.unwrap();
        assert_eq!(value, 500.0);
        drive.apply_setpoint(value).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), "REFU.SetParameter 1162,0,500");
        assert_eq!(commands.load(Ordering::SeqCst), 1);
        assert_eq!(drive.peak_power().await.unwrap(), PeakRating::Pooled);
    }
}
