//! Line-oriented ASCII socket client for drives
//!
//! Every call opens a fresh TCP connection, writes one command line and,
//! for requests, reads one reply line.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::RetryConfig;
use crate::error::{CurtailError, Result};

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

/// Socket client for one drive endpoint
#[derive(Debug, Clone)]
pub struct LineClient {
    device: String,
    endpoint: String,
    timeout: Duration,
    probe_timeout: Duration,
    retry: RetryPolicy,
}

impl LineClient {
    pub fn new(
        host: &str,
        port: u16,
        timeout: Duration,
        probe_timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            device: host.to_string(),
            endpoint: format!("{host}:{port}"),
            timeout,
            probe_timeout,
            retry,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Single reachability check: a TCP connect within the probe timeout
    pub async fn probe(&self) -> Result<()> {
        match timeout(self.probe_timeout, TcpStream::connect(&self.endpoint)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => {
                debug!("Probe {} failed: {}", self.endpoint, e);
                Err(CurtailError::unreachable(&self.device))
            },
            Err(_) => {
                debug!("Probe {} timed out", self.endpoint);
                Err(CurtailError::unreachable(&self.device))
            },
        }
    }

    async fn connect(&self) -> Result<TcpStream> {
        TcpStream::connect(&self.endpoint)
            .await
            .map_err(|e| CurtailError::transport(&self.device, format!("connect: {e}")))
    }

    async fn write_line(&self, stream: &mut TcpStream, line: &str) -> Result<()> {
        let mut frame = String::with_capacity(line.len() + 1);
        frame.push_str(line);
        frame.push('\n');
        stream
            .write_all(frame.as_bytes())
            .await
            .map_err(|e| CurtailError::transport(&self.device, format!("write: {e}")))
    }

    async fn exchange(&self, line: &str) -> Result<String> {
        let mut stream = self.connect().await?;
        self.write_line(&mut stream, line).await?;

        let mut reply = String::new();
        BufReader::new(stream)
            .read_line(&mut reply)
            .await
            .map_err(|e| CurtailError::transport(&self.device, format!("read: {e}")))?;

        let reply = reply.trim();
        if reply.is_empty() {
            return Err(CurtailError::transport(&self.device, "empty reply"));
        }
        Ok(reply.to_string())
    }

    async fn deliver(&self, line: &str) -> Result<()> {
        let mut stream = self.connect().await?;
        self.write_line(&mut stream, line).await?;
        if let Err(e) = stream.shutdown().await {
            debug!("{}: shutdown after write failed: {}", self.device, e);
        }
        Ok(())
    }

    /// Run `operation` until it succeeds, fails non-retryably or the attempts run out
    async fn execute<F, Fut, T>(&self, line: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry.attempts {
            if attempt > 1 {
                let delay = self.retry.backoff(attempt - 1);
                info!(
                    "Retry {}/{} for {} '{}' in {:?}",
                    attempt - 1,
                    self.retry.attempts - 1,
                    self.endpoint,
                    line,
                    delay
                );
                tokio::time::sleep(delay).await;
            }

            let result = match timeout(self.timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(CurtailError::transport(
                    &self.device,
                    format!("timed out after {:?}", self.timeout),
                )),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    warn!("Drive {} attempt {} failed: {}", self.endpoint, attempt, e);
                    last_error = Some(e);
                },
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| CurtailError::transport(&self.device, "no attempts configured")))
    }

    /// Send a command and return its trimmed reply line
    pub async fn request(&self, line: &str) -> Result<String> {
        self.execute(line, || self.exchange(line)).await
    }

    /// Send a command without reading a reply
    pub async fn send(&self, line: &str) -> Result<()> {
        self.execute(line, || self.deliver(line)).await
    }
}
