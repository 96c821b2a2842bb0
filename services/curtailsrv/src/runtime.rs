//! Service runtime
//!
//! Builds every component from one `AppConfig`, binds the gateway and spawns
//! the periodic tasks. All tasks share one cancellation token.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use errors::{ServiceError, ServiceResult};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::aggregator::PowerAggregator;
use crate::analog::{AnalogOutput, LoggingOutput};
use crate::config::AppConfig;
use crate::fleet::InverterFleet;
use crate::gateway::ModbusGateway;
use crate::regulation::{RegulationLoop, ReportingLoop};
use crate::registers::RegisterMap;
use crate::scheduler::PeriodicTask;
use crate::status::StatusReporter;

/// Running service
pub struct Runtime {
    token: CancellationToken,
    local_addr: SocketAddr,
    map: Arc<RegisterMap>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl Runtime {
    /// Construct and start all components
    pub async fn start(config: &AppConfig, token: CancellationToken) -> ServiceResult<Self> {
        let map = Arc::new(RegisterMap::from_config(&config.registers)?);
        let fleet = Arc::new(InverterFleet::from_config(
            &config.fleet,
            &config.metering,
            &config.drive,
        )?);
        let aggregator = PowerAggregator::new(config.drive.fleet_peak_power);

        let gateway = ModbusGateway::bind(&config.gateway.bind_address, Arc::clone(&map)).await?;
        let local_addr = gateway.local_addr()?;

        let mut handles = Vec::new();
        handles.push(("gateway", tokio::spawn(gateway.serve(token.child_token()))));

        if config.regulation.dry_run {
            warn!("Regulation runs in dry-run mode: setpoints are logged, not applied");
        }
        let regulation = Arc::new(RegulationLoop::new(
            Arc::clone(&map),
            Arc::clone(&fleet),
            aggregator,
            config.regulation.dry_run,
        ));
        let task = PeriodicTask::new(
            "regulation",
            Duration::from_secs(config.regulation.interval_secs),
        );
        handles.push((
            "regulation",
            task.spawn(token.child_token(), move || {
                let regulation = Arc::clone(&regulation);
                async move {
                    regulation.tick().await;
                }
            }),
        ));

        let mut reporting = ReportingLoop::new(Arc::clone(&map), Arc::clone(&fleet), aggregator);
        if config.analog.enabled {
            info!("Analog output enabled: {:?}", config.analog.scale);
            let output: Arc<dyn AnalogOutput> = Arc::new(LoggingOutput);
            reporting = reporting.with_analog(config.analog.scale, output);
        }
        let reporting = Arc::new(reporting);
        let task = PeriodicTask::new(
            "reporting",
            Duration::from_secs(config.reporting.interval_secs),
        );
        handles.push((
            "reporting",
            task.spawn(token.child_token(), move || {
                let reporting = Arc::clone(&reporting);
                async move {
                    reporting.tick().await;
                }
            }),
        ));

        let status = Arc::new(StatusReporter::new(Arc::clone(&map)));
        let task = PeriodicTask::new(
            "status",
            Duration::from_secs(config.gateway.status_interval_secs),
        );
        handles.push((
            "status",
            task.spawn(token.child_token(), move || {
                let status = Arc::clone(&status);
                async move { status.tick() }
            }),
        ));

        info!(
            "{} started: gateway on {}, {} devices",
            config.service.name,
            local_addr,
            fleet.len()
        );

        Ok(Self {
            token,
            local_addr,
            map,
            handles,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn register_map(&self) -> &Arc<RegisterMap> {
        &self.map
    }

    /// Cancel every task
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Wait for every task to finish
    pub async fn join(self) -> ServiceResult<()> {
        for (name, handle) in self.handles {
            handle
                .await
                .map_err(|e| ServiceError::Runtime(format!("{name} task failed: {e}")))?;
            info!("{} task finished", name);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::registers::Bank;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.gateway.bind_address = "127.0.0.1:0".to_string();
        config
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let runtime = Runtime::start(&test_config(), CancellationToken::new())
            .await
            .unwrap();
        assert_ne!(runtime.local_addr().port(), 0);

        // empty fleet reports zero on the first reporting run
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            runtime.register_map().read_f32(Bank::Input, 0).unwrap(),
            0.0
        );

        runtime.shutdown();
        tokio::time::timeout(Duration::from_secs(5), runtime.join())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure_aborts_startup() {
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = test_config();
        config.gateway.bind_address = blocker.local_addr().unwrap().to_string();

        let err = Runtime::start(&config, CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ServiceError::BindFailed { .. }));
        assert_eq!(err.exit_code(), 69);
    }
}
