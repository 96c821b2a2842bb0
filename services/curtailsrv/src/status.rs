//! Periodic register status report

use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::registers::{Bank, RegisterMap};

/// Logs both bank snapshots together with a liveness line
pub struct StatusReporter {
    map: Arc<RegisterMap>,
    started: Instant,
}

impl StatusReporter {
    pub fn new(map: Arc<RegisterMap>) -> Self {
        Self {
            map,
            started: Instant::now(),
        }
    }

    fn render(&self, bank: Bank) -> String {
        let words = self.map.snapshot(bank);
        let raw = words
            .iter()
            .enumerate()
            .map(|(address, word)| format!("{address}:{word:04X}"))
            .collect::<Vec<_>>()
            .join(" ");
        let decoded = self
            .map
            .layout()
            .entries()
            .iter()
            .filter(|e| e.bank == bank)
            .filter_map(|e| {
                let start = usize::from(e.address);
                let slice = words.get(start..start + usize::from(e.width()))?;
                self.map.decode(bank, e.address, slice).ok()
            })
            .flatten()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        format!("[{raw}] {decoded}")
    }

    pub fn tick(&self) {
        info!("Status: alive for {}s", self.started.elapsed().as_secs());
        info!("Input registers: {}", self.render(Bank::Input));
        info!("Holding registers: {}", self.render(Bank::Holding));
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::config::RegisterConfig;
    use crate::registers::encode_f32;

    #[test]
    #[traced_test]
    fn test_status_report_decodes_points() {
        let map = Arc::new(RegisterMap::from_config(&RegisterConfig::default()).unwrap());
        map.write(Bank::Holding, 10, &encode_f32(300.0)).unwrap();

        StatusReporter::new(Arc::clone(&map)).tick();

        assert!(logs_contain("Status: alive for"));
        assert!(logs_contain("power_cap=100"));
        assert!(logs_contain("setpoint_echo=300"));
        assert!(logs_contain("activation={poll_enabled:0}"));
    }
}
