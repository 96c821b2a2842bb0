//! Periodic task runner
//!
//! The job runs once right away, then `period` after each run completes.
//! Runs of the same task never overlap; a slow run pushes the next one back.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Named fixed-delay task
#[derive(Debug, Clone)]
pub struct PeriodicTask {
    name: String,
    period: Duration,
}

impl PeriodicTask {
    pub fn new(name: impl Into<String>, period: Duration) -> Self {
        Self {
            name: name.into(),
            // tokio intervals reject a zero period
            period: period.max(Duration::from_millis(1)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Spawn the task; it stops after the current run once `token` is cancelled
    pub fn spawn<F, Fut>(self, token: CancellationToken, mut job: F) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Task '{}' started, period {:?}", self.name, self.period);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {},
                }
                debug!("Task '{}' tick", self.name);
                job().await;
                ticker.reset();
            }

            info!("Task '{}' stopped", self.name);
        })
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tokio::time::{sleep, Instant};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_runs_immediately_then_every_period() {
        let runs = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();

        let counter = Arc::clone(&runs);
        let handle = PeriodicTask::new("fast", Duration::from_secs(3)).spawn(token.clone(), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        sleep(Duration::from_millis(10)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // 0, 3, 6, 9
        sleep(Duration::from_millis(9_500)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 4);

        token.cancel();
        handle.await.unwrap();
        sleep(Duration::from_secs(30)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_tick_delays_next_without_overlap() {
        let origin = Instant::now();
        let starts = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicUsize::new(0));
        let max_running = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();

        let (s, r, m) = (Arc::clone(&starts), Arc::clone(&running), Arc::clone(&max_running));
        let handle = PeriodicTask::new("slow", Duration::from_secs(3)).spawn(token.clone(), move || {
            let (s, r, m) = (Arc::clone(&s), Arc::clone(&r), Arc::clone(&m));
            async move {
                let now_running = r.fetch_add(1, Ordering::SeqCst) + 1;
                m.fetch_max(now_running, Ordering::SeqCst);
                s.lock().push(Instant::now());
                sleep(Duration::from_secs(5)).await;
                r.fetch_sub(1, Ordering::SeqCst);
            }
        });

        sleep(Duration::from_secs(20)).await;
        token.cancel();
        handle.await.unwrap();

        let offsets: Vec<u64> = starts
            .lock()
            .iter()
            .map(|t| t.duration_since(origin).as_secs())
            .collect();
        // run 5 s + wait 3 s
        assert_eq!(offsets, vec![0, 8, 16]);
        assert_eq!(max_running.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_first_tick() {
        let runs = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        token.cancel();

        let counter = Arc::clone(&runs);
        let handle = PeriodicTask::new("never", Duration::ZERO).spawn(token, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        handle.await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
