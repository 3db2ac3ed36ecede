//! Launch spacing shared by all worker loops

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};

/// Enforces a minimum interval between consecutive job launches.
///
/// Loops queue on the inner mutex, so launches are serialized, but the lock
/// is released as soon as the launch time is recorded.
#[derive(Debug)]
pub struct StaggerGate {
    interval: Duration,
    last_launch: Mutex<Option<Instant>>,
}

impl StaggerGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_launch: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until `interval` has passed since the previous launch, then
    /// record this launch. Returns how long the caller waited.
    pub async fn wait(&self) -> Duration {
        if self.interval.is_zero() {
            return Duration::ZERO;
        }

        let mut last_launch = self.last_launch.lock().await;
        let waited = match *last_launch {
            Some(previous) => {
                let elapsed = previous.elapsed();
                if elapsed < self.interval {
                    let remaining = self.interval - elapsed;
                    sleep(remaining).await;
                    remaining
                } else {
                    Duration::ZERO
                }
            }
            None => Duration::ZERO,
        };
        *last_launch = Some(Instant::now());
        waited
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_first_launch_does_not_wait() {
        let gate = StaggerGate::new(Duration::from_secs(5));
        assert_eq!(gate.wait().await, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_concurrent_launches_are_spaced() {
        let gate = Arc::new(StaggerGate::new(Duration::from_millis(40)));
        let start = Instant::now();

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let gate = gate.clone();
                tokio::spawn(async move {
                    gate.wait().await;
                    Instant::now()
                })
            })
            .collect();

        let mut launches = Vec::new();
        for handle in handles {
            launches.push(handle.await.unwrap());
        }
        launches.sort();

        assert!(launches[1] - launches[0] >= Duration::from_millis(40));
        assert!(launches[2] - launches[1] >= Duration::from_millis(40));
        assert!(launches[2] - start >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_zero_interval_never_waits() {
        let gate = StaggerGate::new(Duration::ZERO);
        for _ in 0..10 {
            assert_eq!(gate.wait().await, Duration::ZERO);
        }
    }
}
