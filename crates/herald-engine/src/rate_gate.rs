//! Global outbound throttle shared by every concurrent worker of a run.
//!
//! `acquire()` reserves the next free grant slot with a compare-and-set on an
//! atomic timestamp, then sleeps until that slot. Computing the wait and
//! recording the new grant time is a single atomic step, so concurrent callers
//! never compute their wait against the same stale grant time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

/// Sentinel for "nothing granted yet".
const NEVER: u64 = u64::MAX;

/// Minimum-interval gate over all outbound remote calls.
pub struct RateGate {
    min_interval: Duration,
    epoch: Instant,
    /// Nanoseconds since `epoch` of the latest reserved grant.
    last_grant: AtomicU64,
}

impl RateGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            epoch: Instant::now(),
            last_grant: AtomicU64::new(NEVER),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until at least `min_interval` has passed since the previous grant.
    pub async fn acquire(&self) {
        let interval = u64::try_from(self.min_interval.as_nanos()).unwrap_or(u64::MAX);

        let grant = loop {
            let now = self.elapsed_nanos();
            let last = self.last_grant.load(Ordering::Acquire);
            let slot = if last == NEVER {
                now
            } else {
                now.max(last.saturating_add(interval))
            };
            if self
                .last_grant
                .compare_exchange_weak(last, slot, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break slot;
            }
        };

        let deadline = self.epoch + Duration::from_nanos(grant);
        if deadline > Instant::now() {
            tokio::time::sleep_until(deadline).await;
        }
    }

    fn elapsed_nanos(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(NEVER - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_first_acquire_is_immediate() {
        let gate = RateGate::new(Duration::from_secs(1));
        let start = Instant::now();
        gate.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_grants_are_spaced() {
        let gate = Arc::new(RateGate::new(Duration::from_millis(1000)));

        let grants = futures::future::join_all((0..8).map(|_| {
            let gate = gate.clone();
            async move {
                gate.acquire().await;
                Instant::now()
            }
        }))
        .await;

        let mut grants = grants;
        grants.sort();
        for pair in grants.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(1000));
        }
        assert_eq!(grants[7] - grants[0], Duration::from_millis(7000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_gate_does_not_delay() {
        let gate = RateGate::new(Duration::from_millis(500));
        gate.acquire().await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        let start = Instant::now();
        gate.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_workers_share_gate() {
        let gate = Arc::new(RateGate::new(Duration::from_millis(200)));
        let mut handles = Vec::new();
        for _ in 0..5 {
            let gate = gate.clone();
            handles.push(tokio::spawn(async move {
                gate.acquire().await;
                Instant::now()
            }));
        }
        let mut grants = Vec::new();
        for handle in handles {
            grants.push(handle.await.unwrap());
        }
        grants.sort();
        for pair in grants.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(200));
        }
    }
}
