//! Request pacing for the per-minute Xero quota

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Spaces requests evenly so a tenant stays under `requests_per_minute`
///
/// Each caller reserves the next free slot and sleeps until it arrives.
/// Concurrency is bounded separately by the fetcher's semaphore.
pub struct RequestPacer {
    interval: Option<Duration>,
    next_slot: Mutex<Instant>,
}

impl RequestPacer {
    /// `0` disables pacing
    pub fn per_minute(requests_per_minute: u32) -> Self {
        let interval = (requests_per_minute > 0)
            .then(|| Duration::from_secs(60) / requests_per_minute);
        Self {
            interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Wait for the next request slot
    pub async fn wait(&self) {
        let Some(interval) = self.interval else {
            return;
        };

        let slot = {
            let mut next = self.next_slot.lock().await;
            let slot = (*next).max(Instant::now());
            *next = slot + interval;
            slot
        };

        tokio::time::sleep_until(slot).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_from_rate() {
        assert_eq!(
            RequestPacer::per_minute(60).interval(),
            Some(Duration::from_secs(1))
        );
        assert_eq!(
            RequestPacer::per_minute(120).interval(),
            Some(Duration::from_millis(500))
        );
        assert_eq!(RequestPacer::per_minute(0).interval(), None);
    }

    #[tokio::test]
    async fn test_disabled_pacer_does_not_wait() {
        let pacer = RequestPacer::per_minute(0);
        let start = Instant::now();
        for _ in 0..100 {
            pacer.wait().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_pacer_spaces_requests() {
        // 1200/min = one slot every 50ms
        let pacer = RequestPacer::per_minute(1200);
        let start = Instant::now();
        for _ in 0..4 {
            pacer.wait().await;
        }
        // First slot is immediate, the next three are 50ms apart
        assert!(start.elapsed() >= Duration::from_millis(150));
    }
}
