//! Pacing gate
//!
//! Enforces a minimum delay between successive script executions of one
//! note-processing rule. The gate starts pre-armed: the first acquisition
//! after construction also waits a full delay. A zero delay never waits.
//!
//! `acquire` takes `&mut self`, so one gate paces exactly one sequential
//! caller.

use std::time::Duration;
use tokio::time::Instant;

/// Minimum-interval gate for a single sequential caller
#[derive(Debug)]
pub struct PacingGate {
    delay: Duration,
    next_release: Option<Instant>,
}

impl PacingGate {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_release: Self::release_after(delay),
        }
    }

    /// Configured delay between acquisitions
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Wait until at least `delay` has passed since the previous acquisition
    /// returned (or since construction, for the first one).
    pub async fn acquire(&mut self) {
        if self.delay.is_zero() {
            return;
        }

        match self.next_release {
            Some(release_at) => {
                let now = Instant::now();
                if release_at > now {
                    tracing::debug!(
                        wait_ms = (release_at - now).as_millis() as u64,
                        "Pacing: waiting before next execution"
                    );
                    tokio::time::sleep_until(release_at).await;
                }
            }
            // Delay too large to represent as an instant: never release
            None => std::future::pending::<()>().await,
        }

        self.next_release = Self::release_after(self.delay);
    }

    fn release_after(delay: Duration) -> Option<Instant> {
        Instant::now().checked_add(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_zero_delay_never_blocks() {
        let mut gate = PacingGate::new(Duration::ZERO);

        let start = std::time::Instant::now();
        for _ in 0..500 {
            gate.acquire().await;
        }

        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_acquire_waits_full_delay() {
        let mut gate = PacingGate::new(Duration::from_millis(200));

        let start = Instant::now();
        gate.acquire().await;

        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_successive_acquires_are_spaced() {
        let mut gate = PacingGate::new(Duration::from_millis(100));

        let start = Instant::now();
        for _ in 0..4 {
            gate.acquire().await;
        }

        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_spent_elsewhere_counts_towards_delay() {
        let mut gate = PacingGate::new(Duration::from_millis(100));
        gate.acquire().await;

        // Caller works for longer than the delay between acquisitions
        tokio::time::sleep(Duration::from_millis(150)).await;

        let before = Instant::now();
        gate.acquire().await;
        assert_eq!(Instant::now(), before);
    }
}
