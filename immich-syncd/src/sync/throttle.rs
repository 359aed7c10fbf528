use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Post-transfer pause that keeps the average rate under a ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Throttle {
    limit_mb_per_sec: f64,
}

impl Throttle {
    /// `limit_mb_per_sec` of 0 (or anything non-positive) disables throttling.
    pub fn new(limit_mb_per_sec: f64) -> Self {
        Self {
            limit_mb_per_sec: if limit_mb_per_sec.is_finite() {
                limit_mb_per_sec.max(0.0)
            } else {
                0.0
            },
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.limit_mb_per_sec <= 0.0
    }

    pub fn delay_for(&self, bytes: u64) -> Option<Duration> {
        if self.is_unlimited() || bytes == 0 {
            return None;
        }
        let seconds = bytes as f64 / (self.limit_mb_per_sec * 1_000_000.0);
        Some(Duration::from_secs_f64(seconds))
    }

    /// Sleeps for the pause owed by `bytes`. Returns `false` if cancelled
    /// before the pause ran out.
    pub async fn pace(&self, bytes: u64, cancel: &CancellationToken) -> bool {
        let Some(delay) = self.delay_for(bytes) else {
            return !cancel.is_cancelled();
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_has_no_delay() {
        assert_eq!(Throttle::new(0.0).delay_for(10_000_000), None);
        assert_eq!(Throttle::new(-1.0).delay_for(10_000_000), None);
        assert_eq!(Throttle::new(f64::NAN).delay_for(10_000_000), None);
    }

    #[test]
    fn delay_scales_with_bytes() {
        let throttle = Throttle::new(2.0);
        assert_eq!(throttle.delay_for(1_000_000), Some(Duration::from_millis(500)));
        assert_eq!(throttle.delay_for(0), None);
    }

    #[tokio::test(start_paused = true)]
    async fn five_megabytes_at_one_megabyte_per_second_takes_five_seconds() {
        let started = tokio::time::Instant::now();
        assert!(Throttle::new(1.0).pace(5_000_000, &CancellationToken::new()).await);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(5));
        assert!(elapsed < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_cuts_pause_short() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });
        let started = tokio::time::Instant::now();
        assert!(!Throttle::new(1.0).pace(3_600_000_000, &cancel).await);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
