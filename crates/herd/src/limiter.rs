//! Per-session byte-rate throttling.

use std::time::Duration;

use tokio::time::Instant;

/// Throttles the bytes a single session reads off the wire.
///
/// Accounting is cumulative: after `consume` returns, total bytes divided
/// by wall-clock time since the first call never exceeds the configured
/// rate. When a call would push the average over the rate, it sleeps off
/// the shortfall before returning. A rate of zero disables throttling.
///
/// Each session owns exactly one limiter; it is never shared.
#[derive(Debug)]
pub struct RateLimiter {
    bytes_per_sec: u64,
    started: Option<Instant>,
    consumed: u64,
}

impl RateLimiter {
    pub fn new(bytes_per_sec: u64) -> Self {
        Self {
            bytes_per_sec,
            started: None,
            consumed: 0,
        }
    }

    /// Account `n` transferred bytes, sleeping off any excess over the
    /// configured rate before returning.
    pub async fn consume(&mut self, n: usize) {
        if self.bytes_per_sec == 0 {
            return;
        }
        // The clock starts at the first accounted byte, not construction,
        // so sessions that idle before their first download get no credit.
        let started = *self.started.get_or_insert_with(Instant::now);
        self.consumed = self.consumed.saturating_add(n as u64);

        let target = Duration::from_secs_f64(self.consumed as f64 / self.bytes_per_sec as f64);
        let elapsed = started.elapsed();
        if target > elapsed {
            tokio::time::sleep(target - elapsed).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn throttles_to_configured_rate() {
        let mut limiter = RateLimiter::new(1_000);
        let begin = Instant::now();

        limiter.consume(500).await;
        limiter.consume(500).await;
        limiter.consume(1_000).await;

        // 2000 bytes at 1000 B/s needs at least two seconds.
        assert!(begin.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_rate_never_delays() {
        let mut limiter = RateLimiter::new(0);
        let begin = Instant::now();

        for _ in 0..100 {
            limiter.consume(1 << 20).await;
        }

        assert_eq!(begin.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn small_chunks_accumulate() {
        let mut limiter = RateLimiter::new(10_000);
        let begin = Instant::now();

        // 100 chunks of 100 bytes = 10 000 bytes = one second at the rate.
        for _ in 0..100 {
            limiter.consume(100).await;
        }

        assert!(begin.elapsed() >= Duration::from_millis(999));
    }
}
