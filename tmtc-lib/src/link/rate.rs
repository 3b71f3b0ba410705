use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::StopSignal;

/// Number of one second buckets averaged by a [DataRateMeter].
const WINDOW_SECS: usize = 5;

/// Sliding window rate meter.
///
/// Marks are accumulated in one second buckets and the rate is the average over the last
/// [WINDOW_SECS] complete seconds, so a link that stops receiving reports 0 after the window
/// has passed.
#[derive(Debug)]
pub struct DataRateMeter {
    start: Instant,
    window: Mutex<Window>,
}

#[derive(Debug, Default)]
struct Window {
    // index of the second the newest bucket belongs to
    current: u64,
    buckets: [u64; WINDOW_SECS + 1],
}

impl Window {
    fn advance(&mut self, sec: u64) {
        if sec <= self.current {
            return;
        }
        let stale = (sec - self.current).min(self.buckets.len() as u64);
        for i in 1..=stale {
            let idx = ((self.current + i) % self.buckets.len() as u64) as usize;
            self.buckets[idx] = 0;
        }
        self.current = sec;
    }
}

impl Default for DataRateMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl DataRateMeter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            window: Mutex::new(Window::default()),
        }
    }

    /// Record `amount` units transferred now.
    pub fn mark(&self, amount: u64) {
        self.mark_at(Instant::now(), amount);
    }

    /// Average units per second over the window.
    #[must_use]
    pub fn rate(&self) -> f64 {
        self.rate_at(Instant::now())
    }

    fn second(&self, at: Instant) -> u64 {
        at.saturating_duration_since(self.start).as_secs()
    }

    pub(crate) fn mark_at(&self, at: Instant, amount: u64) {
        let sec = self.second(at);
        let mut window = self.window.lock();
        window.advance(sec);
        // late marks land in the current bucket
        let idx = (window.current % window.buckets.len() as u64) as usize;
        window.buckets[idx] += amount;
    }

    pub(crate) fn rate_at(&self, at: Instant) -> f64 {
        let sec = self.second(at);
        let mut window = self.window.lock();
        window.advance(sec);
        let len = window.buckets.len() as u64;
        let current = (window.current % len) as usize;
        let total: u64 = window
            .buckets
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != current)
            .map(|(_, count)| count)
            .sum();
        total as f64 / WINDOW_SECS as f64
    }
}

/// Token bucket limiting the number of operations per second.
///
/// The bucket holds at most one second worth of tokens, and never less than one, so bursts
/// are bounded by the configured rate.
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    capacity: f64,
    tokens: f64,
    last: Instant,
}

impl RateLimiter {
    /// Create a limiter allowing `rate` operations per second.
    ///
    /// # Errors
    /// [crate::Error::Config] if `rate` is not a positive number.
    pub fn new(rate: f64) -> crate::Result<Self> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(crate::Error::Config(format!(
                "rate must be a positive number, got {rate}"
            )));
        }
        let capacity = rate.max(1.0);
        Ok(Self {
            rate,
            capacity,
            tokens: capacity,
            last: Instant::now(),
        })
    }

    /// Take a token if one is available at `now`, otherwise return how long to wait for the
    /// next one.
    pub(crate) fn try_acquire_at(&mut self, now: Instant) -> Result<(), Duration> {
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - self.tokens) / self.rate))
        }
    }

    /// Block until a token is available. Returns `false` if `stop` fired while waiting.
    pub fn acquire(&mut self, stop: &StopSignal) -> bool {
        loop {
            match self.try_acquire_at(Instant::now()) {
                Ok(()) => return true,
                Err(wait) => {
                    if stop.wait(wait) {
                        return false;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_averages_complete_seconds() {
        let meter = DataRateMeter::new();
        let t0 = meter.start;
        for sec in 0..5 {
            meter.mark_at(t0 + Duration::from_secs(sec), 100);
        }
        // second 5 is still filling and is not counted
        meter.mark_at(t0 + Duration::from_millis(5_100), 1_000);

        let rate = meter.rate_at(t0 + Duration::from_millis(5_500));
        assert!((rate - 100.0).abs() < f64::EPSILON, "rate={rate}");
    }

    #[test]
    fn rate_decays_to_zero() {
        let meter = DataRateMeter::new();
        let t0 = meter.start;
        meter.mark_at(t0, 500);

        assert!(meter.rate_at(t0 + Duration::from_secs(1)) > 0.0);
        assert_eq!(meter.rate_at(t0 + Duration::from_secs(60)), 0.0);
    }

    #[test]
    fn limiter_allows_burst_then_waits() {
        let mut limiter = RateLimiter::new(2.0).unwrap();
        let now = limiter.last;

        assert!(limiter.try_acquire_at(now).is_ok());
        assert!(limiter.try_acquire_at(now).is_ok());
        let wait = limiter.try_acquire_at(now).unwrap_err();
        assert_eq!(wait, Duration::from_millis(500));

        assert!(limiter
            .try_acquire_at(now + Duration::from_millis(500))
            .is_ok());
    }

    #[test]
    fn limiter_below_one_per_second() {
        let mut limiter = RateLimiter::new(0.5).unwrap();
        let now = limiter.last;

        assert!(limiter.try_acquire_at(now).is_ok());
        let wait = limiter.try_acquire_at(now).unwrap_err();
        assert_eq!(wait, Duration::from_secs(2));
    }

    #[test]
    fn limiter_rejects_bad_rate() {
        assert!(RateLimiter::new(0.0).is_err());
        assert!(RateLimiter::new(-1.0).is_err());
        assert!(RateLimiter::new(f64::NAN).is_err());
    }
}
