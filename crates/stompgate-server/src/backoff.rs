//! Reconnect backoff policy.

use std::time::Duration;

use rand::Rng;

use stompgate_config::ReconnectConfig;

/// Bounded exponential backoff with jitter.
///
/// Each attempt doubles (or whatever the multiplier says) the previous
/// pre-jitter delay up to the cap; once the retry budget is spent,
/// [`Backoff::next_delay`] returns `None` and the caller decides what
/// degraded operation looks like.
#[derive(Debug)]
pub struct Backoff {
    config: ReconnectConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// The deterministic pre-jitter delay for a given attempt number.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponential = self.config.initial_delay_ms as f64
            * self.config.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        Duration::from_millis(exponential.min(self.config.max_delay_ms as f64) as u64)
    }

    /// Delay before the next attempt, or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.config.max_retries {
            return None;
        }
        let base = self.base_delay(self.attempt);
        self.attempt += 1;

        let jitter = self.config.jitter;
        if jitter == 0.0 {
            return Some(base);
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-jitter..jitter);
        Some(base.mul_f64(factor))
    }

    /// Attempts consumed so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Start a fresh budget after a successful reconnect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ReconnectConfig {
        ReconnectConfig {
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            multiplier: 2.0,
            jitter: 0.0,
            max_retries: 5,
        }
    }

    #[test]
    fn delays_increase_until_the_cap() {
        let mut backoff = Backoff::new(config());
        let delays: Vec<_> = std::iter::from_fn(|| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
                Duration::from_millis(1_000), // capped
            ]
        );
    }

    #[test]
    fn budget_exhaustion_yields_none() {
        let mut backoff = Backoff::new(config());
        for _ in 0..5 {
            assert!(backoff.next_delay().is_some());
        }
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.attempt(), 5);
    }

    #[test]
    fn reset_restores_the_budget() {
        let mut backoff = Backoff::new(config());
        while backoff.next_delay().is_some() {}
        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn jitter_stays_within_its_band() {
        let mut reconnect = config();
        reconnect.jitter = 0.2;
        let mut backoff = Backoff::new(reconnect);
        for attempt in 0..5 {
            let base = backoff.base_delay(attempt).as_secs_f64();
            let delay = backoff.next_delay().unwrap().as_secs_f64();
            assert!(delay >= base * 0.8 - f64::EPSILON, "{delay} vs {base}");
            assert!(delay <= base * 1.2 + f64::EPSILON, "{delay} vs {base}");
        }
    }
}
