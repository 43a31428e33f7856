//! Request pacing with adaptive backoff for the catalog client.
//!
//! Enforces a minimum interval between requests. Throttling responses double
//! the interval (up to a ceiling); a run of successes halves it back toward
//! the base.

use std::thread;
use std::time::{Duration, Instant};

pub struct RateLimiter {
    name: String,
    last_request: Option<Instant>,
    current_interval: Duration,
    base_interval: Duration,
    max_interval: Duration,
    success_count: u32,
    successes_to_reduce: u32,
}

impl RateLimiter {
    /// * `name`: label for log messages
    /// * `base_interval`: minimum time between requests
    /// * `max_interval`: upper bound after repeated throttling
    /// * `successes_to_reduce`: consecutive successes before halving the
    ///   interval (0 disables reduction)
    pub fn new(
        name: &str,
        base_interval: Duration,
        max_interval: Duration,
        successes_to_reduce: u32,
    ) -> Self {
        RateLimiter {
            name: name.to_string(),
            last_request: None,
            current_interval: base_interval,
            base_interval,
            max_interval,
            success_count: 0,
            successes_to_reduce,
        }
    }

    /// Max interval = 64× base (at least 5s), reduce after 10 successes.
    pub fn from_millis(name: &str, millis: u64) -> Self {
        let base = Duration::from_millis(millis);
        let max = (base * 64).max(Duration::from_secs(5));
        Self::new(name, base, max, 10)
    }

    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    /// Sleep if not enough time has elapsed since the last request.
    /// Must be called before making a request.
    pub fn wait_if_needed(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.current_interval {
                let wait_time = self.current_interval - elapsed;
                log::trace!(
                    "[{}] pacing: waiting {:.2}s",
                    self.name,
                    wait_time.as_secs_f64()
                );
                thread::sleep(wait_time);
            }
        }
        self.last_request = Some(Instant::now());
    }

    pub fn report_success(&mut self) {
        if self.successes_to_reduce == 0 {
            return;
        }

        self.success_count += 1;

        if self.success_count >= self.successes_to_reduce
            && self.current_interval > self.base_interval
        {
            self.current_interval = (self.current_interval / 2).max(self.base_interval);
            log::debug!(
                "[{}] interval reduced to {:.2}s after {} successes",
                self.name,
                self.current_interval.as_secs_f64(),
                self.success_count
            );
            self.success_count = 0;
        }
    }

    /// Report a throttled request. Doubles the interval (up to max) and
    /// returns how long to wait before retrying: the server's hint when it
    /// gave one, the new interval otherwise.
    pub fn report_throttled(&mut self, retry_after: Option<Duration>) -> Duration {
        let doubled = (self.current_interval * 2).max(Duration::from_millis(1));
        self.current_interval = doubled.min(self.max_interval);
        self.success_count = 0;
        let wait = retry_after.unwrap_or(self.current_interval);
        log::warn!(
            "[{}] throttled, retrying in {:.1}s (interval now {:.2}s)",
            self.name,
            wait.as_secs_f64(),
            self.current_interval.as_secs_f64()
        );
        wait
    }
}

/// Parse a `Retry-After` header given in whole seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
