use std::time::Duration;

use super::{FlightError, LogHooks};

pub const DEFAULT_LOCK_TTL: Duration = Duration::from_millis(15_000);
pub const DEFAULT_RESULT_TTL: Duration = Duration::from_millis(10_000);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Per-invocation settings for the single-flight protocol.
#[derive(Debug, Clone)]
pub struct FlightOptions {
    /// Validity of the lock record.  A task running longer than this may see
    /// a second caller elected for the same resource.
    pub lock_ttl: Duration,
    /// Validity of the published result; followers must read it within this
    /// window.
    pub result_ttl: Duration,
    /// Delay between follower polls.
    pub poll_interval: Duration,
    /// Maximum time a follower waits for a result.
    pub poll_timeout: Duration,
    pub logger: LogHooks,
}

impl Default for FlightOptions {
    fn default() -> Self {
        Self {
            lock_ttl: DEFAULT_LOCK_TTL,
            result_ttl: DEFAULT_RESULT_TTL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            logger: LogHooks::default(),
        }
    }
}

impl FlightOptions {
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    pub fn with_result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl = ttl;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_logger(mut self, logger: LogHooks) -> Self {
        self.logger = logger;
        self
    }

    /// Every duration must be at least one millisecond: the store rejects a
    /// zero `PX`, and a zero poll interval never yields between polls.
    pub fn validate(&self) -> Result<(), FlightError> {
        for (name, value) in [
            ("lock_ttl", self.lock_ttl),
            ("result_ttl", self.result_ttl),
            ("poll_interval", self.poll_interval),
            ("poll_timeout", self.poll_timeout),
        ] {
            if value.as_millis() == 0 {
                return Err(FlightError::InvalidOptions(format!(
                    "{name} must be at least 1ms, got {value:?}"
                )));
            }
        }
        Ok(())
    }

    /// Upper bound on follower poll iterations.
    ///
    /// Each iteration sleeps at least `poll_interval`, so after
    /// `poll_timeout / poll_interval + 1` iterations the elapsed time exceeds
    /// `poll_timeout` and the timeout check must already have fired.
    pub(crate) fn max_polls(&self) -> u64 {
        let ratio = self.poll_timeout.as_nanos() / self.poll_interval.as_nanos().max(1);
        u64::try_from(ratio).unwrap_or(u64::MAX).saturating_add(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = FlightOptions::default();
        assert_eq!(options.lock_ttl, Duration::from_secs(15));
        assert_eq!(options.result_ttl, Duration::from_secs(10));
        assert_eq!(options.poll_interval, Duration::from_millis(100));
        assert_eq!(options.poll_timeout, Duration::from_secs(15));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn sub_millisecond_durations_are_rejected() {
        let options = FlightOptions::default().with_lock_ttl(Duration::from_micros(500));
        let err = options.validate().unwrap_err();
        assert!(err.to_string().contains("lock_ttl"));

        let options = FlightOptions::default().with_poll_interval(Duration::ZERO);
        assert!(matches!(
            options.validate(),
            Err(FlightError::InvalidOptions(_))
        ));
    }

    #[test]
    fn max_polls_covers_the_timeout() {
        let options = FlightOptions::default()
            .with_poll_interval(Duration::from_millis(100))
            .with_poll_timeout(Duration::from_millis(100));
        assert_eq!(options.max_polls(), 3);

        let options = FlightOptions::default()
            .with_poll_interval(Duration::from_millis(30))
            .with_poll_timeout(Duration::from_millis(100));
        assert_eq!(options.max_polls(), 5);
    }
}
