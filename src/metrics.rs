use std::sync::Arc;

use anyhow::Result;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

// ---------------------------------------------------------------------------
// Metrics struct
// ---------------------------------------------------------------------------

/// Every Prometheus metric recorded by the single-flight coordinator.
pub struct Metrics {
    // -- election outcome --
    pub elections: Counter,
    pub follows: Counter,

    // -- failures --
    pub task_failures: Counter,
    pub poll_timeouts: Counter,
    pub parse_failures: Counter,
    pub release_failures: Counter,

    // -- latency --
    pub follow_wait_seconds: Histogram,
}

impl Metrics {
    /// Create a new [`Metrics`] instance and register every metric with the
    /// supplied `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let elections = Counter::default();
        registry.register(
            "flightlock_elections",
            "Invocations that won the lock and ran the task",
            elections.clone(),
        );

        let follows = Counter::default();
        registry.register(
            "flightlock_follows",
            "Invocations that found the lock held and polled for the result",
            follows.clone(),
        );

        let task_failures = Counter::default();
        registry.register(
            "flightlock_task_failures",
            "Elected tasks that returned an error",
            task_failures.clone(),
        );

        let poll_timeouts = Counter::default();
        registry.register(
            "flightlock_poll_timeouts",
            "Followers that gave up waiting for a result",
            poll_timeouts.clone(),
        );

        let parse_failures = Counter::default();
        registry.register(
            "flightlock_parse_failures",
            "Followers that found an undecodable result",
            parse_failures.clone(),
        );

        let release_failures = Counter::default();
        registry.register(
            "flightlock_release_failures",
            "Lock deletions that failed after the task finished",
            release_failures.clone(),
        );

        let follow_wait_seconds = Histogram::new(exponential_buckets(0.01, 2.0, 14));
        registry.register(
            "flightlock_follow_wait_seconds",
            "Time a follower waited before reading the result",
            follow_wait_seconds.clone(),
        );

        Self {
            elections,
            follows,
            task_failures,
            poll_timeouts,
            parse_failures,
            release_failures,
            follow_wait_seconds,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Thread-safe wrapper for the metrics registry.
#[derive(Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    /// Build a fresh registry and pre-register all coordinator metrics.
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let metrics = Metrics::new(&mut registry);
        Self {
            registry: Arc::new(registry),
            metrics: Arc::new(metrics),
        }
    }

    /// Render the registry in the OpenMetrics text format.
    pub fn encode(&self) -> Result<String> {
        let mut buf = String::new();
        prometheus_client::encoding::text::encode(&mut buf, &self.registry)
            .map_err(|e| anyhow::anyhow!("failed to encode metrics: {e}"))?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_lists_registered_metrics() {
        let registry = MetricsRegistry::new();
        registry.metrics.elections.inc();
        registry.metrics.follow_wait_seconds.observe(0.25);

        let text = registry.encode().unwrap();
        assert!(text.contains("flightlock_elections_total 1"));
        assert!(text.contains("flightlock_follows_total 0"));
        assert!(text.contains("flightlock_follow_wait_seconds_count 1"));
        assert!(text.ends_with("# EOF\n"));
    }
}
