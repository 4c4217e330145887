use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::coordination::FlightOptions;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub keydb: KeyDbConfig,
    #[serde(default)]
    pub flight: FlightConfig,
}

// ---------------------------------------------------------------------------
// KeyDB / Redis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct KeyDbConfig {
    /// Connection string (e.g. `rediss://keydb.local:6380`).
    pub endpoint: String,
    /// Enable TLS for the KeyDB connection.
    #[serde(default = "bool_true")]
    pub tls: bool,
    /// Name of the environment variable that holds the KeyDB auth token.
    #[serde(default = "default_keydb_auth_env")]
    pub auth_token_env: String,
    /// Number of pooled connections.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn bool_true() -> bool {
    true
}

fn default_keydb_auth_env() -> String {
    "KEYDB_AUTH_TOKEN".to_string()
}

fn default_pool_size() -> usize {
    4
}

// ---------------------------------------------------------------------------
// Single-flight timing
// ---------------------------------------------------------------------------

/// Timing knobs for the single-flight protocol, in milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct FlightConfig {
    /// TTL of the election lock.  Bounds how long a task may run before
    /// another caller can be elected for the same resource.
    #[serde(default = "default_lock_ttl_ms")]
    pub lock_ttl_ms: u64,
    /// TTL of the published result.
    #[serde(default = "default_result_ttl_ms")]
    pub result_ttl_ms: u64,
    /// Delay between result polls on the follower path.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long a follower waits for a result before giving up.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

impl Default for FlightConfig {
    fn default() -> Self {
        Self {
            lock_ttl_ms: default_lock_ttl_ms(),
            result_ttl_ms: default_result_ttl_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

impl FlightConfig {
    /// Convert to protocol options.  The logger is left at its default
    /// (no hooks); `tracing` events are emitted regardless.
    pub fn to_options(&self) -> FlightOptions {
        FlightOptions::default()
            .with_lock_ttl(Duration::from_millis(self.lock_ttl_ms))
            .with_result_ttl(Duration::from_millis(self.result_ttl_ms))
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
            .with_poll_timeout(Duration::from_millis(self.poll_timeout_ms))
    }
}

fn default_lock_ttl_ms() -> u64 {
    15_000
}

fn default_result_ttl_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_poll_timeout_ms() -> u64 {
    15_000
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load and validate a [`Config`] from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    parse_config(&contents)
        .with_context(|| format!("invalid config file: {}", path.display()))
}

/// Parse and validate a [`Config`] from YAML text.
pub fn parse_config(contents: &str) -> Result<Config> {
    let config: Config = serde_yaml::from_str(contents).context("failed to parse config")?;
    validate_config(&config)?;
    Ok(config)
}

/// Basic sanity checks that cannot be expressed purely with serde.
fn validate_config(config: &Config) -> Result<()> {
    anyhow::ensure!(
        !config.keydb.endpoint.trim().is_empty(),
        "keydb.endpoint must not be empty"
    );
    anyhow::ensure!(config.keydb.pool_size > 0, "keydb.pool_size must be at least 1");
    let flight = &config.flight;
    anyhow::ensure!(flight.lock_ttl_ms > 0, "flight.lock_ttl_ms must be positive");
    anyhow::ensure!(flight.result_ttl_ms > 0, "flight.result_ttl_ms must be positive");
    anyhow::ensure!(
        flight.poll_interval_ms > 0,
        "flight.poll_interval_ms must be positive"
    );
    anyhow::ensure!(
        flight.poll_timeout_ms > 0,
        "flight.poll_timeout_ms must be positive"
    );
    Ok(())
}
