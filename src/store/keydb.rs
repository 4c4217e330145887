//! KeyDB / Redis backed store.
//!
//! Builds a [`fred::clients::Pool`] configured from
//! [`crate::config::KeyDbConfig`], optionally enabling TLS via `rustls` and
//! reading the auth token from an environment variable, and implements
//! [`KeyValueStore`] on top of it with `SET .. PX .. [NX]`, `GET`, `DEL` and
//! a Lua compare-and-delete for lock release.

use anyhow::{ensure, Context, Result};
use async_trait::async_trait;
use fred::clients::Pool;
use fred::interfaces::{ClientLike, KeysInterface, LuaInterface};
use fred::types::config::{ReconnectPolicy, ServerConfig, TlsConnector};
use fred::types::{Builder, Expiration, SetOptions as FredSetOptions};
use tracing::trace;

use super::{KeyValueStore, SetOptions, StoreError};
use crate::config::KeyDbConfig;

/// [`KeyValueStore`] backed by a KeyDB connection pool.
#[derive(Clone)]
pub struct KeyDbStore {
    pool: Pool,
}

impl KeyDbStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create and verify a pool from `config`, then wrap it.
    pub async fn connect(config: &KeyDbConfig) -> Result<Self> {
        Ok(Self::new(create_keydb_pool(config).await?))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait]
impl KeyValueStore for KeyDbStore {
    async fn set(&self, key: &str, value: &str, options: SetOptions) -> Result<bool, StoreError> {
        let millis = i64::try_from(options.expire.as_millis()).unwrap_or(i64::MAX);
        let condition = options.only_if_absent.then_some(FredSetOptions::NX);
        // SET … returns "OK" when the key was written, nil when NX refused it.
        let reply: Option<String> = self
            .pool
            .set(key, value, Some(Expiration::PX(millis)), condition, false)
            .await?;
        let written = reply.is_some();
        trace!(%key, millis, nx = options.only_if_absent, written, "SET");
        Ok(written)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value: Option<String> = self.pool.get(key).await?;
        trace!(%key, hit = value.is_some(), "GET");
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let removed: i64 = self.pool.del(key).await?;
        trace!(%key, removed, "DEL");
        Ok(())
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let removed: i64 = self
            .pool
            .eval(COMPARE_AND_DELETE, vec![key.to_string()], vec![expected.to_string()])
            .await?;
        trace!(%key, removed, "DEL if equal");
        Ok(removed == 1)
    }
}

/// `DEL KEYS[1]` only while it still holds `ARGV[1]`.
const COMPARE_AND_DELETE: &str = r#"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    end
    return 0
"#;

/// Reconnect backoff: first retry after 100 ms, doubling up to 30 s, forever.
const RECONNECT_MIN_DELAY_MS: u32 = 100;
const RECONNECT_MAX_DELAY_MS: u32 = 30_000;

/// A KeyDB server address parsed from `keydb.endpoint`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl Endpoint {
    pub const DEFAULT_PORT: u16 = 6379;

    /// Parse `host`, `host:port`, `[v6addr]:port`, optionally prefixed by
    /// `redis://` or `rediss://` and followed by a `/db` path.
    ///
    /// An explicit scheme decides TLS (`rediss` on, `redis` off); a bare
    /// address uses `tls_default`.
    pub fn parse(endpoint: &str, tls_default: bool) -> Result<Self> {
        let (tls, rest) = if let Some(rest) = endpoint.strip_prefix("rediss://") {
            (true, rest)
        } else if let Some(rest) = endpoint.strip_prefix("redis://") {
            (false, rest)
        } else {
            (tls_default, endpoint)
        };
        let authority = rest.split('/').next().unwrap_or(rest);
        // Credentials come from `auth_token_env`, never the URL.
        let authority = authority.rsplit_once('@').map_or(authority, |(_, addr)| addr);

        let (host, port) = match authority.strip_prefix('[') {
            Some(v6) => {
                let (host, tail) = v6
                    .split_once(']')
                    .with_context(|| format!("unterminated IPv6 address in endpoint: {endpoint}"))?;
                (host, tail.strip_prefix(':'))
            }
            None => match authority.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            },
        };
        ensure!(!host.is_empty(), "missing host in endpoint: {endpoint}");

        let port = match port {
            Some(port) => port
                .parse()
                .with_context(|| format!("invalid port in endpoint: {endpoint}"))?,
            None => Self::DEFAULT_PORT,
        };

        Ok(Self {
            host: host.to_string(),
            port,
            tls,
        })
    }
}

/// Translate our config into a `fred` client config.  The auth token, if the
/// named environment variable is set, becomes the connection password.
pub fn client_config(config: &KeyDbConfig) -> Result<(Endpoint, fred::types::config::Config)> {
    let endpoint = Endpoint::parse(&config.endpoint, config.tls)?;

    let tls = if endpoint.tls {
        Some(
            TlsConnector::default_rustls()
                .context("failed to initialise rustls for KeyDB")?
                .into(),
        )
    } else {
        None
    };

    let client = fred::types::config::Config {
        server: ServerConfig::new_centralized(endpoint.host.as_str(), endpoint.port),
        password: std::env::var(&config.auth_token_env).ok().filter(|t| !t.is_empty()),
        tls,
        ..Default::default()
    };
    Ok((endpoint, client))
}

/// Build a pool of `config.pool_size` connections, connect it and verify it
/// answers `PING` before handing it out.
pub async fn create_keydb_pool(config: &KeyDbConfig) -> Result<Pool> {
    let (endpoint, client) = client_config(config)?;

    let mut builder = Builder::from_config(client);
    builder.set_policy(ReconnectPolicy::new_exponential(
        0,
        RECONNECT_MIN_DELAY_MS,
        RECONNECT_MAX_DELAY_MS,
        2,
    ));
    let pool = builder
        .build_pool(config.pool_size)
        .context("failed to build KeyDB connection pool")?;

    pool.init()
        .await
        .with_context(|| format!("failed to connect to KeyDB at {}:{}", endpoint.host, endpoint.port))?;
    let _: String = pool.ping(None).await.context("KeyDB did not answer PING")?;

    tracing::info!(
        host = %endpoint.host,
        port = endpoint.port,
        tls = endpoint.tls,
        pool_size = config.pool_size,
        "KeyDB pool ready"
    );
    Ok(pool)
}
