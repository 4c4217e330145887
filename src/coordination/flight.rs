//! The single-flight protocol.
//!
//! 1. `SET redLock:<r>:lock <marker> PX lock_ttl NX`.
//! 2. Elected: run the task, `SET redLock:<r>:result <json> PX result_ttl`,
//!    then delete the lock on every exit path, a panicking task included.
//!    The delete only succeeds while the lock still holds this caller's
//!    marker, so an overrunning task cannot free a successor's lock.
//! 3. Follower: `GET` the result every `poll_interval` until it appears or
//!    `poll_timeout` elapses.
//!
//! The lock's TTL is the only protection against a holder that never reaches
//! the release step (a crashed process or a future dropped mid-task).

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tokio::time::Instant;
use tracing::warn;

use super::keys::FlightKeys;
use super::log::Level;
use super::node;
use super::{FlightError, FlightOptions};
use crate::metrics::{Metrics, MetricsRegistry};
use crate::store::{KeyValueStore, SetOptions, StoreError};

/// Run `task` at most once across all concurrent callers for `resource`.
///
/// The caller that wins the lock runs `task` and publishes its result; all
/// other callers wait for that result and return it.  `T` must round-trip
/// through JSON: followers decode the published value as `T`.
pub async fn run_with_single_flight<S, T, F, Fut>(
    store: &S,
    resource: &str,
    task: F,
    options: &FlightOptions,
) -> Result<T, FlightError>
where
    S: KeyValueStore + ?Sized,
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let node_id = node::node_id();
    let flight = Flight {
        store,
        options,
        node_id: &node_id,
        metrics: None,
    };
    flight.run(resource, task).await
}

/// Reusable coordinator bound to one store, one set of options and an
/// optional metrics registry.
#[derive(Clone)]
pub struct SingleFlight {
    store: Arc<dyn KeyValueStore>,
    options: FlightOptions,
    node_id: String,
    metrics: Option<MetricsRegistry>,
}

impl SingleFlight {
    pub fn new(store: Arc<dyn KeyValueStore>, options: FlightOptions) -> Self {
        Self {
            store,
            options,
            node_id: node::node_id(),
            metrics: None,
        }
    }

    /// Record election outcomes and failures into `metrics`.
    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Override the node id written into lock markers.
    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    pub fn options(&self) -> &FlightOptions {
        &self.options
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// See [`run_with_single_flight`].
    pub async fn run<T, F, Fut>(&self, resource: &str, task: F) -> Result<T, FlightError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let flight = Flight {
            store: self.store.as_ref(),
            options: &self.options,
            node_id: &self.node_id,
            metrics: self.metrics.as_ref().map(|m| m.metrics.as_ref()),
        };
        flight.run(resource, task).await
    }
}

/// One invocation's borrowed context.
struct Flight<'a, S: ?Sized> {
    store: &'a S,
    options: &'a FlightOptions,
    node_id: &'a str,
    metrics: Option<&'a Metrics>,
}

impl<S: KeyValueStore + ?Sized> Flight<'_, S> {
    async fn run<T, F, Fut>(&self, resource: &str, task: F) -> Result<T, FlightError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.options.validate()?;
        let keys = FlightKeys::for_resource(resource)?;

        let marker = node::lock_marker(self.node_id);
        let elected = self
            .store
            .set(&keys.lock, &marker, SetOptions::only_if_absent(self.options.lock_ttl))
            .await?;

        if elected {
            self.record(|m| m.elections.inc());
            self.log(
                Level::Debug,
                json!({ "lock_key": keys.lock }),
                &format!("Lock acquired ({}), running task", keys.lock),
            );
            self.lead(&keys, &marker, task).await
        } else {
            self.record(|m| m.follows.inc());
            self.log(
                Level::Debug,
                json!({ "lock_key": keys.lock }),
                &format!("Lock busy ({}), waiting for result…", keys.lock),
            );
            self.follow(&keys).await
        }
    }

    /// Elected path: run, publish, always release.
    async fn lead<T, F, Fut>(&self, keys: &FlightKeys, marker: &str, task: F) -> Result<T, FlightError>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let outcome = match AssertUnwindSafe(async move { task().await }).catch_unwind().await {
            Ok(Ok(value)) => self.publish(keys, &value).await.map(|()| value),
            Ok(Err(err)) => {
                self.record(|m| m.task_failures.inc());
                Err(FlightError::Task(err))
            }
            Err(panic) => {
                self.record(|m| m.task_failures.inc());
                self.log(
                    Level::Error,
                    json!({ "lock_key": keys.lock }),
                    &format!("Task panicked ({}), releasing lock", keys.lock),
                );
                // A failed release is already logged; the panic takes precedence.
                let _ = self.release(keys, marker).await;
                std::panic::resume_unwind(panic);
            }
        };

        match (self.release(keys, marker).await, outcome) {
            // Followers already have the result; surface the store failure.
            (Err(release_err), Ok(_)) => Err(release_err.into()),
            (_, outcome) => outcome,
        }
    }

    /// Delete the lock if it still carries `marker`.
    async fn release(&self, keys: &FlightKeys, marker: &str) -> Result<(), StoreError> {
        match self.store.delete_if_equals(&keys.lock, marker).await {
            Ok(true) => {
                self.log(
                    Level::Debug,
                    json!({ "lock_key": keys.lock }),
                    &format!("Lock released ({})", keys.lock),
                );
                Ok(())
            }
            Ok(false) => {
                self.log(
                    Level::Warn,
                    json!({ "lock_key": keys.lock, "marker": marker }),
                    &format!("Lock expired before release ({}), left untouched", keys.lock),
                );
                Ok(())
            }
            Err(err) => {
                self.record(|m| m.release_failures.inc());
                self.log(
                    Level::Warn,
                    json!({ "lock_key": keys.lock, "error": err.to_string() }),
                    &format!("Lock release failed ({}), lock will expire", keys.lock),
                );
                Err(err)
            }
        }
    }

    async fn publish<T: Serialize>(&self, keys: &FlightKeys, value: &T) -> Result<(), FlightError> {
        let payload = serde_json::to_string(value).map_err(|source| FlightError::Serialize {
            result_key: keys.result.clone(),
            source,
        })?;
        self.store
            .set(&keys.result, &payload, SetOptions::expiring(self.options.result_ttl))
            .await?;
        self.log(
            Level::Info,
            json!({ "lock_key": keys.lock, "result_key": keys.result }),
            &format!("Result published ({})", keys.result),
        );
        Ok(())
    }

    /// Follower path: poll the result key until it appears or we time out.
    async fn follow<T: DeserializeOwned>(&self, keys: &FlightKeys) -> Result<T, FlightError> {
        let started = Instant::now();

        for _ in 0..self.options.max_polls() {
            if started.elapsed() > self.options.poll_timeout {
                self.record(|m| m.poll_timeouts.inc());
                let err = FlightError::PollTimeout {
                    lock_key: keys.lock.clone(),
                    result_key: keys.result.clone(),
                };
                self.log(
                    Level::Warn,
                    json!({ "lock_key": keys.lock, "result_key": keys.result }),
                    &err.to_string(),
                );
                return Err(err);
            }

            // An empty payload is never produced by `publish`; treat it as
            // not yet written.
            if let Some(raw) = self.store.get(&keys.result).await?.filter(|r| !r.is_empty()) {
                return match serde_json::from_str(&raw) {
                    Ok(value) => {
                        let waited = started.elapsed();
                        self.record(|m| m.follow_wait_seconds.observe(waited.as_secs_f64()));
                        Ok(value)
                    }
                    Err(source) => {
                        self.record(|m| m.parse_failures.inc());
                        self.log(
                            Level::Error,
                            json!({ "lock_key": keys.lock, "result_key": keys.result, "raw": raw }),
                            &format!(
                                "Failed to parse result from Redis ({}: {})",
                                keys.lock, keys.result
                            ),
                        );
                        Err(FlightError::ResultParse {
                            lock_key: keys.lock.clone(),
                            result_key: keys.result.clone(),
                            raw,
                            source,
                        })
                    }
                };
            }

            tokio::time::sleep(self.options.poll_interval).await;
        }

        warn!(lock_key = %keys.lock, result_key = %keys.result, "poll loop exhausted without timing out");
        Err(FlightError::PollLoopExited {
            lock_key: keys.lock.clone(),
            result_key: keys.result.clone(),
        })
    }

    fn log(&self, level: Level, meta: serde_json::Value, message: &str) {
        self.options.logger.emit(level, &meta, message);
    }

    fn record<R>(&self, f: impl FnOnce(&Metrics) -> R) {
        if let Some(metrics) = self.metrics {
            f(metrics);
        }
    }
}
