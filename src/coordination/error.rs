use crate::store::StoreError;

/// Everything a single-flight invocation can fail with.
///
/// Task and store failures are carried through untouched; the other variants
/// are raised by the protocol itself.
#[derive(Debug, thiserror::Error)]
pub enum FlightError {
    /// The elected caller's task failed.  The lock was released first.
    #[error(transparent)]
    Task(anyhow::Error),

    /// The store failed during SET, GET or DEL.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A follower waited `poll_timeout` without seeing a result.
    #[error("Polling timed out ({lock_key}: {result_key}), giving up")]
    PollTimeout { lock_key: String, result_key: String },

    /// A follower found a result that does not decode as the expected type.
    #[error("Failed to parse result from Redis ({lock_key}: {result_key}): raw payload {raw:?}")]
    ResultParse {
        lock_key: String,
        result_key: String,
        raw: String,
        #[source]
        source: serde_json::Error,
    },

    /// The elected caller's result could not be encoded for publishing.
    #[error("failed to serialize result for {result_key}")]
    Serialize {
        result_key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid resource identifier: {0}")]
    InvalidResource(String),

    #[error("invalid single-flight options: {0}")]
    InvalidOptions(String),

    /// The poll loop ran more iterations than its timeout allows without
    /// the timeout firing.  Indicates a broken clock or interval.
    #[error("Unexpected exit from polling loop ({lock_key}: {result_key})")]
    PollLoopExited { lock_key: String, result_key: String },
}

impl FlightError {
    /// `true` for the follower-side timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::PollTimeout { .. })
    }

    /// The task's own error, if this is a task failure.
    pub fn task_error(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Task(err) => Some(err),
            _ => None,
        }
    }
}
