//! Caller-supplied log hooks.
//!
//! Every protocol event is always emitted through `tracing`.  Callers that
//! want the events in their own sink can additionally supply any subset of
//! the four hooks; missing hooks are skipped.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// A hook receives a JSON object of structured fields and a message.
pub type LogFn = Arc<dyn Fn(&Value, &str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

/// Four independently optional log hooks.  The default has none set.
#[derive(Clone, Default)]
pub struct LogHooks {
    pub debug: Option<LogFn>,
    pub info: Option<LogFn>,
    pub warn: Option<LogFn>,
    pub error: Option<LogFn>,
}

impl fmt::Debug for LogHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogHooks")
            .field("debug", &self.debug.is_some())
            .field("info", &self.info.is_some())
            .field("warn", &self.warn.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

impl LogHooks {
    pub fn with_debug(mut self, hook: impl Fn(&Value, &str) + Send + Sync + 'static) -> Self {
        self.debug = Some(Arc::new(hook));
        self
    }

    pub fn with_info(mut self, hook: impl Fn(&Value, &str) + Send + Sync + 'static) -> Self {
        self.info = Some(Arc::new(hook));
        self
    }

    pub fn with_warn(mut self, hook: impl Fn(&Value, &str) + Send + Sync + 'static) -> Self {
        self.warn = Some(Arc::new(hook));
        self
    }

    pub fn with_error(mut self, hook: impl Fn(&Value, &str) + Send + Sync + 'static) -> Self {
        self.error = Some(Arc::new(hook));
        self
    }

    fn hook(&self, level: Level) -> Option<&LogFn> {
        match level {
            Level::Debug => self.debug.as_ref(),
            Level::Info => self.info.as_ref(),
            Level::Warn => self.warn.as_ref(),
            Level::Error => self.error.as_ref(),
        }
    }

    /// Emit one event to `tracing` and, if present, to the matching hook.
    pub fn emit(&self, level: Level, meta: &Value, message: &str) {
        match level {
            Level::Debug => tracing::debug!(%meta, "{message}"),
            Level::Info => tracing::info!(%meta, "{message}"),
            Level::Warn => tracing::warn!(%meta, "{message}"),
            Level::Error => tracing::error!(%meta, "{message}"),
        }
        if let Some(hook) = self.hook(level) {
            hook(meta, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    #[test]
    fn missing_hooks_are_skipped() {
        let hooks = LogHooks::default();
        hooks.emit(Level::Debug, &json!({}), "nobody listens");
        hooks.emit(Level::Error, &json!({}), "still nobody");
    }

    #[test]
    fn only_matching_hook_is_called() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let hooks = LogHooks::default().with_warn(move |meta, msg| {
            sink.lock().unwrap().push(format!("{}|{msg}", meta["lock_key"]));
        });

        hooks.emit(Level::Debug, &json!({ "lock_key": "a" }), "debug");
        hooks.emit(Level::Warn, &json!({ "lock_key": "b" }), "warn");

        assert_eq!(*seen.lock().unwrap(), vec!["\"b\"|warn".to_string()]);
    }

    #[test]
    fn debug_output_lists_present_hooks() {
        let hooks = LogHooks::default().with_info(|_, _| {});
        let rendered = format!("{hooks:?}");
        assert!(rendered.contains("info: true"));
        assert!(rendered.contains("debug: false"));
    }
}
