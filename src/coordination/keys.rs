//! Key naming for lock and result records.
//!
//! The layout is `redLock:<resource>:lock` and `redLock:<resource>:result`,
//! shared with existing deployments of the protocol, so it must not change.
//! The resource is embedded verbatim: the prefix and both suffixes are fixed
//! and the suffixes differ, so two distinct resources never map to the same
//! key and a lock key never equals a result key.

use super::FlightError;

pub const KEY_PREFIX: &str = "redLock:";
const LOCK_SUFFIX: &str = ":lock";
const RESULT_SUFFIX: &str = ":result";

/// Lock and result keys for one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlightKeys {
    pub lock: String,
    pub result: String,
}

impl FlightKeys {
    /// Derive both keys for `resource`.  Empty identifiers are rejected.
    pub fn for_resource(resource: &str) -> Result<Self, FlightError> {
        if resource.is_empty() {
            return Err(FlightError::InvalidResource(
                "resource identifier must not be empty".to_string(),
            ));
        }
        Ok(Self {
            lock: lock_key(resource),
            result: result_key(resource),
        })
    }
}

pub fn lock_key(resource: &str) -> String {
    format!("{KEY_PREFIX}{resource}{LOCK_SUFFIX}")
}

pub fn result_key(resource: &str) -> String {
    format!("{KEY_PREFIX}{resource}{RESULT_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_format() {
        let keys = FlightKeys::for_resource("test1").unwrap();
        assert_eq!(keys.lock, "redLock:test1:lock");
        assert_eq!(keys.result, "redLock:test1:result");
    }

    #[test]
    fn resource_is_embedded_verbatim() {
        assert_eq!(lock_key("a:b/c d"), "redLock:a:b/c d:lock");
        assert_eq!(result_key("a:b/c d"), "redLock:a:b/c d:result");
    }

    #[test]
    fn separator_bearing_resources_do_not_collide() {
        // "x:lock" as a resource must not alias the lock of "x".
        assert_ne!(lock_key("x"), lock_key("x:lock"));
        assert_ne!(result_key("x"), lock_key("x:result"));
        assert_ne!(lock_key("x:result"), result_key("x:lock"));
    }

    #[test]
    fn empty_resource_is_rejected() {
        assert!(matches!(
            FlightKeys::for_resource(""),
            Err(FlightError::InvalidResource(_))
        ));
    }
}
