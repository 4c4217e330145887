/// Derive a stable-ish node identifier.
///
/// Prefers the `FLIGHTLOCK_NODE_ID` environment variable.  Falls back to
/// `<hostname>-<random-8-chars>` so that every process gets a unique id even
/// on the same host.
pub fn node_id() -> String {
    std::env::var("FLIGHTLOCK_NODE_ID")
        .ok()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| {
            let hostname = gethostname::gethostname().to_string_lossy().into_owned();
            let suffix = &uuid::Uuid::new_v4().simple().to_string()[..8];
            format!("{hostname}-{suffix}")
        })
}

/// Value written into a lock record: `<node_id>:<unix_ts>:<token>`.
///
/// The random token makes every acquisition distinct, so the holder can
/// release the lock with a compare-and-delete without touching a lock that
/// expired and was re-acquired by someone else in the meantime.
pub fn lock_marker(node_id: &str) -> String {
    let token = &uuid::Uuid::new_v4().simple().to_string()[..8];
    format!("{node_id}:{}:{token}", chrono::Utc::now().timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_is_not_empty() {
        assert!(!node_id().is_empty());
    }

    #[test]
    fn lock_marker_starts_with_node_id() {
        let marker = lock_marker("node-a");
        let mut parts = marker.rsplitn(3, ':');
        let token = parts.next().unwrap();
        let ts = parts.next().unwrap();
        assert_eq!(parts.next(), Some("node-a"));
        assert!(ts.parse::<i64>().unwrap() > 0);
        assert_eq!(token.len(), 8);
    }

    #[test]
    fn lock_markers_differ_per_acquisition() {
        assert_ne!(lock_marker("node-a"), lock_marker("node-a"));
    }
}
