//! Warden home directory and on-disk layout resolution.

use std::path::PathBuf;

/// Resolve the Warden home directory.
///
/// Priority:
/// 1) WARDEN_HOME
/// 2) platform home dir + `.warden`
/// 3) `./.warden`
pub fn warden_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("WARDEN_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .map(|home| home.join(".warden"))
        .unwrap_or_else(|| PathBuf::from(".").join(".warden"))
}

/// Base directory for the async job queue.
///
/// `ASYNC_QUEUE_BASE_DIR` overrides the home directory;
/// `ASYNC_QUEUE_SUBDIR` overrides the `async-queue` leaf.
pub fn queue_dir() -> PathBuf {
    let base = std::env::var("ASYNC_QUEUE_BASE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| warden_home());
    let subdir =
        std::env::var("ASYNC_QUEUE_SUBDIR").unwrap_or_else(|_| "async-queue".to_string());
    base.join(subdir)
}

/// Audit trail of RPC traffic: `<home>/audit.ndjson`.
pub fn audit_log_path() -> PathBuf {
    warden_home().join("audit.ndjson")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_dir_defaults_under_home() {
        // Not asserting the absolute prefix (env-dependent); the leaf is stable.
        let dir = queue_dir();
        assert!(dir.ends_with("async-queue") || std::env::var("ASYNC_QUEUE_SUBDIR").is_ok());
    }
}
