//! Heartbeat freshness - Freeze detection from a file's modification time

use std::io::ErrorKind;
use std::path::Path;
use std::time::{Duration, SystemTime};

use tracing::warn;

/// What a heartbeat file says about an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatStatus {
    /// No heartbeat file, the instance is only liveness-checked
    Absent,
    /// Touched within the timeout
    Fresh(Duration),
    /// Older than the timeout: the client is frozen
    Stale(Duration),
}

#[cfg(test)]
impl HeartbeatStatus {
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale(_))
    }
}

/// Classify the heartbeat at `path` as seen at `now`
pub fn check(path: &Path, timeout: Duration, now: SystemTime) -> HeartbeatStatus {
    let modified = match std::fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(e) if e.kind() == ErrorKind::NotFound => return HeartbeatStatus::Absent,
        Err(e) => {
            warn!("Cannot read heartbeat {:?}: {}", path, e);
            return HeartbeatStatus::Absent;
        }
    };

    // A timestamp in the future counts as just written
    let age = now.duration_since(modified).unwrap_or_default();
    if age > timeout {
        HeartbeatStatus::Stale(age)
    } else {
        HeartbeatStatus::Fresh(age)
    }
}
