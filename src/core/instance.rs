//! Instance management - Configured game-client instances and their live processes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for one supervised instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Launcher instance name, also the unique identity
    pub name: String,
    /// Server address the client should join
    pub server: String,
    /// Launcher account to play as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    /// Explicit heartbeat file, overrides the derived path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_path: Option<PathBuf>,
}

impl InstanceConfig {
    pub fn new(name: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            server: server.into(),
            account: None,
            heartbeat_path: None,
        }
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    #[cfg(test)]
    pub fn with_heartbeat_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.heartbeat_path = Some(path.into());
        self
    }

    /// Account name for status lines
    pub fn account_label(&self) -> &str {
        self.account.as_deref().unwrap_or("default account")
    }
}

/// A launched instance tracked by the reconciler
#[derive(Debug)]
pub struct RunningInstance<H> {
    /// Configuration this process was launched from
    pub config: Arc<InstanceConfig>,
    /// Process handle, owned by the reconciler
    pub handle: H,
    /// When the process was launched
    pub launched_at: DateTime<Utc>,
    /// Number of relaunches before this one
    pub restart_count: u32,
}

impl<H> RunningInstance<H> {
    pub fn new(config: Arc<InstanceConfig>, handle: H) -> Self {
        Self {
            config,
            handle,
            launched_at: Utc::now(),
            restart_count: 0,
        }
    }

    /// Replace a previous run, carrying its restart counter forward
    pub fn replacing<P>(previous: &RunningInstance<P>, handle: H) -> Self {
        Self {
            config: Arc::clone(&previous.config),
            handle,
            launched_at: Utc::now(),
            restart_count: previous.restart_count + 1,
        }
    }

    /// Get uptime duration since launch
    pub fn uptime(&self) -> chrono::Duration {
        Utc::now() - self.launched_at
    }

    /// Format uptime as human-readable string
    pub fn uptime_string(&self) -> String {
        format_uptime(self.uptime().num_seconds())
    }
}

fn format_uptime(secs: i64) -> String {
    let secs = secs.max(0);
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_is_optional_in_json() {
        let config: InstanceConfig =
            serde_json::from_str(r#"{"name":"Alt1","server":"play.example.net"}"#).unwrap();
        assert_eq!(config, InstanceConfig::new("Alt1", "play.example.net"));
        assert_eq!(config.account_label(), "default account");
    }

    #[test]
    fn replacing_increments_restart_count() {
        let config = Arc::new(InstanceConfig::new("Alt1", "play.example.net"));
        let first = RunningInstance::new(config, 1u32);
        let second = RunningInstance::replacing(&first, 2u32);
        let third = RunningInstance::replacing(&second, 3u32);
        assert_eq!(third.restart_count, 2);
        assert_eq!(third.config.name, "Alt1");
    }

    #[test]
    fn uptime_formatting() {
        assert_eq!(format_uptime(-3), "0s");
        assert_eq!(format_uptime(42), "42s");
        assert_eq!(format_uptime(125), "2m 5s");
        assert_eq!(format_uptime(7260), "2h 1m");
        assert_eq!(format_uptime(90000), "1d 1h");
    }
}
