//! Supervisor settings management

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::instance::InstanceConfig;

/// Error line the game client prints when its session token was rejected
pub const INVALID_SESSION_MARKER: &str = "Failed to login: Invalid session";

/// Environment variable that overrides the configuration file location
pub const CONFIG_ENV_VAR: &str = "OVERSEER_CONFIG";

/// Supervisor settings, loaded once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Launcher
    /// Game launcher executable
    pub launcher_executable: PathBuf,
    /// Directory holding one folder per launcher instance
    pub instances_directory: Option<PathBuf>,
    /// Heartbeat file location relative to an instance folder
    pub heartbeat_file: PathBuf,

    // Timing
    /// Pause after every launch before looking at the next instance
    pub launch_delay_secs: u64,
    /// Heartbeat age after which a running instance counts as frozen
    pub heartbeat_timeout_secs: u64,
    /// Pause between reconciliation passes
    pub poll_interval_secs: u64,

    // Detection
    /// Output substrings that make the watcher kill the client
    pub fatal_markers: Vec<String>,

    /// Supervised instances, in launch order
    pub instances: Vec<InstanceConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            launcher_executable: PathBuf::from("prismlauncher"),
            instances_directory: None,
            heartbeat_file: PathBuf::from("minecraft").join("heartbeat.txt"),
            launch_delay_secs: 20,
            heartbeat_timeout_secs: 60,
            poll_interval_secs: 10,
            fatal_markers: vec![INVALID_SESSION_MARKER.to_string()],
            instances: Vec::new(),
        }
    }
}

/// Durations driving the reconciliation loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub launch_delay: Duration,
    pub heartbeat_timeout: Duration,
    pub poll_interval: Duration,
}

impl Settings {
    /// Default configuration file location
    pub fn default_config_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Overseer")
            .join("config.json")
    }

    /// Load and validate settings from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {:?}", path))?;
        let mut settings: Settings = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config at {:?}", path))?;
        settings.validate();
        info!(
            "Loaded {} instance(s) from {:?}",
            settings.instances.len(),
            path
        );
        Ok(settings)
    }

    /// Write settings as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw).with_context(|| format!("Failed to write config at {:?}", path))
    }

    /// A starting point for operators: one example instance
    pub fn template() -> Self {
        Self {
            instances: vec![InstanceConfig::new("Alt1", "play.example.net").with_account("Player")],
            ..Default::default()
        }
    }

    /// Get the instances directory, using the launcher's default if not set
    pub fn get_instances_directory(&self) -> PathBuf {
        self.instances_directory.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("PrismLauncher")
                .join("instances")
        })
    }

    /// Heartbeat file for an instance
    pub fn heartbeat_path(&self, instance: &InstanceConfig) -> PathBuf {
        instance.heartbeat_path.clone().unwrap_or_else(|| {
            self.get_instances_directory()
                .join(&instance.name)
                .join(&self.heartbeat_file)
        })
    }

    /// Instances with their heartbeat paths resolved
    pub fn resolved_instances(&self) -> Vec<InstanceConfig> {
        self.instances
            .iter()
            .map(|instance| InstanceConfig {
                heartbeat_path: Some(self.heartbeat_path(instance)),
                ..instance.clone()
            })
            .collect()
    }

    pub fn timing(&self) -> Timing {
        Timing {
            launch_delay: Duration::from_secs(self.launch_delay_secs),
            heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
        }
    }

    /// Validate settings and fix any invalid values
    pub fn validate(&mut self) {
        self.launch_delay_secs = self.launch_delay_secs.max(1);
        self.heartbeat_timeout_secs = self.heartbeat_timeout_secs.max(5);
        self.poll_interval_secs = self.poll_interval_secs.max(1);

        // An empty marker would match every line
        let before = self.fatal_markers.len();
        self.fatal_markers.retain(|m| !m.trim().is_empty());
        if self.fatal_markers.len() != before {
            warn!("Ignoring {} empty fatal marker(s)", before - self.fatal_markers.len());
        }

        let mut seen = HashSet::new();
        self.instances.retain(|instance| {
            if seen.insert(instance.name.clone()) {
                true
            } else {
                warn!(
                    "Instance '{}' is configured more than once, keeping the first entry",
                    instance.name
                );
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let settings: Settings = serde_json::from_str(
            r#"{"instances":[{"name":"Alt1","server":"play.example.net","account":"00zb"}]}"#,
        )
        .unwrap();
        assert_eq!(settings.launch_delay_secs, 20);
        assert_eq!(settings.heartbeat_timeout_secs, 60);
        assert_eq!(settings.poll_interval_secs, 10);
        assert_eq!(settings.fatal_markers, vec![INVALID_SESSION_MARKER]);
        assert_eq!(settings.instances[0].account.as_deref(), Some("00zb"));
    }

    #[test]
    fn validate_drops_duplicates_and_clamps() {
        let mut settings = Settings {
            launch_delay_secs: 0,
            heartbeat_timeout_secs: 1,
            poll_interval_secs: 0,
            fatal_markers: vec!["  ".into(), INVALID_SESSION_MARKER.into()],
            instances: vec![
                InstanceConfig::new("Alt1", "a.example.net"),
                InstanceConfig::new("Alt2", "b.example.net"),
                InstanceConfig::new("Alt1", "c.example.net"),
            ],
            ..Default::default()
        };
        settings.validate();

        let timing = settings.timing();
        assert_eq!(timing.launch_delay, Duration::from_secs(1));
        assert_eq!(timing.heartbeat_timeout, Duration::from_secs(5));
        assert_eq!(timing.poll_interval, Duration::from_secs(1));
        assert_eq!(settings.fatal_markers, vec![INVALID_SESSION_MARKER]);
        let names: Vec<_> = settings.instances.iter().map(|i| i.server.as_str()).collect();
        assert_eq!(names, vec!["a.example.net", "b.example.net"]);
    }

    #[test]
    fn heartbeat_path_is_joined_once() {
        let settings = Settings {
            instances_directory: Some(PathBuf::from("/games/instances")),
            ..Default::default()
        };
        let derived = settings.heartbeat_path(&InstanceConfig::new("Alt1", "x"));
        assert_eq!(
            derived,
            PathBuf::from("/games/instances/Alt1/minecraft/heartbeat.txt")
        );

        let explicit = InstanceConfig::new("Alt2", "x").with_heartbeat_path("/tmp/hb");
        assert_eq!(settings.heartbeat_path(&explicit), PathBuf::from("/tmp/hb"));
    }

    #[test]
    fn save_then_load_keeps_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        Settings::template().save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded.instances, Settings::template().instances);
    }
}
