//! Launching - Start game clients through the launcher executable

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::instance::InstanceConfig;
use super::process::{ChildProcess, ProcessHandle};
use super::watcher::{LineTrigger, LogWatcher};
use crate::platform;

/// Starts a process for an instance
pub trait Launcher {
    type Handle: ProcessHandle;

    /// Start the instance and return immediately
    fn launch(&self, config: &InstanceConfig) -> Result<Self::Handle>;
}

/// Launches instances through a Prism-style launcher CLI
pub struct GameLauncher {
    executable: PathBuf,
    trigger: Arc<dyn LineTrigger>,
}

impl GameLauncher {
    pub fn new(executable: impl Into<PathBuf>, trigger: Arc<dyn LineTrigger>) -> Self {
        Self {
            executable: executable.into(),
            trigger,
        }
    }

    /// `-l <instance> -s <server> [-a <account>]`
    pub fn arguments(config: &InstanceConfig) -> Vec<String> {
        let mut args = vec![
            "-l".to_string(),
            config.name.clone(),
            "-s".to_string(),
            config.server.clone(),
        ];
        if let Some(ref account) = config.account {
            args.push("-a".to_string());
            args.push(account.clone());
        }
        args
    }
}

impl Launcher for GameLauncher {
    type Handle = ChildProcess;

    fn launch(&self, config: &InstanceConfig) -> Result<ChildProcess> {
        info!(
            "Launching {} with account {}...",
            config.name,
            config.account_label()
        );

        let mut cmd = Command::new(&self.executable);
        cmd.args(Self::arguments(config));
        spawn_watched(cmd, &config.name, Arc::clone(&self.trigger))
            .with_context(|| format!("Failed to launch {:?}", self.executable))
    }
}

/// Spawn `cmd` with its output captured and a log watcher attached
pub fn spawn_watched(
    mut cmd: Command,
    instance: &str,
    trigger: Arc<dyn LineTrigger>,
) -> Result<ChildProcess> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    platform::detach(&mut cmd);

    let mut child = tokio::process::Command::from(cmd)
        .spawn()
        .context("Failed to spawn process")?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let process = ChildProcess::new(child);
    info!("Spawned '{}' with PID {:?}", instance, process.pid());
    if let Some(pid) = process.pid() {
        if let Err(e) = platform::register_process_tree(pid) {
            warn!("'{}' child processes may outlive a kill: {}", instance, e);
        }
    }

    LogWatcher::new(instance, process.clone(), trigger).spawn(stdout, stderr);
    Ok(process)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::settings::INVALID_SESSION_MARKER;
    use crate::core::watcher::MarkerTrigger;

    #[test]
    fn arguments_without_account() {
        let config = InstanceConfig::new("Alt2", "play.example.net");
        assert_eq!(
            GameLauncher::arguments(&config),
            vec!["-l", "Alt2", "-s", "play.example.net"]
        );
    }

    #[test]
    fn arguments_with_account() {
        let config = InstanceConfig::new("Alt1", "play.example.net").with_account("00zb");
        assert_eq!(
            GameLauncher::arguments(&config),
            vec!["-l", "Alt1", "-s", "play.example.net", "-a", "00zb"]
        );
    }

    #[tokio::test]
    async fn missing_executable_is_an_error() {
        let launcher = GameLauncher::new(
            "/definitely/not/a/launcher",
            Arc::new(MarkerTrigger::default()),
        );
        let config = InstanceConfig::new("Alt1", "play.example.net");
        assert!(launcher.launch(&config).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn watcher_kills_client_reporting_invalid_session() {
        let mut cmd = Command::new("sh");
        cmd.args([
            "-c",
            "echo starting; echo 'Failed to login: Invalid session' >&2; sleep 30",
        ]);
        let process = spawn_watched(
            cmd,
            "Alt1",
            Arc::new(MarkerTrigger::new([INVALID_SESSION_MARKER])),
        )
        .unwrap();

        let mut exited = false;
        for _ in 0..200 {
            if !process.is_running() {
                exited = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
        assert!(exited, "client should have been killed by its watcher");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn client_does_not_inherit_single_instance_lock() {
        let name = format!("overseer-lock-test-{}", std::process::id());
        let guard = single_instance::SingleInstance::new(&name).unwrap();
        assert!(guard.is_single());
        platform::mark_inherited_close_on_exec().unwrap();

        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 5"]);
        let process = spawn_watched(cmd, "Alt1", Arc::new(MarkerTrigger::default())).unwrap();
        let pid = process.pid().unwrap();

        let sockets: Vec<String> = std::fs::read_dir(format!("/proc/{}/fd", pid))
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| std::fs::read_link(entry.path()).ok())
            .map(|target| target.to_string_lossy().into_owned())
            .filter(|target| target.starts_with("socket:"))
            .collect();
        assert!(sockets.is_empty(), "client inherited {:?}", sockets);

        // With the client still running, a new supervisor can take the lock
        drop(guard);
        let next = single_instance::SingleInstance::new(&name).unwrap();
        assert!(next.is_single());

        process.kill().unwrap();
    }
}
