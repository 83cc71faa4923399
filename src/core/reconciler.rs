//! Reconciliation - Keep every configured instance running
//!
//! Each pass walks the instances in configured order and either leaves an
//! instance alone, launches it (not running), or kills and relaunches it
//! (heartbeat stale). Every launch is followed by the settle delay before the
//! next instance is looked at, so clients never cold-start together.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, error, info, warn};

use super::heartbeat::{self, HeartbeatStatus};
use super::instance::{InstanceConfig, RunningInstance};
use super::launcher::Launcher;
use super::monitor::ResourceMonitor;
use super::process::{is_alive, terminate, ProcessHandle};
use super::settings::Timing;

/// What a pass did for one instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Running with a fresh or absent heartbeat
    Healthy,
    /// First launch
    Launched,
    /// Relaunched after the process exited
    Restarted,
    /// Killed and relaunched because its heartbeat went stale
    FreezeRestarted,
    /// The launcher could not start it; retried next pass
    LaunchFailed,
}

/// Tally of one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub healthy: usize,
    pub launched: usize,
    pub restarted: usize,
    pub frozen: usize,
    pub failed: usize,
}

impl PassReport {
    fn record(&mut self, action: Action) {
        match action {
            Action::Healthy => self.healthy += 1,
            Action::Launched => self.launched += 1,
            Action::Restarted => self.restarted += 1,
            Action::FreezeRestarted => self.frozen += 1,
            Action::LaunchFailed => self.failed += 1,
        }
    }

    /// Launch attempts made during the pass
    pub fn actions(&self) -> usize {
        self.launched + self.restarted + self.frozen + self.failed
    }
}

/// Owns the instance table and drives the supervision loop
pub struct Reconciler<L: Launcher> {
    launcher: L,
    instances: Vec<Arc<InstanceConfig>>,
    timing: Timing,
    running: HashMap<String, RunningInstance<L::Handle>>,
    monitor: Option<ResourceMonitor>,
}

impl<L: Launcher> Reconciler<L> {
    pub fn new(launcher: L, instances: Vec<InstanceConfig>, timing: Timing) -> Self {
        Self {
            launcher,
            instances: instances.into_iter().map(Arc::new).collect(),
            timing,
            running: HashMap::new(),
            monitor: None,
        }
    }

    /// Log per-instance CPU and memory after each pass
    pub fn with_monitor(mut self, monitor: ResourceMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Run passes forever, idling between them
    pub async fn run(&mut self) {
        info!(
            "Supervising {} instance(s), checking every {}s",
            self.instances.len(),
            self.timing.poll_interval.as_secs()
        );
        loop {
            let report = self.run_pass().await;
            if report.actions() > 0 {
                info!(
                    "Pass complete: {} healthy, {} launched, {} restarted, {} frozen, {} failed",
                    report.healthy, report.launched, report.restarted, report.frozen, report.failed
                );
            } else {
                debug!("Pass complete: all {} instance(s) healthy", report.healthy);
            }
            tokio::time::sleep(self.timing.poll_interval).await;
        }
    }

    /// Kill every tracked client so none outlives the supervisor
    pub fn shutdown(&mut self) -> usize {
        let count = self.running.len();
        for (name, running) in self.running.drain() {
            terminate(&running.handle, &name);
        }
        info!("Stopped {} supervised instance(s)", count);
        count
    }

    /// One pass over every instance, in configured order
    pub async fn run_pass(&mut self) -> PassReport {
        let mut report = PassReport::default();
        let instances = self.instances.clone();
        for config in &instances {
            let action = self.reconcile_instance(config).await;
            report.record(action);
        }
        self.log_usage();
        report
    }

    async fn reconcile_instance(&mut self, config: &Arc<InstanceConfig>) -> Action {
        let previous = self.running.get(&config.name);
        if !is_alive(previous.map(|r| &r.handle)) {
            let action = match previous {
                None => {
                    info!("[{}] Not running. Launching...", config.name);
                    Action::Launched
                }
                Some(previous) => {
                    info!(
                        "[{}] Not running or crashed after {}. Restarting...",
                        config.name,
                        previous.uptime_string()
                    );
                    Action::Restarted
                }
            };
            return self.launch(config, action).await;
        }

        let Some(path) = config.heartbeat_path.as_deref() else {
            return Action::Healthy;
        };
        match heartbeat::check(path, self.timing.heartbeat_timeout, SystemTime::now()) {
            HeartbeatStatus::Stale(age) => {
                warn!(
                    "[{}] FROZEN detected (heartbeat {}s old). Killing and restarting...",
                    config.name,
                    age.as_secs()
                );
                if let Some(frozen) = self.running.get(&config.name) {
                    terminate(&frozen.handle, &config.name);
                }
                self.launch(config, Action::FreezeRestarted).await
            }
            HeartbeatStatus::Fresh(_) | HeartbeatStatus::Absent => Action::Healthy,
        }
    }

    /// Launch, record the new handle, then hold the pass for the settle delay
    async fn launch(&mut self, config: &Arc<InstanceConfig>, action: Action) -> Action {
        let outcome = match self.launcher.launch(config) {
            Ok(handle) => {
                let running = match self.running.get(&config.name) {
                    Some(previous) => RunningInstance::replacing(previous, handle),
                    None => RunningInstance::new(Arc::clone(config), handle),
                };
                if running.restart_count > 0 {
                    debug!("[{}] Restart #{}", config.name, running.restart_count);
                }
                self.running.insert(config.name.clone(), running);
                action
            }
            Err(e) => {
                // A dead handle stays tracked so the next pass retries
                error!("[{}] Launch failed: {:#}", config.name, e);
                Action::LaunchFailed
            }
        };

        info!(
            "Waiting {} seconds for {} to initialize...",
            self.timing.launch_delay.as_secs(),
            config.name
        );
        tokio::time::sleep(self.timing.launch_delay).await;
        outcome
    }

    fn log_usage(&mut self) {
        let Some(monitor) = self.monitor.as_mut() else {
            return;
        };
        let pids: Vec<u32> = self
            .running
            .values()
            .filter_map(|r| r.handle.pid())
            .collect();
        monitor.refresh(&pids);

        for config in &self.instances {
            let Some(running) = self.running.get(&config.name) else {
                continue;
            };
            let Some(usage) = running
                .handle
                .pid()
                .and_then(|pid| monitor.get_process_usage(pid))
            else {
                continue;
            };
            debug!(
                "[{}] up {}, restarts {}, cpu {:.1}%, memory {} MB",
                config.name,
                running.uptime_string(),
                running.restart_count,
                usage.cpu_percent,
                usage.memory_mb()
            );
        }
    }
}
