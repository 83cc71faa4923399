//! Resource monitoring - Per-instance CPU and memory for pass summaries

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::trace;

/// Resource usage of one process
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceUsage {
    /// CPU usage since the previous sample, in percent of one core
    pub cpu_percent: f32,
    /// Resident memory in bytes
    pub memory_bytes: u64,
}

impl ResourceUsage {
    pub fn memory_mb(&self) -> u64 {
        self.memory_bytes / (1024 * 1024)
    }
}

/// Samples resource usage of supervised processes
pub struct ResourceMonitor {
    system: System,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// Refresh only the given processes
    pub fn refresh(&mut self, pids: &[u32]) {
        let pids: Vec<Pid> = pids.iter().copied().map(Pid::from_u32).collect();
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&pids),
            true,
            ProcessRefreshKind::new().with_cpu().with_memory(),
        );
        trace!("Resource monitor refreshed {} process(es)", pids.len());
    }

    /// Get resource usage for a specific process
    pub fn get_process_usage(&self, pid: u32) -> Option<ResourceUsage> {
        let process = self.system.process(Pid::from_u32(pid))?;
        Some(ResourceUsage {
            cpu_percent: process.cpu_usage(),
            memory_bytes: process.memory(),
        })
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_own_process() {
        let mut monitor = ResourceMonitor::new();
        let pid = std::process::id();
        monitor.refresh(&[pid]);
        let usage = monitor.get_process_usage(pid).expect("own process is visible");
        assert!(usage.memory_bytes > 0);
    }

    #[test]
    fn unknown_pid_has_no_usage() {
        let monitor = ResourceMonitor::new();
        assert_eq!(monitor.get_process_usage(u32::MAX), None);
    }

    #[test]
    fn memory_in_megabytes() {
        let usage = ResourceUsage {
            cpu_percent: 0.0,
            memory_bytes: 3 * 1024 * 1024 + 17,
        };
        assert_eq!(usage.memory_mb(), 3);
    }
}
