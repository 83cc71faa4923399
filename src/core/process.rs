//! Process management - Handles to spawned game clients

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::process::Child;
use tracing::{debug, warn};

use crate::platform;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("process has already exited")]
    AlreadyExited,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// What the reconciler and log watchers need from a running process
pub trait ProcessHandle: Send + Sync + 'static {
    /// OS process id, if known
    fn pid(&self) -> Option<u32>;

    /// Non-blocking exit check; never waits for the process
    fn is_running(&self) -> bool;

    /// Force kill the process
    fn kill(&self) -> Result<(), ProcessError>;
}

/// False for a missing handle or a process that has exited
pub fn is_alive<H: ProcessHandle>(handle: Option<&H>) -> bool {
    handle.is_some_and(|h| h.is_running())
}

/// Best-effort terminate: an already-exited process is fine, anything else is a warning
pub fn terminate<H: ProcessHandle>(handle: &H, instance: &str) {
    match handle.kill() {
        Ok(()) => debug!("Killed '{}' (pid {:?})", instance, handle.pid()),
        Err(ProcessError::AlreadyExited) => {
            debug!("'{}' had already exited before kill", instance)
        }
        Err(e) => warn!("Failed to kill '{}': {}", instance, e),
    }
}

/// A spawned child process, shared between the reconciler and its log watcher
#[derive(Debug, Clone)]
pub struct ChildProcess {
    pid: Option<u32>,
    child: Arc<Mutex<Child>>,
}

impl ChildProcess {
    pub fn new(child: Child) -> Self {
        Self {
            pid: child.id(),
            child: Arc::new(Mutex::new(child)),
        }
    }

    // A panic elsewhere does not invalidate the child itself
    fn lock(&self) -> MutexGuard<'_, Child> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ProcessHandle for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn is_running(&self) -> bool {
        match self.lock().try_wait() {
            Ok(Some(status)) => {
                debug!("Process {:?} exited with {}", self.pid, status);
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!("Error checking process {:?} status: {}", self.pid, e);
                false
            }
        }
    }

    fn kill(&self) -> Result<(), ProcessError> {
        let mut child = self.lock();
        if child.try_wait()?.is_some() {
            return Err(ProcessError::AlreadyExited);
        }

        if let Some(pid) = self.pid {
            if let Err(e) = platform::kill_process_tree(pid) {
                debug!("Process tree kill for {} failed: {}", pid, e);
            }
        }

        match child.start_kill() {
            Ok(()) => Ok(()),
            // The group kill may already have been reaped
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {
                Err(ProcessError::AlreadyExited)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// In-memory process whose liveness tests control directly
    #[derive(Debug, Clone)]
    pub struct FakeProcess {
        pub alive: Arc<AtomicBool>,
        pub kills: Arc<AtomicUsize>,
    }

    impl FakeProcess {
        pub fn running() -> Self {
            Self {
                alive: Arc::new(AtomicBool::new(true)),
                kills: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn exit(&self) {
            self.alive.store(false, Ordering::SeqCst);
        }

        pub fn kill_count(&self) -> usize {
            self.kills.load(Ordering::SeqCst)
        }
    }

    impl ProcessHandle for FakeProcess {
        fn pid(&self) -> Option<u32> {
            None
        }

        fn is_running(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        fn kill(&self) -> Result<(), ProcessError> {
            self.kills.fetch_add(1, Ordering::SeqCst);
            if self.alive.swap(false, Ordering::SeqCst) {
                Ok(())
            } else {
                Err(ProcessError::AlreadyExited)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeProcess;
    use super::*;

    #[test]
    fn missing_handle_is_not_alive() {
        assert!(!is_alive::<FakeProcess>(None));
    }

    #[test]
    fn exited_handle_is_not_alive() {
        let process = FakeProcess::running();
        assert!(is_alive(Some(&process)));
        process.exit();
        assert!(!is_alive(Some(&process)));
    }

    #[test]
    fn terminate_tolerates_dead_process() {
        let process = FakeProcess::running();
        process.exit();
        terminate(&process, "Alt1");
        assert_eq!(process.kill_count(), 1);
        assert!(!process.is_running());
    }

    #[cfg(unix)]
    async fn wait_for_exit(process: &ChildProcess) -> bool {
        for _ in 0..200 {
            if !process.is_running() {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
        false
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn child_exit_status_is_observed() {
        let child = tokio::process::Command::new("sh")
            .args(["-c", "exit 3"])
            .spawn()
            .unwrap();
        let process = ChildProcess::new(child);
        assert!(wait_for_exit(&process).await);
        assert!(matches!(process.kill(), Err(ProcessError::AlreadyExited)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn fresh_child_is_alive_until_killed() {
        let mut cmd = std::process::Command::new("sh");
        cmd.args(["-c", "sleep 30"]);
        platform::detach(&mut cmd);
        let process = ChildProcess::new(tokio::process::Command::from(cmd).spawn().unwrap());

        assert!(is_alive(Some(&process)));
        process.kill().unwrap();
        assert!(wait_for_exit(&process).await);
    }
}
