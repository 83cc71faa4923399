//! Platform-specific process control

#[cfg(unix)]
pub mod unix;

#[cfg(windows)]
pub mod windows;

use anyhow::Result;

/// Start the child in its own process group so its whole tree can be killed
pub fn detach(cmd: &mut std::process::Command) {
    #[cfg(unix)]
    {
        unix::new_session(cmd);
    }
    #[cfg(not(unix))]
    {
        let _ = cmd;
    }
}

/// Tie a freshly spawned process and its future children together for `kill_process_tree`
pub fn register_process_tree(pid: u32) -> Result<()> {
    #[cfg(windows)]
    {
        windows::assign_kill_job(pid)
    }
    #[cfg(not(windows))]
    {
        // The session created by `detach` already groups the tree
        let _ = pid;
        Ok(())
    }
}

/// Force kill a process and everything it started
pub fn kill_process_tree(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        unix::kill_process_group(pid)
    }
    #[cfg(windows)]
    {
        windows::terminate_job(pid)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = pid;
        anyhow::bail!("Unsupported platform")
    }
}

/// Keep descriptors the supervisor holds (such as its single-instance lock) out of children
pub fn mark_inherited_close_on_exec() -> Result<usize> {
    #[cfg(unix)]
    {
        unix::set_cloexec_on_open_fds()
    }
    #[cfg(not(unix))]
    {
        // Handles are created non-inheritable
        Ok(0)
    }
}
