//! Unix process groups and descriptor hygiene

use std::os::unix::process::CommandExt;
use std::process::Command;

use anyhow::Result;

/// Upper bound on descriptors scanned when the limit is unknown or huge
const MAX_SCANNED_FDS: libc::c_long = 65536;

/// Make the spawned process a session (and process group) leader
pub fn new_session(cmd: &mut Command) {
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

/// Send SIGKILL to the process group led by `pid`
pub fn kill_process_group(pid: u32) -> Result<()> {
    let result = unsafe { libc::kill(-(pid as i32), libc::SIGKILL) };
    if result == 0 {
        Ok(())
    } else {
        anyhow::bail!(
            "Failed to kill process group: {}",
            std::io::Error::last_os_error()
        )
    }
}

/// Set FD_CLOEXEC on every open descriptor above stderr, returning how many changed
pub fn set_cloexec_on_open_fds() -> Result<usize> {
    let limit = unsafe { libc::sysconf(libc::_SC_OPEN_MAX) };
    let limit = if limit <= 0 {
        1024
    } else {
        limit.min(MAX_SCANNED_FDS)
    };

    let mut marked = 0;
    for fd in 3..limit as libc::c_int {
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        if flags == -1 || flags & libc::FD_CLOEXEC != 0 {
            continue;
        }
        if unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } == -1 {
            anyhow::bail!(
                "Failed to set close-on-exec on fd {}: {}",
                fd,
                std::io::Error::last_os_error()
            );
        }
        marked += 1;
    }
    Ok(marked)
}

