//! Windows process trees via Job Objects

use std::collections::HashMap;
use std::mem;
use std::sync::{LazyLock, RwLock};

use anyhow::{Context, Result};
use tracing::debug;

use windows::Win32::Foundation::{CloseHandle, FALSE, HANDLE};
use windows::Win32::System::JobObjects::*;
use windows::Win32::System::Threading::*;

/// Maps PID to its job handle value (stored as usize for Send/Sync safety)
static JOB_HANDLES: LazyLock<RwLock<HashMap<u32, usize>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Put `pid` in a job that is killed as a whole, including processes it starts later
pub fn assign_kill_job(pid: u32) -> Result<()> {
    unsafe {
        let job = CreateJobObjectW(None, None).context("Failed to create job object")?;

        let mut limit_info = JOBOBJECT_EXTENDED_LIMIT_INFORMATION::default();
        limit_info.BasicLimitInformation.LimitFlags = JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;
        if let Err(e) = SetInformationJobObject(
            job,
            JobObjectExtendedLimitInformation,
            &limit_info as *const _ as *const _,
            mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as u32,
        ) {
            let _ = CloseHandle(job);
            anyhow::bail!("Failed to set job object limits: {}", e);
        }

        let process = match OpenProcess(PROCESS_SET_QUOTA | PROCESS_TERMINATE, FALSE, pid) {
            Ok(h) => h,
            Err(e) => {
                let _ = CloseHandle(job);
                anyhow::bail!("Failed to open process {}: {}", pid, e);
            }
        };
        let result = AssignProcessToJobObject(job, process);
        let _ = CloseHandle(process);
        if let Err(e) = result {
            let _ = CloseHandle(job);
            anyhow::bail!("Failed to assign process {} to job object: {}", pid, e);
        }

        if let Ok(mut handles) = JOB_HANDLES.write() {
            if let Some(stale) = handles.insert(pid, job.0 as usize) {
                let _ = CloseHandle(HANDLE(stale as *mut std::ffi::c_void));
            }
        }
        debug!("Process {} assigned to kill-on-close job", pid);
        Ok(())
    }
}

/// Terminate every process in the job created for `pid`
pub fn terminate_job(pid: u32) -> Result<()> {
    let handle_value = JOB_HANDLES
        .write()
        .map_err(|e| anyhow::anyhow!("Job handle lock poisoned: {}", e))?
        .remove(&pid)
        .context("No job object for process")?;

    unsafe {
        let job = HANDLE(handle_value as *mut std::ffi::c_void);
        let result = TerminateJobObject(job, 1);
        let _ = CloseHandle(job);
        result.context("Failed to terminate job object")
    }
}
