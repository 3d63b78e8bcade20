/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Linux backend: `sched_setscheduler(2)` for priorities, `SIGSTOP` /
//! `SIGCONT` for suspend / resume.
//!
//! Raising a process to `SCHED_FIFO` requires `CAP_SYS_NICE`; without it every
//! priority directive fails with `EPERM`, which the scheduler logs and
//! tolerates.

use std::path::Path;

use nix::libc;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::debug;

use super::{OsBackend, OsError, ProcessHandle};
use crate::task::{SchedPolicy, TaskId};

#[derive(Debug, Default)]
pub struct LinuxBackend;

impl LinuxBackend {
    pub fn new() -> Self {
        Self
    }

    fn signal(&self, op: &'static str, handle: ProcessHandle, sig: Signal) -> Result<(), OsError> {
        kill(Pid::from_raw(handle.pid() as i32), sig).map_err(|e| OsError {
            op,
            pid: handle.pid(),
            reason: e.to_string(),
        })
    }
}

impl OsBackend for LinuxBackend {
    fn lookup_process(&self, id: TaskId) -> Option<ProcessHandle> {
        if id.0 == 0 {
            return None;
        }
        Path::new(&format!("/proc/{}", id.0))
            .exists()
            .then(|| ProcessHandle::new(id.0))
    }

    fn set_priority(
        &self,
        handle: ProcessHandle,
        policy: SchedPolicy,
        level: i32,
    ) -> Result<(), OsError> {
        // sched_param has extra fields on some libcs; start from zero.
        // SAFETY: sched_param is plain old data.
        let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
        param.sched_priority = level;

        // SAFETY: `param` outlives the call and the kernel only reads it.
        let rc = unsafe {
            libc::sched_setscheduler(handle.pid() as libc::pid_t, policy.to_linux_int(), &param)
        };
        if rc != 0 {
            return Err(OsError {
                op: "sched_setscheduler",
                pid: handle.pid(),
                reason: std::io::Error::last_os_error().to_string(),
            });
        }
        debug!(pid = handle.pid(), ?policy, level, "priority set");
        Ok(())
    }

    fn suspend(&self, handle: ProcessHandle) -> Result<(), OsError> {
        self.signal("suspend", handle, Signal::SIGSTOP)
    }

    fn resume(&self, handle: ProcessHandle) -> Result<(), OsError> {
        self.signal("resume", handle, Signal::SIGCONT)
    }
}
