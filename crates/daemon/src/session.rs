// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Greeter and user session processes.
//!
//! Spawning is behind [`SessionLauncher`] so displays stay independent of how
//! processes come to exist: the real [`ProcessLauncher`] forks a process
//! group with a scrubbed environment (and drops privileges to the target
//! user when the daemon is privileged), while tests substitute a capturing
//! fake. Exit is reported through the supervisor channel; each child is
//! owned by exactly one waiter task.

use std::ffi::CString;
use std::os::fd::OwnedFd;

use nix::sys::signal::{kill, Signal};
use nix::unistd::{Gid, Pid, Uid, User};
use tracing::{debug, warn};

use crate::error::{DaemonError, Result};
use crate::event::{DisplayId, EventSender};

/// What kind of process a session slot runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Greeter,
    User,
}

/// Everything needed to spawn one session process.
pub struct SessionSpec {
    pub display: DisplayId,
    pub kind: SessionKind,
    /// Account the process runs as. Ignored when the daemon is unprivileged.
    pub username: Option<String>,
    pub command: Vec<String>,
    pub env: Vec<(String, String)>,
    /// File descriptors the child inherits (greeter pipe ends). The parent's
    /// duplicates are closed once the spawn has happened, on both paths.
    pub inherit_fds: Vec<OwnedFd>,
}

/// Handle on a running session process.
pub trait SessionProcess: Send {
    fn pid(&self) -> Option<i32>;
    /// Ask the process group to exit.
    fn terminate(&mut self);
    /// Force-kill the process group.
    fn kill(&mut self);
}

/// Spawns session processes. Implemented by [`ProcessLauncher`] and by the
/// capturing fake in `test_support`.
pub trait SessionLauncher: Send + Sync {
    fn launch(&self, spec: SessionSpec, events: &EventSender) -> Result<Box<dyn SessionProcess>>;
}

/// A supervised session: one process tree plus the username it belongs to.
pub struct Session {
    kind: SessionKind,
    username: Option<String>,
    process: Box<dyn SessionProcess>,
    stopping: bool,
}

impl Session {
    pub fn new(kind: SessionKind, username: Option<String>, process: Box<dyn SessionProcess>) -> Self {
        Self { kind, username, process, stopping: false }
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn pid(&self) -> Option<i32> {
        self.process.pid()
    }

    /// Whether this session was asked to stop by the daemon, as opposed to
    /// exiting on its own.
    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    pub fn stop(&mut self) {
        if !self.stopping {
            self.stopping = true;
            self.process.terminate();
        }
    }
}

/// Real launcher: fork/exec into a fresh process group.
pub struct ProcessLauncher {
    privileged: bool,
}

impl ProcessLauncher {
    pub fn new(privileged: bool) -> Self {
        Self { privileged }
    }
}

impl SessionLauncher for ProcessLauncher {
    fn launch(&self, spec: SessionSpec, events: &EventSender) -> Result<Box<dyn SessionProcess>> {
        if spec.command.is_empty() {
            return Err(DaemonError::config("session has an empty command"));
        }

        let mut command = tokio::process::Command::new(&spec.command[0]);
        command.args(&spec.command[1..]);
        command.env_clear();
        for (key, value) in &spec.env {
            command.env(key, value);
        }

        // Resolve the target account before forking; the child must not
        // allocate after fork.
        let mut identity: Option<(Uid, Gid, CString)> = None;
        if self.privileged {
            if let Some(username) = &spec.username {
                let user = User::from_name(username)
                    .map_err(|e| DaemonError::io("user lookup failed", e.into()))?
                    .ok_or_else(|| {
                        DaemonError::config(format!("no such user: {username}"))
                    })?;
                command.env("HOME", &user.dir);
                command.env("SHELL", &user.shell);
                command.current_dir(&user.dir);
                let name = CString::new(username.as_bytes())
                    .map_err(|_| DaemonError::config("username contains a NUL byte"))?;
                identity = Some((user.uid, user.gid, name));
            }
        }

        // setsid puts the child in its own process group so the whole
        // session tree can be signalled at once.
        #[allow(unsafe_code)]
        // SAFETY: the closure runs post-fork pre-exec and only performs
        // async-signal-safe syscalls (setsid, initgroups, setgid, setuid).
        unsafe {
            command.pre_exec(move || {
                nix::unistd::setsid().map_err(std::io::Error::from)?;
                if let Some((uid, gid, ref name)) = identity {
                    nix::unistd::initgroups(name, gid).map_err(std::io::Error::from)?;
                    nix::unistd::setgid(gid).map_err(std::io::Error::from)?;
                    nix::unistd::setuid(uid).map_err(std::io::Error::from)?;
                }
                Ok(())
            });
        }

        let mut child = command
            .spawn()
            .map_err(|e| DaemonError::io(format!("failed to spawn {}", spec.command[0]), e))?;
        let pid = child.id().map(|p| p as i32);
        debug!(display = %spec.display, kind = ?spec.kind, pid = ?pid, "session spawned");

        // Parent-side duplicates of inherited fds are released here.
        drop(spec.inherit_fds);

        let events = events.clone();
        let display_id = spec.display;
        let kind = spec.kind;
        tokio::spawn(async move {
            let exit_code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!(display = %display_id, "failed to wait for session: {e}");
                    None
                }
            };
            debug!(display = %display_id, ?kind, ?exit_code, "session exited");
            events.session_stopped(display_id, kind, exit_code);
        });

        Ok(Box::new(ProcessHandle { pid: pid.map(Pid::from_raw) }))
    }
}

struct ProcessHandle {
    pid: Option<Pid>,
}

impl ProcessHandle {
    fn signal_group(&self, signal: Signal) {
        if let Some(pid) = self.pid {
            let _ = kill(Pid::from_raw(-pid.as_raw()), signal);
        }
    }
}

impl SessionProcess for ProcessHandle {
    fn pid(&self) -> Option<i32> {
        self.pid.map(Pid::as_raw)
    }

    fn terminate(&mut self) {
        self.signal_group(Signal::SIGTERM);
    }

    fn kill(&mut self) {
        self.signal_group(Signal::SIGKILL);
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
