// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operator hook scripts and init-daemon notifications.
//!
//! Hooks run at fixed lifecycle points with a constrained, explicitly built
//! environment. The exit status gates the transition: 0 proceeds, anything
//! else aborts. Hooks block the supervisor while they run. When the daemon
//! is unprivileged, execution is skipped entirely and the transition
//! proceeds.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::{debug, warn};

/// The four gated lifecycle points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    DisplaySetup,
    GreeterSetup,
    SessionSetup,
    SessionCleanup,
}

impl HookKind {
    /// Seat property naming the script for this hook.
    pub fn property(&self) -> &'static str {
        match self {
            Self::DisplaySetup => "display-setup-script",
            Self::GreeterSetup => "greeter-setup-script",
            Self::SessionSetup => "session-setup-script",
            Self::SessionCleanup => "session-cleanup-script",
        }
    }
}

/// Display-server details exported into hook environments.
#[derive(Debug, Default, Clone)]
pub struct ServerEnv {
    pub display: Option<String>,
    pub xauthority: Option<String>,
    pub remote_host: Option<String>,
}

/// Run a hook script. Returns whether the guarded transition may proceed.
pub fn run_hook(
    path: &str,
    username: Option<&str>,
    server: &ServerEnv,
    privileged: bool,
) -> bool {
    if !privileged {
        return true;
    }

    if !is_executable_file(Path::new(path)) {
        warn!(path, "could not execute hook script");
        return false;
    }

    let mut command = Command::new(path);
    command.env_clear();
    command.stdin(Stdio::null());
    command.env("SHELL", "/bin/sh");
    command.env("PATH", "/usr/local/bin:/usr/bin:/bin");
    match username {
        Some(username) => {
            command.env("USER", username);
            command.env("USERNAME", username);
            command.env("LOGNAME", username);
            command.env("HOME", home_directory(username));
        }
        None => {
            command.env("HOME", "/");
        }
    }
    if let Some(display) = &server.display {
        command.env("DISPLAY", display);
    }
    if let Some(xauthority) = &server.xauthority {
        command.env("XAUTHORITY", xauthority);
    }
    if let Some(remote_host) = &server.remote_host {
        command.env("REMOTE_HOST", remote_host);
    }

    debug!(path, user = username.unwrap_or(""), "executing hook script");
    match command.status() {
        Ok(status) => {
            debug!(path, code = status.code(), "hook script exited");
            status.success()
        }
        Err(e) => {
            warn!(path, "error executing hook script: {e}");
            false
        }
    }
}

fn is_executable_file(path: &Path) -> bool {
    if !path.is_absolute() {
        return false;
    }
    match std::fs::metadata(path) {
        Ok(metadata) => {
            metadata.is_file() && metadata.permissions().mode() & 0o111 != 0
        }
        Err(_) => false,
    }
}

fn home_directory(username: &str) -> String {
    match nix::unistd::User::from_name(username) {
        Ok(Some(user)) => user.dir.to_string_lossy().into_owned(),
        _ => "/".to_owned(),
    }
}

/// Broadcast a one-shot event to the host init daemon. Fire-and-forget;
/// failure is ignored (the init daemon may not be installed).
pub fn notify_init(signal: &str, privileged: bool) {
    if !privileged || signal.is_empty() {
        return;
    }
    let result = tokio::process::Command::new("/sbin/initctl")
        .args(["-q", "emit", signal, "DISPLAY_MANAGER=doorman"])
        .stdin(Stdio::null())
        .spawn();
    if let Ok(mut child) = result {
        tokio::spawn(async move {
            let _ = child.wait().await;
        });
    }
}

#[cfg(test)]
#[path = "script_tests.rs"]
mod tests;
