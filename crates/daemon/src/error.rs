// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;
use std::io;

/// Classification of daemon errors, used for propagation policy decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad property or flag value.
    Config,
    /// Pipe or spawn failure.
    Io,
    /// Malformed frame from the greeter.
    Protocol,
    /// Result code forwarded from the host authentication library.
    Auth,
    /// Operation invalid for the component's current state.
    State,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "CONFIG",
            Self::Io => "IO",
            Self::Protocol => "PROTOCOL",
            Self::Auth => "AUTH",
            Self::State => "STATE",
        }
    }
}

/// Daemon error with one of the five kinds.
///
/// Propagation policy: protocol errors terminate the greeter channel and stop
/// the display; I/O errors on a critical spawn fail the display start; auth
/// codes are reported to the greeter verbatim; state errors abort the
/// operation without mutating state; config errors are fatal at startup and
/// reject the seat at add-seat time.
#[derive(Debug)]
pub enum DaemonError {
    Config(String),
    Io { context: String, source: io::Error },
    Protocol(String),
    Auth { code: i32 },
    State(String),
}

impl DaemonError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io { context: context.into(), source }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub fn auth(code: i32) -> Self {
        Self::Auth { code }
    }

    pub fn state(message: impl Into<String>) -> Self {
        Self::State(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Io { .. } => ErrorKind::Io,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Auth { .. } => ErrorKind::Auth,
            Self::State(_) => ErrorKind::State,
        }
    }
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(message) => write!(f, "invalid configuration: {message}"),
            Self::Io { context, source } => write!(f, "{context}: {source}"),
            Self::Protocol(message) => write!(f, "protocol violation: {message}"),
            Self::Auth { code } => write!(f, "authentication error {code}"),
            Self::State(message) => write!(f, "invalid state: {message}"),
        }
    }
}

impl std::error::Error for DaemonError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for DaemonError {
    fn from(source: io::Error) -> Self {
        Self::Io { context: "i/o error".to_owned(), source }
    }
}

pub type Result<T> = std::result::Result<T, DaemonError>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
