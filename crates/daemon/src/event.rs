// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervisor event types.
//!
//! Every asynchronous source — greeter pipe readers, authentication worker
//! threads, display-server backends, child waiters, autologin timers — feeds
//! a single unbounded channel. The supervisor loop owns all component state
//! and processes these events strictly FIFO, so within one source the order
//! of posts is preserved (an authentication result may not overtake the
//! prompt messages that preceded it).

use std::fmt;

use tokio::sync::mpsc;

use crate::protocol::GreeterRequest;
use crate::session::SessionKind;

/// Identifier of one display slot, unique for the lifetime of the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisplayId(pub u32);

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "display-{}", self.0)
    }
}

/// Identifier of one authentication conversation. Monotonic; never reused,
/// so events from a cancelled conversation can be told apart from the one
/// that replaced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AuthId(pub u64);

impl fmt::Display for AuthId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "auth-{}", self.0)
    }
}

/// Events posted by an authentication worker thread.
#[derive(Debug)]
pub enum AuthEvent {
    /// The host library invoked the conversation callback; the messages are
    /// stored on the session, the worker is blocked on the response queue.
    Messages { count: usize },
    /// The host library returned; the worker is about to exit.
    Result { code: i32 },
}

/// All events the supervisor loop processes.
#[derive(Debug)]
pub enum CoreEvent {
    /// A decoded frame arrived from a greeter.
    GreeterRequest { display: DisplayId, request: GreeterRequest },
    /// The greeter's write end of the pipe was closed.
    GreeterHangup { display: DisplayId },
    /// The greeter sent a malformed frame; the channel has been abandoned.
    GreeterProtocolError { display: DisplayId, detail: String },
    /// Authentication worker notification.
    Auth { display: DisplayId, auth: AuthId, event: AuthEvent },
    /// The display server reported readiness.
    ServerReady { display: DisplayId },
    /// The display server exited or was stopped.
    ServerStopped { display: DisplayId },
    /// A greeter or user session process exited.
    SessionStopped { display: DisplayId, kind: SessionKind, exit_code: Option<i32> },
    /// The autologin delay elapsed without a login.
    AutologinTimeout { display: DisplayId },
}

impl CoreEvent {
    /// The display this event should be routed to.
    pub fn display(&self) -> DisplayId {
        match self {
            Self::GreeterRequest { display, .. }
            | Self::GreeterHangup { display }
            | Self::GreeterProtocolError { display, .. }
            | Self::Auth { display, .. }
            | Self::ServerReady { display }
            | Self::ServerStopped { display }
            | Self::SessionStopped { display, .. }
            | Self::AutologinTimeout { display } => *display,
        }
    }
}

/// Cloneable handle for posting events to the supervisor.
///
/// Safe to use from worker threads and spawned tasks; posts to a closed
/// channel (daemon shutting down) are silently dropped.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<CoreEvent>,
}

impl EventSender {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CoreEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, event: CoreEvent) {
        let _ = self.tx.send(event);
    }

    pub fn auth_messages(&self, display: DisplayId, auth: AuthId, count: usize) {
        self.send(CoreEvent::Auth { display, auth, event: AuthEvent::Messages { count } });
    }

    pub fn auth_result(&self, display: DisplayId, auth: AuthId, code: i32) {
        self.send(CoreEvent::Auth { display, auth, event: AuthEvent::Result { code } });
    }

    pub fn server_ready(&self, display: DisplayId) {
        self.send(CoreEvent::ServerReady { display });
    }

    pub fn server_stopped(&self, display: DisplayId) {
        self.send(CoreEvent::ServerStopped { display });
    }

    pub fn session_stopped(&self, display: DisplayId, kind: SessionKind, exit_code: Option<i32>) {
        self.send(CoreEvent::SessionStopped { display, kind, exit_code });
    }
}

impl fmt::Debug for EventSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSender").finish()
    }
}
