// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Display-server backends.
//!
//! The display FSM is generic over a capability trait: a backend knows how to
//! start and stop its display server and reports readiness and termination
//! through the supervisor event channel. Seat types select the builder; the
//! in-tree [`StaticDisplayServer`] models servers that are externally managed
//! or already running (remote, VNC front-ends, the test harness).

use std::path::PathBuf;

use tracing::debug;

use crate::event::{DisplayId, EventSender};
use crate::error::Result;

/// Capability surface of one display server.
pub trait DisplayServerBackend: Send {
    /// Begin starting the server. Readiness is reported asynchronously with
    /// a `ServerReady` event, termination with `ServerStopped`.
    fn start(&mut self, display: DisplayId, events: &EventSender) -> Result<()>;

    fn stop(&mut self, display: DisplayId, events: &EventSender);

    fn is_ready(&self) -> bool;

    /// Virtual terminal the server runs on, if any.
    fn vt(&self) -> Option<i32> {
        None
    }

    /// Display address for session and hook-script environments.
    fn address(&self) -> Option<String> {
        None
    }

    /// Remote host name, for remote display protocols.
    fn hostname(&self) -> Option<String> {
        None
    }

    /// Path of the authority file granting access to the server.
    fn authority_path(&self) -> Option<PathBuf> {
        None
    }
}

/// A display server that is already running (or externally supervised):
/// reports ready as soon as it is started.
#[derive(Debug, Default)]
pub struct StaticDisplayServer {
    address: Option<String>,
    ready: bool,
}

impl StaticDisplayServer {
    pub fn new(address: Option<String>) -> Self {
        Self { address, ready: false }
    }
}

impl DisplayServerBackend for StaticDisplayServer {
    fn start(&mut self, display: DisplayId, events: &EventSender) -> Result<()> {
        let display_id = display;
        debug!(display = %display_id, address = self.address.as_deref().unwrap_or(""), "display server ready");
        self.ready = true;
        events.server_ready(display);
        Ok(())
    }

    fn stop(&mut self, display: DisplayId, events: &EventSender) {
        if self.ready {
            self.ready = false;
            events.server_stopped(display);
        }
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn address(&self) -> Option<String> {
        self.address.clone()
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
