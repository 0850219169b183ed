// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Seats.
//!
//! A seat owns the displays on one station and decides whether user intent
//! is satisfied by an existing display or needs a new one. It also owns the
//! guest-account lifecycle and runs the operator hook scripts that gate
//! display transitions.
//!
//! Policy arrives as late-bound string properties; typed accessors parse on
//! demand. Displays report back through [`DisplayUpcall`] values which the
//! seat processes as a worklist, answering gated requests synchronously.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::auth::AuthStack;
use crate::display::{Autologin, Display, DisplayUpcall};
use crate::error::{DaemonError, Result};
use crate::event::{CoreEvent, DisplayId, EventSender};
use crate::script::{self, HookKind, ServerEnv};
use crate::server::{DisplayServerBackend, StaticDisplayServer};
use crate::session::{SessionKind, SessionLauncher};

/// What happened inside the seat, for the display manager and bus adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeatEvent {
    DisplayAdded(DisplayId),
    DisplayRemoved(DisplayId),
    /// All displays are gone and the seat was stopping. Emitted at most once.
    Stopped,
}

/// Guest-account shell helpers; an external collaborator of the daemon.
pub trait GuestAccount: Send + Sync {
    fn is_installed(&self) -> bool;
    /// Allocate a one-shot guest account and return its username.
    fn setup(&self) -> Option<String>;
    /// Tear an allocated account down once its session has stopped.
    fn cleanup(&self, username: &str);
}

/// Default guest implementation: no guest support on this host.
pub struct DisabledGuestAccount;

impl GuestAccount for DisabledGuestAccount {
    fn is_installed(&self) -> bool {
        false
    }

    fn setup(&self) -> Option<String> {
        None
    }

    fn cleanup(&self, _username: &str) {}
}

/// Fallbacks for per-seat properties left unset.
#[derive(Debug, Clone)]
pub struct SeatDefaults {
    pub greeter_session: String,
    pub user_session: String,
    pub greeter_user: String,
}

/// Shared collaborators handed to every seat.
#[derive(Clone)]
pub struct SeatDeps {
    pub events: EventSender,
    pub auth_stack: Arc<dyn AuthStack>,
    pub launcher: Arc<dyn SessionLauncher>,
    pub guest: Arc<dyn GuestAccount>,
    pub privileged: bool,
    /// Daemon-wide display id allocator.
    pub display_ids: Arc<AtomicU32>,
    pub defaults: SeatDefaults,
}

pub struct Seat {
    name: String,
    kind: String,
    properties: IndexMap<String, String>,
    can_switch: bool,
    guest_username: Option<String>,
    displays: Vec<Display>,
    active: Option<DisplayId>,
    stopping: bool,
    stopped: bool,
    deps: SeatDeps,
}

impl Seat {
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        properties: IndexMap<String, String>,
        deps: SeatDeps,
    ) -> Result<Self> {
        let name = name.into();
        let kind = kind.into();
        // Reject unusable configuration up front; a bad seat must not be
        // added at all.
        validate_seat_kind(&kind)?;
        if let Some(value) = properties.get("autologin-session-timeout") {
            value.parse::<u64>().map_err(|_| {
                DaemonError::config(format!("autologin-session-timeout: bad value {value:?}"))
            })?;
        }
        let can_switch = kind == "local";
        Ok(Self {
            name,
            kind,
            properties,
            can_switch,
            guest_username: None,
            displays: Vec::new(),
            active: None,
            stopping: false,
            stopped: false,
            deps,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    // -- Properties ----------------------------------------------------------

    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(name.into(), value.into());
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    pub fn bool_property(&self, name: &str) -> bool {
        self.property(name) == Some("true")
    }

    pub fn int_property(&self, name: &str) -> i64 {
        self.property(name).and_then(|v| v.parse().ok()).unwrap_or(0)
    }

    pub fn can_switch(&self) -> bool {
        self.can_switch
    }

    /// Guest logins need both the seat policy and the host helpers.
    pub fn allow_guest(&self) -> bool {
        self.bool_property("allow-guest") && self.deps.guest.is_installed()
    }

    pub fn guest_username(&self) -> Option<&str> {
        self.guest_username.as_deref()
    }

    pub fn displays(&self) -> &[Display] {
        &self.displays
    }

    pub fn active(&self) -> Option<DisplayId> {
        self.active
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn owns(&self, id: DisplayId) -> bool {
        self.displays.iter().any(|d| d.id() == id)
    }

    fn display_mut(&mut self, id: DisplayId) -> Option<&mut Display> {
        self.displays.iter_mut().find(|d| d.id() == id)
    }

    fn display(&self, id: DisplayId) -> Option<&Display> {
        self.displays.iter().find(|d| d.id() == id)
    }

    // -- Lifecycle -----------------------------------------------------------

    /// Bring the seat up: automatic login if configured, a greeter otherwise.
    pub fn start(&mut self) -> (bool, Vec<SeatEvent>) {
        debug!(seat = %self.name, "starting seat");
        let autologin_user = self.property("autologin-user").filter(|u| !u.is_empty());
        match autologin_user.map(str::to_owned) {
            Some(username) => self.switch_or_start(Some(&username), false, None, true),
            None if self.bool_property("autologin-guest") => {
                self.switch_or_start(None, true, None, true)
            }
            None => self.switch_or_start(None, false, None, false),
        }
    }

    /// Stop every display; `Stopped` follows once the last one is gone.
    pub fn stop(&mut self) -> Vec<SeatEvent> {
        if self.stopping {
            return vec![];
        }
        debug!(seat = %self.name, "stopping seat");
        self.stopping = true;
        let mut out = self.check_stopped();
        if self.stopped {
            return out;
        }
        let ids: Vec<DisplayId> = self.displays.iter().map(Display::id).collect();
        for id in ids {
            let upcalls = self.with_display(id, Display::stop);
            out.extend(self.process_upcalls(id, upcalls));
        }
        out
    }

    // -- Switching -----------------------------------------------------------

    pub fn switch_to_greeter(&mut self) -> (bool, Vec<SeatEvent>) {
        if !self.can_switch {
            return (false, vec![]);
        }
        debug!(seat = %self.name, "switching to greeter");
        self.switch_or_start(None, false, None, false)
    }

    pub fn switch_to_user(
        &mut self,
        username: &str,
        session_name: Option<&str>,
    ) -> (bool, Vec<SeatEvent>) {
        if !self.can_switch {
            return (false, vec![]);
        }
        debug!(seat = %self.name, username, "switching to user");
        self.switch_or_start(Some(username), false, session_name, false)
    }

    pub fn switch_to_guest(&mut self, session_name: Option<&str>) -> (bool, Vec<SeatEvent>) {
        if !self.can_switch || !self.allow_guest() {
            return (false, vec![]);
        }
        match &self.guest_username {
            Some(username) => {
                debug!(seat = %self.name, %username, "switching to existing guest account")
            }
            None => debug!(seat = %self.name, "switching to new guest account"),
        }
        let guest = self.guest_username.clone();
        self.switch_or_start(guest.as_deref(), true, session_name, true)
    }

    /// Reuse a display already serving `username` (`None` matches a display
    /// still showing a greeter), or allocate and start a new one.
    fn switch_or_start(
        &mut self,
        username: Option<&str>,
        is_guest: bool,
        session_name: Option<&str>,
        autologin: bool,
    ) -> (bool, Vec<SeatEvent>) {
        // A guest without an allocated account can never match an existing
        // display; a bare `None` would wrongly match a greeter.
        let match_existing = !(is_guest && username.is_none());
        let (found, mut out) = if match_existing {
            self.activate_existing(username)
        } else {
            (false, vec![])
        };
        if found {
            return (true, out);
        }

        match username {
            Some(username) => debug!(seat = %self.name, username, "starting new display"),
            None if is_guest => debug!(seat = %self.name, "starting new display for guest"),
            None => debug!(seat = %self.name, "starting new display for greeter"),
        }

        // The display-setup hook gates the whole slot, before the display
        // server comes up.
        if !self.run_hook(HookKind::DisplaySetup, None, &ServerEnv::default()) {
            warn!(seat = %self.name, "display setup hook failed");
            return (false, out);
        }
        script::notify_init("login-session-start", self.deps.privileged);

        let server = match build_display_server(&self.kind, &self.properties) {
            Ok(server) => server,
            Err(e) => {
                warn!(seat = %self.name, "cannot build display server: {e}");
                return (false, out);
            }
        };

        let id = DisplayId(self.deps.display_ids.fetch_add(1, Ordering::Relaxed));
        let mut display = Display::new(
            id,
            server,
            self.deps.events.clone(),
            Arc::clone(&self.deps.auth_stack),
            Arc::clone(&self.deps.launcher),
            self.deps.privileged,
        );
        display.set_greeter_session(
            self.property("greeter-session").unwrap_or(&self.deps.defaults.greeter_session),
        );
        display.set_greeter_user(
            self.property("greeter-user").unwrap_or(&self.deps.defaults.greeter_user),
        );
        display.set_session_wrapper(self.property("session-wrapper").map(str::to_owned));
        display.set_hide_users_hint(self.bool_property("greeter-hide-users"));
        display.set_show_manual_login_hint(self.bool_property("greeter-show-manual-login"));
        display.set_show_remote_login_hint(self.bool_property("greeter-show-remote-login"));
        let greeter_allow_guest =
            self.property("greeter-allow-guest").map(|v| v == "true").unwrap_or(true);
        display.set_allow_guest(self.allow_guest() && greeter_allow_guest);
        if autologin {
            display.set_autologin(Some(Autologin {
                username: username.map(str::to_owned),
                is_guest,
                timeout_seconds: self.int_property("autologin-session-timeout") as u64,
            }));
        }
        // Any greeter this display brings up (timed autologin, or fallback
        // after a failed one) preselects the intended user.
        display.set_select_user_hint(username.map(str::to_owned), is_guest);
        let session = session_name
            .or_else(|| self.property("user-session"))
            .unwrap_or(&self.deps.defaults.user_session)
            .to_owned();
        display.set_user_session(session);

        self.displays.push(display);
        out.push(SeatEvent::DisplayAdded(id));

        // Show the new display if nothing else is on screen yet.
        if self.active.is_none() {
            out.extend(self.set_active_display(id));
        }

        match self.with_display_result(id, Display::start) {
            Ok(()) => (true, out),
            Err(e) => {
                warn!(seat = %self.name, %id, "failed to start display: {e}");
                out.extend(self.remove_display(id));
                (false, out)
            }
        }
    }

    fn activate_existing(&mut self, username: Option<&str>) -> (bool, Vec<SeatEvent>) {
        let found = self
            .displays
            .iter()
            .find(|d| d.username() == username)
            .map(Display::id);
        match found {
            Some(id) => {
                match username {
                    Some(username) => {
                        debug!(seat = %self.name, username, "switching to existing session")
                    }
                    None => debug!(seat = %self.name, "switching to existing greeter"),
                }
                let events = self.set_active_display(id);
                (true, events)
            }
            None => (false, vec![]),
        }
    }

    fn set_active_display(&mut self, id: DisplayId) -> Vec<SeatEvent> {
        if self.active == Some(id) {
            return vec![];
        }
        let mut out = Vec::new();
        if let Some(old) = self.active {
            // A greeter nobody is looking at serves no purpose.
            let old_is_greeter = self.display(old).is_some_and(|d| d.username().is_none());
            if old_is_greeter {
                debug!(seat = %self.name, display = %old, "stopping greeter display being switched from");
                let upcalls = self.with_display(old, Display::stop);
                out.extend(self.process_upcalls(old, upcalls));
            }
        }
        self.active = Some(id);
        if let Some(display) = self.display_mut(id) {
            display.unlock();
        }
        out
    }

    // -- Event routing -------------------------------------------------------

    /// Route one supervisor event to the owning display and process the
    /// upcalls it produces.
    pub fn handle_display_event(&mut self, event: CoreEvent) -> Vec<SeatEvent> {
        let id = event.display();
        match event {
            CoreEvent::ServerReady { .. } => {
                let upcalls = self.with_display(id, Display::on_server_ready);
                self.process_upcalls(id, upcalls)
            }
            CoreEvent::ServerStopped { .. } => {
                let upcalls = self.with_display(id, Display::on_server_stopped);
                self.process_upcalls(id, upcalls)
            }
            CoreEvent::GreeterRequest { request, .. } => {
                let upcalls = self.with_display(id, |d| d.on_greeter_request(request));
                self.process_upcalls(id, upcalls)
            }
            CoreEvent::GreeterHangup { .. } => {
                let upcalls = self.with_display(id, Display::on_greeter_hangup);
                self.process_upcalls(id, upcalls)
            }
            CoreEvent::GreeterProtocolError { detail, .. } => {
                let upcalls = self.with_display(id, |d| d.on_greeter_protocol_error(&detail));
                self.process_upcalls(id, upcalls)
            }
            CoreEvent::Auth { auth, event, .. } => {
                let upcalls = self.with_display(id, |d| d.on_auth_event(auth, event));
                self.process_upcalls(id, upcalls)
            }
            CoreEvent::AutologinTimeout { .. } => {
                let upcalls = self.with_display(id, Display::on_autologin_timeout);
                self.process_upcalls(id, upcalls)
            }
            CoreEvent::SessionStopped { kind, .. } => self.on_session_stopped(id, kind),
        }
    }

    fn on_session_stopped(&mut self, id: DisplayId, kind: SessionKind) -> Vec<SeatEvent> {
        // Capture what the cleanup hook needs before the display winds down.
        let (username, server_env) = match (kind, self.display(id)) {
            (SessionKind::User, Some(display)) => {
                (display.username().map(str::to_owned), display.server_env())
            }
            (_, Some(display)) => (None, display.server_env()),
            (_, None) => (None, ServerEnv::default()),
        };

        let upcalls = self.with_display(id, |d| d.on_session_stopped(kind));
        let mut out = self.process_upcalls(id, upcalls);

        if let Some(username) = username {
            self.run_cleanup_hook(&username, &server_env);
            if self.guest_username.as_deref() == Some(username.as_str()) {
                debug!(seat = %self.name, %username, "tearing down guest account");
                self.deps.guest.cleanup(&username);
                self.guest_username = None;
            }
        }
        out.extend(self.check_stopped());
        out
    }

    fn process_upcalls(&mut self, id: DisplayId, initial: Vec<DisplayUpcall>) -> Vec<SeatEvent> {
        let mut out = Vec::new();
        let mut queue: VecDeque<DisplayUpcall> = initial.into();
        while let Some(upcall) = queue.pop_front() {
            match upcall {
                DisplayUpcall::Ready => {
                    debug!(seat = %self.name, display = %id, "display ready, switching to it");
                    out.extend(self.set_active_display(id));
                }
                DisplayUpcall::SwitchToUser { username } => {
                    let (handled, events) = self.activate_existing(Some(&username));
                    out.extend(events);
                    queue.extend(self.with_display(id, |d| d.switch_answer(handled)));
                }
                DisplayUpcall::SwitchToGuest => {
                    let guest = self.guest_username.clone();
                    let (handled, events) = match guest.as_deref() {
                        Some(username) => self.activate_existing(Some(username)),
                        None => (false, vec![]),
                    };
                    out.extend(events);
                    queue.extend(self.with_display(id, |d| d.switch_answer(handled)));
                }
                DisplayUpcall::NeedGuestUsername => {
                    let username =
                        if self.allow_guest() { self.acquire_guest_username() } else { None };
                    queue.extend(self.with_display(id, |d| d.provide_guest_username(username)));
                }
                DisplayUpcall::StartGreeterGated => {
                    let (greeter_user, server_env) = match self.display(id) {
                        Some(display) => {
                            (display.greeter_user().to_owned(), display.server_env())
                        }
                        None => continue,
                    };
                    let allowed =
                        self.run_hook(HookKind::GreeterSetup, Some(&greeter_user), &server_env);
                    queue.extend(self.with_display(id, |d| d.complete_greeter_start(allowed)));
                }
                DisplayUpcall::StartSessionGated { username } => {
                    let server_env = match self.display(id) {
                        Some(display) => display.server_env(),
                        None => continue,
                    };
                    let allowed =
                        self.run_hook(HookKind::SessionSetup, Some(&username), &server_env);
                    queue.extend(self.with_display(id, |d| d.complete_session_start(allowed)));
                }
                DisplayUpcall::SessionStarted { username } => {
                    debug!(seat = %self.name, display = %id, %username, "session started");
                    script::notify_init("desktop-session-start", self.deps.privileged);
                }
                DisplayUpcall::Stopped => {
                    out.extend(self.remove_display(id));
                }
            }
        }
        out
    }

    fn with_display<F>(&mut self, id: DisplayId, f: F) -> Vec<DisplayUpcall>
    where
        F: FnOnce(&mut Display) -> Vec<DisplayUpcall>,
    {
        match self.display_mut(id) {
            Some(display) => f(display),
            None => vec![],
        }
    }

    fn with_display_result<F>(&mut self, id: DisplayId, f: F) -> Result<()>
    where
        F: FnOnce(&mut Display) -> Result<()>,
    {
        match self.display_mut(id) {
            Some(display) => f(display),
            None => Err(DaemonError::state(format!("no such display: {id}"))),
        }
    }

    fn remove_display(&mut self, id: DisplayId) -> Vec<SeatEvent> {
        let mut out = Vec::new();
        if let Some(index) = self.displays.iter().position(|d| d.id() == id) {
            self.displays.remove(index);
            if self.active == Some(id) {
                self.active = None;
            }
            debug!(seat = %self.name, display = %id, "display removed");
            out.push(SeatEvent::DisplayRemoved(id));
            out.extend(self.check_stopped());
        }
        out
    }

    fn check_stopped(&mut self) -> Vec<SeatEvent> {
        if self.stopping && !self.stopped && self.displays.is_empty() {
            self.stopped = true;
            debug!(seat = %self.name, "seat stopped");
            vec![SeatEvent::Stopped]
        } else {
            vec![]
        }
    }

    // -- Guest account -------------------------------------------------------

    fn acquire_guest_username(&mut self) -> Option<String> {
        if let Some(username) = &self.guest_username {
            return Some(username.clone());
        }
        let username = self.deps.guest.setup()?;
        debug!(seat = %self.name, %username, "guest account allocated");
        self.guest_username = Some(username.clone());
        Some(username)
    }

    // -- Hooks ---------------------------------------------------------------

    fn run_hook(&self, kind: HookKind, username: Option<&str>, server: &ServerEnv) -> bool {
        match self.property(kind.property()) {
            Some(path) => script::run_hook(path, username, server, self.deps.privileged),
            None => true,
        }
    }

    fn run_cleanup_hook(&self, username: &str, server: &ServerEnv) {
        // Cleanup gates nothing; it runs for its side effects.
        let _ = self.run_hook(HookKind::SessionCleanup, Some(username), server);
    }
}

fn validate_seat_kind(kind: &str) -> Result<()> {
    match kind {
        "local" | "static" => Ok(()),
        other => Err(DaemonError::config(format!("unknown seat type: {other}"))),
    }
}

fn build_display_server(
    kind: &str,
    properties: &IndexMap<String, String>,
) -> Result<Box<dyn DisplayServerBackend>> {
    match kind {
        "local" => {
            let address =
                properties.get("display-address").cloned().unwrap_or_else(|| ":0".to_owned());
            Ok(Box::new(StaticDisplayServer::new(Some(address))))
        }
        "static" => Ok(Box::new(StaticDisplayServer::new(
            properties.get("display-address").cloned(),
        ))),
        other => Err(DaemonError::config(format!("unknown seat type: {other}"))),
    }
}

#[cfg(test)]
#[path = "seat_tests.rs"]
mod tests;
