// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-slot display state machine.
//!
//! A display orchestrates one login slot: display-server readiness, greeter
//! start, authentication, and user-session start and stop. States form an
//! acyclic chain (with one cancel edge back from authenticated to the bare
//! greeter):
//!
//! ```text
//! Stopped → DisplayServerReady → GreeterStarted ⇄ GreeterAuthed
//!                                            → UserSessionStarted → Stopping → Stopped
//! ```
//!
//! Decisions the display cannot make alone — user switching, guest account
//! allocation, hook-script gates — are returned as [`DisplayUpcall`] values
//! and answered synchronously by the owning seat.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::auth::{code, AuthItem, AuthSession, AuthStack};
use crate::error::{DaemonError, Result};
use crate::event::{AuthEvent, AuthId, CoreEvent, DisplayId, EventSender};
use crate::greeter::{AuthOutcome, Greeter, GreeterOutcome};
use crate::protocol::GreeterRequest;
use crate::script::ServerEnv;
use crate::server::DisplayServerBackend;
use crate::session::{Session, SessionKind, SessionLauncher, SessionSpec};

/// Authentication service for greeter-mediated logins.
pub const GREETER_SERVICE: &str = "doorman";

/// Authentication service for automatic logins; must not prompt.
pub const AUTOLOGIN_SERVICE: &str = "doorman-autologin";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayState {
    Stopped,
    DisplayServerReady,
    GreeterStarted,
    GreeterAuthed,
    UserSessionStarted,
    Stopping,
}

/// Requests a display makes of its seat. Gated requests are answered by
/// calling back into the display once the seat has run the hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayUpcall {
    /// Make this display the active one.
    Ready,
    /// A user with a live session may already have a display; answer with
    /// [`Display::switch_answer`].
    SwitchToUser { username: String },
    /// Same, for the guest account.
    SwitchToGuest,
    /// Allocate (or fetch) the guest account; answer with
    /// [`Display::provide_guest_username`].
    NeedGuestUsername,
    /// Run the greeter-setup hook; answer with
    /// [`Display::complete_greeter_start`].
    StartGreeterGated,
    /// Run the session-setup hook; answer with
    /// [`Display::complete_session_start`].
    StartSessionGated { username: String },
    /// The user session is up.
    SessionStarted { username: String },
    /// The display reached its terminal state; remove it.
    Stopped,
}

/// Hints forwarded to the greeter at CONNECTED.
#[derive(Debug, Default, Clone)]
pub struct DisplayHints {
    pub select_user: Option<String>,
    pub select_guest: bool,
    pub hide_users: bool,
    pub show_manual: bool,
    pub show_remote: bool,
    pub lock: bool,
    pub allow_guest: bool,
}

/// Automatic login policy for this display.
#[derive(Debug, Clone)]
pub struct Autologin {
    pub username: Option<String>,
    pub is_guest: bool,
    pub timeout_seconds: u64,
}

struct PendingSession {
    username: Option<String>,
    is_guest: bool,
    session_name: Option<String>,
}

pub struct Display {
    id: DisplayId,
    events: EventSender,
    auth_stack: Arc<dyn AuthStack>,
    launcher: Arc<dyn SessionLauncher>,
    server: Box<dyn DisplayServerBackend>,
    state: DisplayState,
    started: bool,
    stopped: bool,
    greeter: Option<Greeter>,
    greeter_process: Option<Session>,
    session: Option<Session>,
    session_auth: Option<AuthSession>,
    user_auth: Option<AuthSession>,
    pending_session: Option<PendingSession>,
    greeter_session_name: String,
    greeter_user: String,
    session_wrapper: Option<String>,
    user_session_name: String,
    hints: DisplayHints,
    autologin: Option<Autologin>,
    autologin_timer: Option<JoinHandle<()>>,
    privileged: bool,
}

impl Display {
    pub fn new(
        id: DisplayId,
        server: Box<dyn DisplayServerBackend>,
        events: EventSender,
        auth_stack: Arc<dyn AuthStack>,
        launcher: Arc<dyn SessionLauncher>,
        privileged: bool,
    ) -> Self {
        Self {
            id,
            events,
            auth_stack,
            launcher,
            server,
            state: DisplayState::Stopped,
            started: false,
            stopped: false,
            greeter: None,
            greeter_process: None,
            session: None,
            session_auth: None,
            user_auth: None,
            pending_session: None,
            greeter_session_name: String::new(),
            greeter_user: "doorman".to_owned(),
            session_wrapper: None,
            user_session_name: String::new(),
            hints: DisplayHints::default(),
            autologin: None,
            autologin_timer: None,
            privileged,
        }
    }

    pub fn id(&self) -> DisplayId {
        self.id
    }

    pub fn state(&self) -> DisplayState {
        self.state
    }

    pub fn set_greeter_session(&mut self, command: impl Into<String>) {
        self.greeter_session_name = command.into();
    }

    pub fn set_greeter_user(&mut self, username: impl Into<String>) {
        self.greeter_user = username.into();
    }

    pub fn set_session_wrapper(&mut self, wrapper: Option<String>) {
        self.session_wrapper = wrapper;
    }

    pub fn set_user_session(&mut self, command: impl Into<String>) {
        self.user_session_name = command.into();
    }

    pub fn set_allow_guest(&mut self, allow_guest: bool) {
        self.hints.allow_guest = allow_guest;
    }

    pub fn set_hide_users_hint(&mut self, hide_users: bool) {
        self.hints.hide_users = hide_users;
    }

    pub fn set_show_manual_login_hint(&mut self, show_manual: bool) {
        self.hints.show_manual = show_manual;
    }

    pub fn set_show_remote_login_hint(&mut self, show_remote: bool) {
        self.hints.show_remote = show_remote;
    }

    pub fn set_select_user_hint(&mut self, username: Option<String>, is_guest: bool) {
        self.hints.select_user = username;
        self.hints.select_guest = is_guest;
    }

    pub fn set_autologin(&mut self, autologin: Option<Autologin>) {
        self.autologin = autologin;
    }

    /// Ask the next greeter to come up in lock mode.
    pub fn lock(&mut self) {
        self.hints.lock = true;
    }

    pub fn unlock(&mut self) {
        self.hints.lock = false;
    }

    /// Username of the running user session, if any. Greeter-only displays
    /// have none, which is what the seat's switch policy matches on.
    pub fn username(&self) -> Option<&str> {
        self.session.as_ref().and_then(Session::username)
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn greeter_user(&self) -> &str {
        &self.greeter_user
    }

    pub fn greeter(&self) -> Option<&Greeter> {
        self.greeter.as_ref()
    }

    /// Ready to be shown: a connected greeter or a running session.
    pub fn is_ready(&self) -> bool {
        match self.state {
            DisplayState::UserSessionStarted => true,
            DisplayState::GreeterStarted | DisplayState::GreeterAuthed => {
                self.greeter.as_ref().is_some_and(Greeter::is_connected)
            }
            _ => false,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Display-server details for hook-script environments.
    pub fn server_env(&self) -> ServerEnv {
        ServerEnv {
            display: self.server.address(),
            xauthority: self
                .server
                .authority_path()
                .map(|p| p.to_string_lossy().into_owned()),
            remote_host: self.server.hostname(),
        }
    }

    /// Kick off the display server. Progress continues on `ServerReady`.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(DaemonError::state("display already started"));
        }
        debug!(display = %self.id, "starting display");
        self.started = true;
        self.server.start(self.id, &self.events)
    }

    pub fn on_server_ready(&mut self) -> Vec<DisplayUpcall> {
        if self.stopped || self.state != DisplayState::Stopped || !self.started {
            return vec![];
        }
        debug!(display = %self.id, "display server ready");
        self.state = DisplayState::DisplayServerReady;
        match &self.autologin {
            Some(autologin) if autologin.timeout_seconds == 0 && !self.hints.lock => {
                self.begin_autologin()
            }
            _ => vec![DisplayUpcall::StartGreeterGated],
        }
    }

    pub fn on_server_stopped(&mut self) -> Vec<DisplayUpcall> {
        match self.state {
            DisplayState::Stopping => self.try_finish_stop(),
            DisplayState::Stopped => vec![],
            _ => {
                debug!(display = %self.id, "display server stopped unexpectedly");
                self.stop()
            }
        }
    }

    /// Answer to `StartGreeterGated` once the greeter-setup hook has run.
    pub fn complete_greeter_start(&mut self, allowed: bool) -> Vec<DisplayUpcall> {
        if !allowed {
            warn!(display = %self.id, "greeter setup hook failed, stopping display");
            return self.stop();
        }
        match self.start_greeter() {
            Ok(()) => vec![],
            Err(e) => {
                warn!(display = %self.id, "failed to start greeter: {e}");
                self.stop()
            }
        }
    }

    fn start_greeter(&mut self) -> Result<()> {
        if self.state != DisplayState::DisplayServerReady {
            return Err(DaemonError::state(format!(
                "cannot start greeter in state {:?}",
                self.state
            )));
        }

        let mut greeter = Greeter::new(
            self.id,
            self.events.clone(),
            Arc::clone(&self.auth_stack),
            GREETER_SERVICE,
        );
        greeter.set_allow_guest(self.hints.allow_guest);
        greeter.set_privileged(self.privileged);
        greeter.set_tty(self.server.address());

        greeter.set_hint("default-session", &self.user_session_name);
        if let Some(username) = &self.hints.select_user {
            greeter.set_hint("select-user", username);
        }
        if self.hints.select_guest {
            greeter.set_hint("select-guest", "true");
        }
        if let Some(autologin) = &self.autologin {
            if autologin.timeout_seconds > 0 {
                match &autologin.username {
                    Some(username) => greeter.set_hint("autologin-user", username),
                    None if autologin.is_guest => greeter.set_hint("autologin-guest", "true"),
                    None => {}
                }
                greeter.set_hint("autologin-timeout", autologin.timeout_seconds.to_string());
            }
        }
        if self.hints.hide_users {
            greeter.set_hint("hide-users", "true");
        }
        if self.hints.show_manual {
            greeter.set_hint("show-manual-login", "true");
        }
        if self.hints.show_remote {
            greeter.set_hint("show-remote-login", "true");
        }
        if self.hints.allow_guest {
            greeter.set_hint("has-guest-account", "true");
        }
        if self.hints.lock {
            greeter.set_hint("lock-screen", "true");
        }

        greeter.start()?;
        let pipes = greeter
            .take_child_pipes()
            .ok_or_else(|| DaemonError::state("greeter pipes already taken"))?;

        let greeter_user = self.greeter_user.clone();
        let mut env = self.base_env(Some(&greeter_user));
        env.extend(pipes.env());
        let spec = SessionSpec {
            display: self.id,
            kind: SessionKind::Greeter,
            username: Some(self.greeter_user.clone()),
            command: split_command(&self.greeter_session_name),
            env,
            inherit_fds: pipes.into_fds(),
        };
        let process = self.launcher.launch(spec, &self.events)?;
        self.greeter_process =
            Some(Session::new(SessionKind::Greeter, Some(self.greeter_user.clone()), process));
        self.greeter = Some(greeter);
        self.state = DisplayState::GreeterStarted;
        debug!(display = %self.id, "greeter started");

        if let Some(autologin) = &self.autologin {
            if autologin.timeout_seconds > 0 {
                self.arm_autologin_timer(autologin.timeout_seconds);
            }
        }
        Ok(())
    }

    pub fn on_greeter_request(&mut self, request: GreeterRequest) -> Vec<DisplayUpcall> {
        let Some(greeter) = self.greeter.as_mut() else {
            return vec![];
        };
        match greeter.on_request(request) {
            GreeterOutcome::None => vec![],
            GreeterOutcome::Connected => vec![DisplayUpcall::Ready],
            GreeterOutcome::SessionRequested { session } => self.handle_session_request(session),
        }
    }

    fn handle_session_request(&mut self, session_name: Option<String>) -> Vec<DisplayUpcall> {
        let (is_guest, username) = match &self.greeter {
            Some(greeter) => (
                greeter.guest_authenticated(),
                greeter.auth().and_then(AuthSession::username),
            ),
            None => return vec![],
        };

        if is_guest {
            self.pending_session =
                Some(PendingSession { username: None, is_guest: true, session_name });
            return vec![DisplayUpcall::SwitchToGuest];
        }
        match username {
            Some(username) => {
                self.pending_session = Some(PendingSession {
                    username: Some(username.clone()),
                    is_guest: false,
                    session_name,
                });
                vec![DisplayUpcall::SwitchToUser { username }]
            }
            None => {
                if let Some(greeter) = &self.greeter {
                    greeter.send_session_rejected();
                }
                vec![]
            }
        }
    }

    /// Answer to `SwitchToUser`/`SwitchToGuest`: whether an existing display
    /// satisfied the request.
    pub fn switch_answer(&mut self, handled: bool) -> Vec<DisplayUpcall> {
        if handled {
            // Another display now shows this user; the seat's active-display
            // policy retires this greeter.
            self.pending_session = None;
            return vec![];
        }
        self.continue_session_start()
    }

    fn continue_session_start(&mut self) -> Vec<DisplayUpcall> {
        match &self.pending_session {
            Some(pending) => match &pending.username {
                Some(username) => {
                    vec![DisplayUpcall::StartSessionGated { username: username.clone() }]
                }
                None if pending.is_guest => vec![DisplayUpcall::NeedGuestUsername],
                None => vec![],
            },
            None => vec![],
        }
    }

    /// Answer to `NeedGuestUsername`.
    pub fn provide_guest_username(&mut self, username: Option<String>) -> Vec<DisplayUpcall> {
        match username {
            Some(username) => match self.pending_session.as_mut() {
                Some(pending) => {
                    pending.username = Some(username.clone());
                    vec![DisplayUpcall::StartSessionGated { username }]
                }
                None => vec![],
            },
            None => {
                warn!(display = %self.id, "failed to set up guest account");
                self.pending_session = None;
                match &self.greeter {
                    Some(greeter) => {
                        greeter.send_session_rejected();
                        vec![]
                    }
                    None => self.stop(),
                }
            }
        }
    }

    /// Answer to `StartSessionGated` once the session-setup hook has run.
    pub fn complete_session_start(&mut self, allowed: bool) -> Vec<DisplayUpcall> {
        if !allowed {
            warn!(display = %self.id, "session setup hook failed, stopping display");
            return self.stop();
        }
        self.start_user_session()
    }

    fn start_user_session(&mut self) -> Vec<DisplayUpcall> {
        let Some(pending) = self.pending_session.take() else {
            return vec![];
        };
        let Some(username) = pending.username else {
            return vec![];
        };

        let mut auth = match self.user_auth.take() {
            Some(auth) => Some(auth),
            None => self.greeter.as_mut().and_then(Greeter::take_auth),
        };
        if let Some(auth) = auth.as_mut() {
            if let Err(e) = auth.open_session().and_then(|()| auth.setup_credentials()) {
                warn!(display = %self.id, "failed to open session for {username}: {e}");
                return self.stop();
            }
        }

        let language = self.greeter.as_ref().and_then(|g| g.language().map(str::to_owned));
        let mut env = self.base_env(Some(&username));
        if let Some(language) = language {
            env.push(("LANG".to_owned(), language));
        }
        if let Some(auth) = &auth {
            env.extend(auth.envlist());
        }

        let command = self.session_command(pending.session_name.as_deref());
        let spec = SessionSpec {
            display: self.id,
            kind: SessionKind::User,
            username: Some(username.clone()),
            command,
            env,
            inherit_fds: vec![],
        };
        let process = match self.launcher.launch(spec, &self.events) {
            Ok(process) => process,
            Err(e) => {
                warn!(display = %self.id, "failed to start session for {username}: {e}");
                if let Some(mut auth) = auth {
                    auth.close_session();
                }
                return self.stop();
            }
        };

        self.session = Some(Session::new(SessionKind::User, Some(username.clone()), process));
        self.session_auth = auth;
        self.cancel_autologin_timer();

        // Successful handoff: the greeter gets its positive ack and then
        // end-of-stream.
        if let Some(mut greeter) = self.greeter.take() {
            greeter.quit();
        }
        if let Some(greeter_process) = self.greeter_process.as_mut() {
            greeter_process.stop();
        }

        self.state = DisplayState::UserSessionStarted;
        debug!(display = %self.id, %username, "user session started");
        vec![DisplayUpcall::SessionStarted { username }, DisplayUpcall::Ready]
    }

    pub fn on_auth_event(&mut self, auth_id: AuthId, event: AuthEvent) -> Vec<DisplayUpcall> {
        if self.user_auth.as_ref().map(AuthSession::id) == Some(auth_id) {
            return self.on_autologin_auth_event(event);
        }
        let Some(greeter) = self.greeter.as_mut() else {
            return vec![];
        };
        match greeter.on_auth_event(auth_id, event) {
            AuthOutcome::Finished { code } => {
                if code == code::SUCCESS {
                    if self.state == DisplayState::GreeterStarted {
                        self.state = DisplayState::GreeterAuthed;
                    }
                } else if self.state == DisplayState::GreeterAuthed {
                    // A failed or cancelled retry drops authorization.
                    self.state = DisplayState::GreeterStarted;
                }
                vec![]
            }
            AuthOutcome::None => vec![],
        }
    }

    fn on_autologin_auth_event(&mut self, event: AuthEvent) -> Vec<DisplayUpcall> {
        match event {
            // The autologin conversation is non-interactive; prompts cannot
            // be answered and the worker fails them itself.
            AuthEvent::Messages { .. } => vec![],
            AuthEvent::Result { code: result } => {
                if let Some(auth) = self.user_auth.as_mut() {
                    auth.handle_result(result);
                }
                if result == code::SUCCESS {
                    let username = self.user_auth.as_ref().and_then(AuthSession::username);
                    match username {
                        Some(username) => {
                            self.pending_session = Some(PendingSession {
                                username: Some(username.clone()),
                                is_guest: false,
                                session_name: None,
                            });
                            vec![DisplayUpcall::StartSessionGated { username }]
                        }
                        None => {
                            self.user_auth = None;
                            self.fallback_to_greeter()
                        }
                    }
                } else {
                    warn!(
                        display = %self.id,
                        "automatic login failed: {}",
                        code::strerror(result)
                    );
                    self.user_auth = None;
                    self.fallback_to_greeter()
                }
            }
        }
    }

    pub fn on_autologin_timeout(&mut self) -> Vec<DisplayUpcall> {
        self.autologin_timer = None;
        if self.state != DisplayState::GreeterStarted {
            return vec![];
        }
        // Leave the slot alone if the user already engaged the greeter.
        if let Some(greeter) = &self.greeter {
            if greeter.guest_authenticated() || greeter.auth().is_some() {
                return vec![];
            }
        }
        debug!(display = %self.id, "autologin timer expired, logging in");
        self.begin_autologin()
    }

    fn begin_autologin(&mut self) -> Vec<DisplayUpcall> {
        let Some(autologin) = self.autologin.clone() else {
            return vec![];
        };
        if autologin.is_guest {
            self.pending_session =
                Some(PendingSession { username: None, is_guest: true, session_name: None });
            return vec![DisplayUpcall::SwitchToGuest];
        }
        match autologin.username {
            Some(username) => match self.start_autologin_auth(&username) {
                Ok(()) => vec![],
                Err(e) => {
                    warn!(display = %self.id, "failed to start automatic login: {e}");
                    self.fallback_to_greeter()
                }
            },
            None => vec![],
        }
    }

    fn start_autologin_auth(&mut self, username: &str) -> Result<()> {
        debug!(display = %self.id, username, "automatic login");
        let mut auth = AuthSession::new(
            self.auth_stack.as_ref(),
            AUTOLOGIN_SERVICE,
            Some(username),
            self.id,
            self.events.clone(),
        )?;
        auth.set_interactive(false);
        auth.set_privileged(self.privileged);
        if let Some(address) = self.server.address() {
            let _ = auth.set_item(AuthItem::Tty, &address);
        }
        auth.authenticate()?;
        self.user_auth = Some(auth);
        Ok(())
    }

    fn fallback_to_greeter(&mut self) -> Vec<DisplayUpcall> {
        if self.greeter.is_some() {
            return vec![];
        }
        // The greeter comes up with the user whose automatic login failed
        // preselected.
        if let Some(autologin) = self.autologin.clone() {
            self.set_select_user_hint(autologin.username, autologin.is_guest);
        }
        vec![DisplayUpcall::StartGreeterGated]
    }

    pub fn on_greeter_hangup(&mut self) -> Vec<DisplayUpcall> {
        if self.greeter.is_none() {
            return vec![];
        }
        debug!(display = %self.id, "greeter closed the channel");
        self.drop_greeter_and_stop()
    }

    pub fn on_greeter_protocol_error(&mut self, detail: &str) -> Vec<DisplayUpcall> {
        if self.greeter.is_none() {
            return vec![];
        }
        warn!(display = %self.id, detail, "protocol violation, abandoning greeter");
        self.drop_greeter_and_stop()
    }

    /// An abandoned login: without a greeter there is nothing to show, so
    /// the slot comes down (taking a started session with it).
    fn drop_greeter_and_stop(&mut self) -> Vec<DisplayUpcall> {
        if let Some(mut greeter) = self.greeter.take() {
            greeter.stop();
        }
        if let Some(greeter_process) = self.greeter_process.as_mut() {
            greeter_process.stop();
        }
        if let Some(session) = self.session.as_mut() {
            session.stop();
            return vec![];
        }
        self.stop()
    }

    pub fn on_session_stopped(&mut self, kind: SessionKind) -> Vec<DisplayUpcall> {
        match kind {
            SessionKind::Greeter => {
                let expected =
                    self.greeter_process.as_ref().is_some_and(Session::is_stopping);
                self.greeter_process = None;
                if self.state == DisplayState::Stopping {
                    return self.try_finish_stop();
                }
                if expected {
                    return vec![];
                }
                debug!(display = %self.id, "greeter process exited");
                if let Some(mut greeter) = self.greeter.take() {
                    greeter.stop();
                }
                if let Some(session) = self.session.as_mut() {
                    session.stop();
                    return vec![];
                }
                self.stop()
            }
            SessionKind::User => {
                debug!(display = %self.id, "user session stopped");
                self.session = None;
                if let Some(mut auth) = self.session_auth.take() {
                    auth.close_session();
                }
                if self.state == DisplayState::Stopping {
                    self.try_finish_stop()
                } else {
                    self.stop()
                }
            }
        }
    }

    /// Begin stopping. The display reaches `Stopped` (and emits the upcall)
    /// only after its session, if any, has reported stopped.
    pub fn stop(&mut self) -> Vec<DisplayUpcall> {
        if self.stopped || self.state == DisplayState::Stopping {
            return vec![];
        }
        debug!(display = %self.id, "stopping display");
        self.cancel_autologin_timer();
        self.pending_session = None;
        if let Some(auth) = self.user_auth.as_mut() {
            auth.cancel();
        }
        self.user_auth = None;
        if let Some(mut greeter) = self.greeter.take() {
            greeter.stop();
        }
        self.state = DisplayState::Stopping;
        if let Some(session) = self.session.as_mut() {
            session.stop();
        }
        if let Some(greeter_process) = self.greeter_process.as_mut() {
            greeter_process.stop();
        }
        self.try_finish_stop()
    }

    fn try_finish_stop(&mut self) -> Vec<DisplayUpcall> {
        if self.state != DisplayState::Stopping {
            return vec![];
        }
        if self.session.is_some() || self.greeter_process.is_some() {
            return vec![];
        }
        if let Some(mut auth) = self.session_auth.take() {
            auth.close_session();
        }
        self.server.stop(self.id, &self.events);
        self.state = DisplayState::Stopped;
        self.stopped = true;
        debug!(display = %self.id, "display stopped");
        vec![DisplayUpcall::Stopped]
    }

    fn arm_autologin_timer(&mut self, seconds: u64) {
        let events = self.events.clone();
        let display = self.id;
        self.autologin_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            events.send(CoreEvent::AutologinTimeout { display });
        }));
    }

    fn cancel_autologin_timer(&mut self) {
        if let Some(timer) = self.autologin_timer.take() {
            timer.abort();
        }
    }

    fn base_env(&self, username: Option<&str>) -> Vec<(String, String)> {
        let mut env = vec![(
            "PATH".to_owned(),
            "/usr/local/bin:/usr/bin:/bin".to_owned(),
        )];
        if let Some(username) = username {
            env.push(("USER".to_owned(), username.to_owned()));
            env.push(("LOGNAME".to_owned(), username.to_owned()));
        }
        if let Some(address) = self.server.address() {
            env.push(("DISPLAY".to_owned(), address));
        }
        if let Some(path) = self.server.authority_path() {
            env.push(("XAUTHORITY".to_owned(), path.to_string_lossy().into_owned()));
        }
        env
    }

    fn session_command(&self, requested: Option<&str>) -> Vec<String> {
        let name = requested.unwrap_or(&self.user_session_name);
        let mut command = match &self.session_wrapper {
            Some(wrapper) => split_command(wrapper),
            None => Vec::new(),
        };
        command.extend(split_command(name));
        command
    }
}

fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_owned).collect()
}

#[cfg(test)]
#[path = "display_tests.rs"]
mod tests;
