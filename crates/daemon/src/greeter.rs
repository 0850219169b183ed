// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Greeter IPC endpoint.
//!
//! One [`Greeter`] drives the framed protocol with an untrusted greeter
//! subprocess over a pair of anonymous pipes, and mediates authentication on
//! its behalf. At most one authentication session is live at a time; a
//! second AUTHENTICATE cancels the first. The greeter can never continue a
//! conversation it does not own: responses are only ever routed to the
//! current session, and a secret count that does not match the pending
//! prompts cancels the session outright.

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::Arc;

use bytes::Bytes;
use indexmap::IndexMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::auth::{code, AuthItem, AuthSession, AuthStack, AuthState};
use crate::error::{DaemonError, Result};
use crate::event::{AuthEvent, AuthId, CoreEvent, DisplayId, EventSender};
use crate::protocol::{
    FrameDecoder, GreeterRequest, ServerMessage, FROM_SERVER_FD_ENV, TO_SERVER_FD_ENV,
};

/// Child-side pipe ends, handed to the greeter process at spawn.
pub struct GreeterPipes {
    /// Read end the greeter receives server messages on.
    pub from_server: OwnedFd,
    /// Write end the greeter sends requests on.
    pub to_server: OwnedFd,
}

impl GreeterPipes {
    /// Environment variables announcing the fd numbers to the child.
    pub fn env(&self) -> Vec<(String, String)> {
        vec![
            (FROM_SERVER_FD_ENV.to_owned(), self.from_server.as_raw_fd().to_string()),
            (TO_SERVER_FD_ENV.to_owned(), self.to_server.as_raw_fd().to_string()),
        ]
    }

    pub fn into_fds(self) -> Vec<OwnedFd> {
        vec![self.from_server, self.to_server]
    }
}

/// Non-frame outcomes of handling a greeter request, interpreted by the
/// owning display.
#[derive(Debug, PartialEq, Eq)]
pub enum GreeterOutcome {
    None,
    /// CONNECT handled; the greeter is up and showing.
    Connected,
    /// START_SESSION passed the authorization guard.
    SessionRequested { session: Option<String> },
}

/// Outcome of routing an authentication event.
#[derive(Debug, PartialEq, Eq)]
pub enum AuthOutcome {
    None,
    /// The current conversation finished with this result code.
    Finished { code: i32 },
}

/// Server side of the greeter channel.
pub struct Greeter {
    display: DisplayId,
    events: EventSender,
    auth_stack: Arc<dyn AuthStack>,
    service: String,
    privileged: bool,
    tty: Option<String>,
    hints: IndexMap<String, String>,
    sequence: u32,
    auth: Option<AuthSession>,
    /// Cancelled sessions parked until their final result event, then joined.
    draining: Vec<AuthSession>,
    allow_guest: bool,
    guest_authenticated: bool,
    language: Option<String>,
    connected: bool,
    outbound: Option<mpsc::UnboundedSender<Bytes>>,
    child_pipes: Option<GreeterPipes>,
}

impl Greeter {
    pub fn new(
        display: DisplayId,
        events: EventSender,
        auth_stack: Arc<dyn AuthStack>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            display,
            events,
            auth_stack,
            service: service.into(),
            privileged: false,
            tty: None,
            hints: IndexMap::new(),
            sequence: 0,
            auth: None,
            draining: Vec::new(),
            allow_guest: false,
            guest_authenticated: false,
            language: None,
            connected: false,
            outbound: None,
            child_pipes: None,
        }
    }

    pub fn set_allow_guest(&mut self, allow_guest: bool) {
        self.allow_guest = allow_guest;
    }

    pub fn set_privileged(&mut self, privileged: bool) {
        self.privileged = privileged;
    }

    pub fn set_tty(&mut self, tty: Option<String>) {
        self.tty = tty;
    }

    /// Set a hint sent at CONNECTED. Last write wins.
    pub fn set_hint(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.hints.insert(name.into(), value.into());
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn guest_authenticated(&self) -> bool {
        self.guest_authenticated
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    /// The current authentication session, if any.
    pub fn auth(&self) -> Option<&AuthSession> {
        self.auth.as_ref()
    }

    /// Whether the channel may hand off to a session: guest authenticated or
    /// the current conversation succeeded.
    pub fn is_authenticated(&self) -> bool {
        self.guest_authenticated
            || self.auth.as_ref().is_some_and(|a| a.state() == AuthState::Succeeded)
    }

    /// Take the succeeded authentication session for the user session to own.
    pub fn take_auth(&mut self) -> Option<AuthSession> {
        self.auth.take()
    }

    /// Create the pipe pair and start the reader and writer tasks. The
    /// child-side ends are collected with [`take_child_pipes`](Self::take_child_pipes).
    pub fn start(&mut self) -> Result<()> {
        let (to_child_read, to_child_write) =
            nix::unistd::pipe().map_err(|e| DaemonError::io("failed to create pipe", e.into()))?;
        let (from_child_read, from_child_write) =
            nix::unistd::pipe().map_err(|e| DaemonError::io("failed to create pipe", e.into()))?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Bytes>();
        spawn_writer(File::from(to_child_write), outbound_rx);
        spawn_reader(File::from(from_child_read), self.display, self.events.clone());

        self.outbound = Some(outbound_tx);
        self.child_pipes =
            Some(GreeterPipes { from_server: to_child_read, to_server: from_child_write });
        Ok(())
    }

    pub fn take_child_pipes(&mut self) -> Option<GreeterPipes> {
        self.child_pipes.take()
    }

    fn send(&self, message: &ServerMessage) {
        match message.encode() {
            Ok(frame) => {
                if let Some(outbound) = &self.outbound {
                    let _ = outbound.send(frame);
                }
            }
            Err(e) => warn!(display = %self.display, "failed to encode server message: {e}"),
        }
    }

    fn send_end_authentication(&self, sequence: u32, username: &str, result: i32) {
        self.send(&ServerMessage::EndAuthentication {
            sequence,
            username: username.to_owned(),
            result: result as u32,
        });
    }

    /// Route one decoded request.
    pub fn on_request(&mut self, request: GreeterRequest) -> GreeterOutcome {
        match request {
            GreeterRequest::Connect { version } => self.handle_connect(&version),
            GreeterRequest::Authenticate { sequence, username } => {
                self.handle_authenticate(sequence, &username);
                GreeterOutcome::None
            }
            GreeterRequest::AuthenticateAsGuest { sequence } => {
                self.handle_authenticate_as_guest(sequence);
                GreeterOutcome::None
            }
            GreeterRequest::ContinueAuthentication { secrets } => {
                self.handle_continue_authentication(secrets);
                GreeterOutcome::None
            }
            GreeterRequest::CancelAuthentication => {
                if let Some(auth) = self.auth.as_mut() {
                    debug!(display = %self.display, "greeter cancelled authentication");
                    auth.cancel();
                }
                GreeterOutcome::None
            }
            GreeterRequest::StartSession { session } => self.handle_start_session(session),
            GreeterRequest::SetLanguage { language } => {
                self.handle_set_language(language);
                GreeterOutcome::None
            }
        }
    }

    fn handle_connect(&mut self, version: &str) -> GreeterOutcome {
        debug!(display = %self.display, version, "greeter connected");
        self.send(&ServerMessage::Connected {
            version: env!("CARGO_PKG_VERSION").to_owned(),
            hints: self.hints.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        });
        self.connected = true;
        GreeterOutcome::Connected
    }

    fn handle_authenticate(&mut self, sequence: u32, username: &str) {
        let username = if username.is_empty() { None } else { Some(username) };
        debug!(
            display = %self.display,
            sequence,
            username = username.unwrap_or(""),
            "greeter start authentication"
        );

        self.reset_authentication();
        self.sequence = sequence;

        let mut auth = match AuthSession::new(
            self.auth_stack.as_ref(),
            &self.service,
            username,
            self.display,
            self.events.clone(),
        ) {
            Ok(auth) => auth,
            Err(e) => {
                warn!(display = %self.display, "failed to start authentication: {e}");
                self.send_end_authentication(sequence, "", code::SYSTEM_ERR);
                return;
            }
        };
        auth.set_privileged(self.privileged);
        if let Some(tty) = self.tty.clone() {
            let _ = auth.set_item(AuthItem::Tty, &tty);
        }
        match auth.authenticate() {
            Ok(()) => self.auth = Some(auth),
            Err(e) => {
                warn!(display = %self.display, "failed to start authentication: {e}");
                self.send_end_authentication(sequence, "", code::SYSTEM_ERR);
            }
        }
    }

    fn handle_authenticate_as_guest(&mut self, sequence: u32) {
        debug!(display = %self.display, sequence, "greeter start guest authentication");
        self.reset_authentication();
        self.sequence = sequence;
        if !self.allow_guest {
            debug!(display = %self.display, "guest account is disabled");
            self.send_end_authentication(sequence, "", code::USER_UNKNOWN);
            return;
        }
        self.guest_authenticated = true;
        self.send_end_authentication(sequence, "", code::SUCCESS);
    }

    fn handle_continue_authentication(&mut self, secrets: Vec<String>) {
        let Some(auth) = self.auth.as_mut() else {
            return;
        };
        if auth.state() != AuthState::Authenticating {
            return;
        }

        let messages = auth.messages();
        let prompts = messages.iter().filter(|m| m.is_prompt()).count();
        if secrets.len() != prompts {
            warn!(
                display = %self.display,
                expected = prompts,
                got = secrets.len(),
                "wrong number of secrets, cancelling authentication"
            );
            auth.cancel();
            return;
        }

        debug!(display = %self.display, "continue authentication");
        let mut secrets = secrets.into_iter();
        let responses = messages
            .iter()
            .map(|m| if m.is_prompt() { secrets.next().unwrap_or_default() } else { String::new() })
            .collect();
        if let Err(e) = auth.respond(responses) {
            warn!(display = %self.display, "failed to respond: {e}");
        }
    }

    fn handle_start_session(&mut self, session: String) -> GreeterOutcome {
        if !self.is_authenticated() {
            debug!(display = %self.display, "ignoring start session request, user is not authorized");
            self.send(&ServerMessage::SessionResult { result: 1 });
            return GreeterOutcome::None;
        }
        let session = if session.is_empty() { None } else { Some(session) };
        match &session {
            Some(name) => debug!(display = %self.display, session = %name, "greeter requests session"),
            None => debug!(display = %self.display, "greeter requests default session"),
        }
        GreeterOutcome::SessionRequested { session }
    }

    fn handle_set_language(&mut self, language: String) {
        if !self.is_authenticated() {
            debug!(display = %self.display, "ignoring set language request, user is not authorized");
            return;
        }
        if self.guest_authenticated {
            debug!(display = %self.display, "ignoring set language request for guest user");
            return;
        }
        debug!(display = %self.display, %language, "greeter sets language");
        self.language = Some(language);
    }

    /// Report a failed session start back to the greeter.
    pub fn send_session_rejected(&self) {
        self.send(&ServerMessage::SessionResult { result: 1 });
    }

    /// Successful handoff: acknowledge with result 0, then close the
    /// channel so the greeter sees end-of-stream.
    pub fn quit(&mut self) {
        self.send(&ServerMessage::SessionResult { result: 0 });
        self.outbound = None;
    }

    /// Route an authentication worker event to the session that owns it.
    pub fn on_auth_event(&mut self, auth_id: AuthId, event: AuthEvent) -> AuthOutcome {
        // A parked session only needs its final result joined; its frames
        // were already settled when it was replaced.
        if let Some(index) = self.draining.iter().position(|a| a.id() == auth_id) {
            if let AuthEvent::Result { code } = event {
                let mut stale = self.draining.swap_remove(index);
                stale.handle_result(code);
            }
            return AuthOutcome::None;
        }

        if self.auth.as_ref().map(|a| a.id()) != Some(auth_id) {
            return AuthOutcome::None;
        }

        match event {
            AuthEvent::Messages { count } => {
                let (messages, username) = match self.auth.as_ref() {
                    Some(auth) => (auth.messages(), auth.username().unwrap_or_default()),
                    None => return AuthOutcome::None,
                };
                debug!(display = %self.display, count, "prompting greeter");
                self.send(&ServerMessage::Prompt {
                    sequence: self.sequence,
                    username,
                    messages: messages
                        .iter()
                        .map(|m| (m.style.as_wire(), m.text.clone()))
                        .collect(),
                });
                // A batch with no prompts needs no reply from the greeter;
                // answer immediately so the worker is not left blocked.
                if messages.iter().all(|m| !m.is_prompt()) {
                    if let Some(auth) = self.auth.as_mut() {
                        let _ = auth.respond(vec![String::new(); messages.len()]);
                    }
                }
                AuthOutcome::None
            }
            AuthEvent::Result { code } => {
                let username = match self.auth.as_mut() {
                    Some(auth) => {
                        auth.handle_result(code);
                        auth.username().unwrap_or_default()
                    }
                    None => return AuthOutcome::None,
                };
                debug!(
                    display = %self.display,
                    %username,
                    result = code,
                    "authentication finished: {}",
                    code::strerror(code)
                );
                self.send_end_authentication(self.sequence, &username, code);
                AuthOutcome::Finished { code }
            }
        }
    }

    /// Cancel and park the current authentication, if it is still running.
    fn reset_authentication(&mut self) {
        if let Some(mut auth) = self.auth.take() {
            if auth.state() == AuthState::Authenticating {
                auth.cancel();
                // The replaced conversation still gets its terminal frame.
                let username = auth.username().unwrap_or_default();
                self.send_end_authentication(self.sequence, &username, code::CONV_ERR);
                self.draining.push(auth);
            }
        }
        self.guest_authenticated = false;
    }

    /// Tear the channel down without a session handoff.
    pub fn stop(&mut self) {
        if let Some(auth) = self.auth.as_mut() {
            auth.cancel();
        }
        self.outbound = None;
    }
}

fn spawn_writer(mut file: File, mut outbound: mpsc::UnboundedReceiver<Bytes>) {
    tokio::task::spawn_blocking(move || {
        while let Some(frame) = outbound.blocking_recv() {
            if file.write_all(&frame).and_then(|()| file.flush()).is_err() {
                break;
            }
        }
    });
}

fn spawn_reader(mut file: File, display: DisplayId, events: EventSender) {
    tokio::task::spawn_blocking(move || {
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 4096];
        loop {
            match file.read(&mut buf) {
                Ok(0) | Err(_) => {
                    events.send(CoreEvent::GreeterHangup { display });
                    return;
                }
                Ok(n) => decoder.push(&buf[..n]),
            }
            loop {
                match decoder.next_frame() {
                    Ok(Some((id, payload))) => match GreeterRequest::decode(id, &payload) {
                        Ok(request) => {
                            events.send(CoreEvent::GreeterRequest { display, request });
                        }
                        Err(e) => {
                            events.send(CoreEvent::GreeterProtocolError {
                                display,
                                detail: e.to_string(),
                            });
                            return;
                        }
                    },
                    Ok(None) => break,
                    Err(e) => {
                        events.send(CoreEvent::GreeterProtocolError {
                            display,
                            detail: e.to_string(),
                        });
                        return;
                    }
                }
            }
        }
    });
}

#[cfg(test)]
#[path = "greeter_tests.rs"]
mod tests;
