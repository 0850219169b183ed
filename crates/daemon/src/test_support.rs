// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test fixtures: a scripted authentication stack, a capturing
//! session launcher, a fake guest account, a greeter-side protocol client,
//! and a seat harness that pumps the supervisor channel inline.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::time::Duration;

use indexmap::IndexMap;
use tokio::sync::mpsc;

use crate::auth::{code, AuthBackend, AuthItem, AuthMessage, AuthStack, Conversation};
use crate::error::Result;
use crate::event::{CoreEvent, DisplayId, EventSender};
use crate::protocol::{FrameDecoder, GreeterRequest, ServerMessage};
use crate::seat::{GuestAccount, Seat, SeatDefaults, SeatDeps, SeatEvent};
use crate::session::{SessionKind, SessionLauncher, SessionProcess, SessionSpec};

// -- Scripted authentication -------------------------------------------------

/// One conversation round: the messages the backend asks, and the responses
/// it accepts (one entry per prompt-style message).
#[derive(Debug, Clone)]
pub struct ConvRound {
    pub messages: Vec<AuthMessage>,
    pub expected: Vec<String>,
}

/// Per-user authentication script.
#[derive(Debug, Clone)]
pub struct ScriptedUser {
    rounds: Vec<ConvRound>,
    acct_code: i32,
    chauthtok_rounds: Vec<ConvRound>,
    env: Vec<(String, String)>,
}

impl ScriptedUser {
    /// Single hidden `Password:` round.
    pub fn password(password: impl Into<String>) -> Self {
        Self {
            rounds: vec![ConvRound {
                messages: vec![AuthMessage::hidden_prompt("Password:")],
                expected: vec![password.into()],
            }],
            acct_code: code::SUCCESS,
            chauthtok_rounds: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Append another conversation round (e.g. a one-time password).
    pub fn with_round(
        mut self,
        messages: Vec<AuthMessage>,
        expected: Vec<String>,
    ) -> Self {
        self.rounds.push(ConvRound { messages, expected });
        self
    }

    /// Override the account-management result (e.g. ACCT_EXPIRED).
    pub fn with_acct_code(mut self, acct_code: i32) -> Self {
        self.acct_code = acct_code;
        self
    }

    /// Rounds for the expired-token change dialog, driven when account
    /// management reports NEW_AUTHTOK_REQD.
    pub fn with_chauthtok_round(
        mut self,
        messages: Vec<AuthMessage>,
        expected: Vec<String>,
    ) -> Self {
        self.chauthtok_rounds.push(ConvRound { messages, expected });
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Authentication stack with fully scripted conversations.
#[derive(Debug, Clone, Default)]
pub struct ScriptedAuthStack {
    users: HashMap<String, ScriptedUser>,
}

impl ScriptedAuthStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(mut self, username: impl Into<String>, script: ScriptedUser) -> Self {
        self.users.insert(username.into(), script);
        self
    }
}

impl AuthStack for ScriptedAuthStack {
    fn start(&self, service: &str, username: Option<&str>) -> Result<Box<dyn AuthBackend>> {
        Ok(Box::new(ScriptedBackend {
            users: self.users.clone(),
            service: service.to_owned(),
            username: username.map(str::to_owned),
            script: None,
        }))
    }
}

struct ScriptedBackend {
    users: HashMap<String, ScriptedUser>,
    service: String,
    username: Option<String>,
    script: Option<ScriptedUser>,
}

impl ScriptedBackend {
    fn run_rounds(rounds: &[ConvRound], conversation: &mut dyn Conversation) -> i32 {
        for round in rounds {
            let Ok(responses) = conversation.converse(&round.messages) else {
                return code::CONV_ERR;
            };
            let mut expected = round.expected.iter();
            let wanted: Vec<String> = round
                .messages
                .iter()
                .map(|m| {
                    if m.is_prompt() {
                        expected.next().cloned().unwrap_or_default()
                    } else {
                        String::new()
                    }
                })
                .collect();
            if responses != wanted {
                return code::AUTH_ERR;
            }
        }
        code::SUCCESS
    }
}

impl AuthBackend for ScriptedBackend {
    fn authenticate(&mut self, conversation: &mut dyn Conversation) -> i32 {
        if self.service.ends_with("-autologin") {
            return match self.username.as_deref() {
                Some(username) if self.users.contains_key(username) => {
                    self.script = self.users.get(username).cloned();
                    code::SUCCESS
                }
                _ => code::USER_UNKNOWN,
            };
        }

        if self.username.is_none() {
            let Ok(responses) = conversation.converse(&[AuthMessage::visible_prompt("login:")])
            else {
                return code::CONV_ERR;
            };
            self.username = responses.into_iter().next().filter(|r| !r.is_empty());
        }
        let Some(script) = self.username.as_deref().and_then(|u| self.users.get(u)).cloned()
        else {
            return code::USER_UNKNOWN;
        };
        let result = Self::run_rounds(&script.rounds, conversation);
        self.script = Some(script);
        result
    }

    fn acct_mgmt(&mut self) -> i32 {
        self.script.as_ref().map(|s| s.acct_code).unwrap_or(code::SUCCESS)
    }

    fn change_expired_authtok(&mut self, conversation: &mut dyn Conversation) -> i32 {
        match &self.script {
            Some(script) => Self::run_rounds(&script.chauthtok_rounds.clone(), conversation),
            None => code::SUCCESS,
        }
    }

    fn open_session(&mut self) -> i32 {
        code::SUCCESS
    }

    fn close_session(&mut self) -> i32 {
        code::SUCCESS
    }

    fn establish_credentials(&mut self) -> i32 {
        code::SUCCESS
    }

    fn delete_credentials(&mut self) -> i32 {
        code::SUCCESS
    }

    fn set_item(&mut self, _item: AuthItem, _value: &str) {}

    fn username(&self) -> Option<String> {
        self.username.clone()
    }

    fn envlist(&self) -> Vec<(String, String)> {
        self.script.as_ref().map(|s| s.env.clone()).unwrap_or_default()
    }
}

// -- Capturing launcher ------------------------------------------------------

/// Cloneable summary of one launch.
#[derive(Debug, Clone)]
pub struct LaunchInfo {
    pub display: DisplayId,
    pub kind: SessionKind,
    pub username: Option<String>,
    pub command: Vec<String>,
    pub env: Vec<(String, String)>,
}

struct LaunchRecord {
    info: LaunchInfo,
    fds: Vec<OwnedFd>,
    alive: Arc<AtomicBool>,
}

/// Launcher that records specs instead of spawning. "Processes" report
/// stopped through the event channel when terminated.
#[derive(Clone, Default)]
pub struct FakeLauncher {
    records: Arc<Mutex<Vec<LaunchRecord>>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<LaunchRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn count(&self, kind: SessionKind) -> usize {
        self.lock().iter().filter(|r| r.info.kind == kind).count()
    }

    pub fn last(&self, kind: SessionKind) -> Option<LaunchInfo> {
        self.lock().iter().rev().find(|r| r.info.kind == kind).map(|r| r.info.clone())
    }

    /// Whether the most recent launch of `kind` has been terminated.
    pub fn last_stopped(&self, kind: SessionKind) -> bool {
        self.lock()
            .iter()
            .rev()
            .find(|r| r.info.kind == kind)
            .is_some_and(|r| !r.alive.load(Ordering::Acquire))
    }

    /// Take the greeter pipe ends of the most recent greeter launch:
    /// `(read from server, write to server)`.
    pub fn take_greeter_pipes(&self) -> Option<(OwnedFd, OwnedFd)> {
        let mut records = self.lock();
        let record = records
            .iter_mut()
            .rev()
            .find(|r| r.info.kind == SessionKind::Greeter && r.fds.len() == 2)?;
        let mut fds = std::mem::take(&mut record.fds);
        let to_server = fds.pop()?;
        let from_server = fds.pop()?;
        Some((from_server, to_server))
    }
}

impl SessionLauncher for FakeLauncher {
    fn launch(&self, spec: SessionSpec, events: &EventSender) -> Result<Box<dyn SessionProcess>> {
        let alive = Arc::new(AtomicBool::new(true));
        let info = LaunchInfo {
            display: spec.display,
            kind: spec.kind,
            username: spec.username,
            command: spec.command,
            env: spec.env,
        };
        self.lock().push(LaunchRecord {
            info: info.clone(),
            fds: spec.inherit_fds,
            alive: Arc::clone(&alive),
        });
        Ok(Box::new(FakeProcess {
            display: info.display,
            kind: info.kind,
            events: events.clone(),
            alive,
        }))
    }
}

struct FakeProcess {
    display: DisplayId,
    kind: SessionKind,
    events: EventSender,
    alive: Arc<AtomicBool>,
}

impl SessionProcess for FakeProcess {
    fn pid(&self) -> Option<i32> {
        None
    }

    fn terminate(&mut self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            self.events.session_stopped(self.display, self.kind, Some(0));
        }
    }

    fn kill(&mut self) {
        self.terminate();
    }
}

// -- Fake guest account ------------------------------------------------------

#[derive(Clone)]
pub struct FakeGuestAccount {
    counter: Arc<AtomicU32>,
    cleaned: Arc<Mutex<Vec<String>>>,
}

impl FakeGuestAccount {
    pub fn new() -> Self {
        Self { counter: Arc::new(AtomicU32::new(0)), cleaned: Arc::new(Mutex::new(Vec::new())) }
    }

    pub fn cleaned(&self) -> Vec<String> {
        self.cleaned.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for FakeGuestAccount {
    fn default() -> Self {
        Self::new()
    }
}

impl GuestAccount for FakeGuestAccount {
    fn is_installed(&self) -> bool {
        true
    }

    fn setup(&self) -> Option<String> {
        let number = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        Some(format!("guest-{number:03}"))
    }

    fn cleanup(&self, username: &str) {
        self.cleaned.lock().unwrap_or_else(|e| e.into_inner()).push(username.to_owned());
    }
}

// -- Greeter-side client -----------------------------------------------------

/// Speaks the wire protocol from the greeter's side of the pipes.
pub struct GreeterClient {
    writer: File,
    frames: std_mpsc::Receiver<ServerMessage>,
    buffered: VecDeque<ServerMessage>,
}

impl GreeterClient {
    /// `from_server` is the end the daemon writes to; `to_server` the end it
    /// reads from.
    pub fn new(from_server: OwnedFd, to_server: OwnedFd) -> Self {
        let mut file = File::from(from_server);
        let (tx, rx) = std_mpsc::channel();
        std::thread::spawn(move || {
            let mut decoder = FrameDecoder::new();
            let mut buf = [0u8; 4096];
            loop {
                match file.read(&mut buf) {
                    Ok(0) | Err(_) => return,
                    Ok(n) => decoder.push(&buf[..n]),
                }
                while let Ok(Some((id, payload))) = decoder.next_frame() {
                    match ServerMessage::decode(id, &payload) {
                        Ok(message) => {
                            if tx.send(message).is_err() {
                                return;
                            }
                        }
                        Err(_) => return,
                    }
                }
            }
        });
        Self { writer: File::from(to_server), frames: rx, buffered: VecDeque::new() }
    }

    pub fn send(&mut self, request: &GreeterRequest) -> anyhow::Result<()> {
        let frame = request.encode()?;
        self.writer.write_all(&frame)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Write raw bytes, for malformed-frame tests.
    pub fn send_raw(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        self.writer.write_all(bytes)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Next already-received message, if any.
    pub fn poll(&mut self) -> Option<ServerMessage> {
        while let Ok(message) = self.frames.try_recv() {
            self.buffered.push_back(message);
        }
        self.buffered.pop_front()
    }

    /// Whether the server closed its end (all pending messages are kept).
    pub fn disconnected(&mut self) -> bool {
        loop {
            match self.frames.try_recv() {
                Ok(message) => self.buffered.push_back(message),
                Err(std_mpsc::TryRecvError::Empty) => return false,
                Err(std_mpsc::TryRecvError::Disconnected) => return self.buffered.is_empty(),
            }
        }
    }
}

// -- Seat harness ------------------------------------------------------------

/// A seat wired to fakes, with the supervisor channel pumped inline.
pub struct SeatHarness {
    pub seat: Seat,
    pub launcher: FakeLauncher,
    pub guest: FakeGuestAccount,
    pub seat_events: Vec<SeatEvent>,
    events: EventSender,
    rx: mpsc::UnboundedReceiver<CoreEvent>,
}

pub struct SeatHarnessBuilder {
    kind: String,
    properties: IndexMap<String, String>,
    stack: ScriptedAuthStack,
    privileged: bool,
}

impl SeatHarnessBuilder {
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn auth(mut self, stack: ScriptedAuthStack) -> Self {
        self.stack = stack;
        self
    }

    /// Enable hook scripts and credential calls (they are skipped when
    /// unprivileged).
    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    pub fn build(self) -> Result<SeatHarness> {
        let (events, rx) = EventSender::channel();
        let launcher = FakeLauncher::new();
        let guest = FakeGuestAccount::new();
        let deps = SeatDeps {
            events: events.clone(),
            auth_stack: Arc::new(self.stack),
            launcher: Arc::new(launcher.clone()),
            guest: Arc::new(guest.clone()),
            privileged: self.privileged,
            display_ids: Arc::new(AtomicU32::new(0)),
            defaults: SeatDefaults {
                greeter_session: "/usr/bin/test-greeter".to_owned(),
                user_session: "/usr/bin/test-session".to_owned(),
                greeter_user: "greeter".to_owned(),
            },
        };
        let seat = Seat::new("seat0", self.kind.as_str(), self.properties, deps)?;
        Ok(SeatHarness { seat, launcher, guest, seat_events: Vec::new(), events, rx })
    }
}

impl SeatHarness {
    pub fn builder() -> SeatHarnessBuilder {
        SeatHarnessBuilder {
            kind: "local".to_owned(),
            properties: IndexMap::new(),
            stack: ScriptedAuthStack::new(),
            privileged: false,
        }
    }

    /// Handle for injecting events (e.g. a session exiting on its own).
    pub fn events(&self) -> EventSender {
        self.events.clone()
    }

    pub fn start(&mut self) -> bool {
        let (started, events) = self.seat.start();
        self.seat_events.extend(events);
        started
    }

    /// Pump one supervisor event through the seat. False on timeout.
    pub async fn pump_one(&mut self, wait: Duration) -> bool {
        match tokio::time::timeout(wait, self.rx.recv()).await {
            Ok(Some(event)) => {
                let events = self.seat.handle_display_event(event);
                self.seat_events.extend(events);
                true
            }
            _ => false,
        }
    }

    /// Pump until the condition holds. Errors after the deadline.
    pub async fn pump_until<F>(&mut self, what: &str, condition: F) -> anyhow::Result<()>
    where
        F: Fn(&SeatHarness) -> bool,
    {
        for _ in 0..100 {
            if condition(self) {
                return Ok(());
            }
            self.pump_one(Duration::from_millis(100)).await;
        }
        if condition(self) {
            return Ok(());
        }
        anyhow::bail!("timed out waiting for {what}")
    }

    /// Pump until the channel stays quiet for a beat.
    pub async fn settle(&mut self) {
        while self.pump_one(Duration::from_millis(150)).await {}
    }

    /// Connect a greeter-side client to the most recently launched greeter.
    pub fn greeter_client(&mut self) -> anyhow::Result<GreeterClient> {
        let (from_server, to_server) = self
            .launcher
            .take_greeter_pipes()
            .ok_or_else(|| anyhow::anyhow!("no greeter launch captured"))?;
        Ok(GreeterClient::new(from_server, to_server))
    }

    /// Pump events until the client has a server message to hand over.
    pub async fn recv_from_server(
        &mut self,
        client: &mut GreeterClient,
    ) -> anyhow::Result<ServerMessage> {
        for _ in 0..100 {
            if let Some(message) = client.poll() {
                return Ok(message);
            }
            self.pump_one(Duration::from_millis(100)).await;
        }
        anyhow::bail!("timed out waiting for a server message")
    }

    /// Pump events until the server closes the greeter channel.
    pub async fn wait_for_eof(&mut self, client: &mut GreeterClient) -> anyhow::Result<()> {
        for _ in 0..100 {
            if client.disconnected() {
                return Ok(());
            }
            self.pump_one(Duration::from_millis(100)).await;
        }
        anyhow::bail!("timed out waiting for the channel to close")
    }
}
