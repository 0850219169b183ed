// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authentication sessions.
//!
//! The host authentication library is blocking and callback-driven, so every
//! [`AuthSession`] runs it on a dedicated worker thread. The worker owns the
//! backend handle for the duration of the call; it talks back to the
//! supervisor through exactly two channels: prompt batches are stored on the
//! session and announced with an `AuthEvent::Messages` post, and the final
//! result is announced with an `AuthEvent::Result` post just before the
//! thread exits. Responses flow the other way through an SPSC queue the
//! worker blocks on inside the conversation callback.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use tracing::{debug, warn};

use crate::error::{DaemonError, Result};
use crate::event::{AuthId, DisplayId, EventSender};

/// Result codes of the host authentication library.
pub mod code {
    pub const SUCCESS: i32 = 0;
    pub const SYSTEM_ERR: i32 = 4;
    pub const PERM_DENIED: i32 = 6;
    pub const AUTH_ERR: i32 = 7;
    pub const USER_UNKNOWN: i32 = 10;
    pub const NEW_AUTHTOK_REQD: i32 = 12;
    pub const ACCT_EXPIRED: i32 = 13;
    pub const CONV_ERR: i32 = 19;

    pub fn strerror(code: i32) -> &'static str {
        match code {
            SUCCESS => "success",
            SYSTEM_ERR => "system error",
            PERM_DENIED => "permission denied",
            AUTH_ERR => "authentication failure",
            USER_UNKNOWN => "user not known",
            NEW_AUTHTOK_REQD => "authentication token expired",
            ACCT_EXPIRED => "account expired",
            CONV_ERR => "conversation error",
            _ => "unknown error",
        }
    }
}

/// Prompt style of a conversation message, with the host library's wire
/// numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStyle {
    PromptEchoOff,
    PromptEchoOn,
    ErrorMsg,
    TextInfo,
}

impl PromptStyle {
    pub fn as_wire(self) -> u32 {
        match self {
            Self::PromptEchoOff => 1,
            Self::PromptEchoOn => 2,
            Self::ErrorMsg => 3,
            Self::TextInfo => 4,
        }
    }

    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::PromptEchoOff),
            2 => Some(Self::PromptEchoOn),
            3 => Some(Self::ErrorMsg),
            4 => Some(Self::TextInfo),
            _ => None,
        }
    }

    /// Whether this style expects a response from the user.
    pub fn is_prompt(self) -> bool {
        matches!(self, Self::PromptEchoOff | Self::PromptEchoOn)
    }
}

/// One message of a conversation batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthMessage {
    pub style: PromptStyle,
    pub text: String,
}

impl AuthMessage {
    pub fn hidden_prompt(text: impl Into<String>) -> Self {
        Self { style: PromptStyle::PromptEchoOff, text: text.into() }
    }

    pub fn visible_prompt(text: impl Into<String>) -> Self {
        Self { style: PromptStyle::PromptEchoOn, text: text.into() }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self { style: PromptStyle::TextInfo, text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self { style: PromptStyle::ErrorMsg, text: text.into() }
    }

    pub fn is_prompt(&self) -> bool {
        self.style.is_prompt()
    }
}

/// Item kinds passed through to the host library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthItem {
    Tty,
    RemoteHost,
}

/// The conversation aborted (cancellation or a non-interactive session).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvError;

/// Conversation callback handed to the backend during authentication.
/// Must return exactly one response per message (empty for non-prompts).
pub trait Conversation: Send {
    fn converse(
        &mut self,
        messages: &[AuthMessage],
    ) -> std::result::Result<Vec<String>, ConvError>;
}

/// One started authentication handle of the host library.
///
/// The real binding wraps the platform's pluggable authentication framework;
/// it is an external collaborator of the daemon. [`StaticUserStack`] is the
/// in-tree test-mode implementation.
pub trait AuthBackend: Send {
    fn authenticate(&mut self, conversation: &mut dyn Conversation) -> i32;
    fn acct_mgmt(&mut self) -> i32;
    /// Change an expired authentication token; runs its own conversation.
    fn change_expired_authtok(&mut self, conversation: &mut dyn Conversation) -> i32;
    fn open_session(&mut self) -> i32;
    fn close_session(&mut self) -> i32;
    fn establish_credentials(&mut self) -> i32;
    fn delete_credentials(&mut self) -> i32;
    fn set_item(&mut self, item: AuthItem, value: &str);
    /// The user item, which the library may rewrite during authentication.
    fn username(&self) -> Option<String>;
    /// Environment variables the library wants exported into the session.
    fn envlist(&self) -> Vec<(String, String)>;
}

/// Factory for authentication handles, one per configured service.
pub trait AuthStack: Send + Sync {
    fn start(&self, service: &str, username: Option<&str>) -> Result<Box<dyn AuthBackend>>;
}

/// Lifecycle of an authentication session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    Authenticating,
    Succeeded,
    Failed,
    SessionOpen,
    Closed,
}

enum ConvReply {
    Responses(Vec<String>),
    Cancel,
}

static NEXT_AUTH_ID: AtomicU64 = AtomicU64::new(1);

/// One authentication conversation against the host stack.
///
/// Invariant: the worker thread exists exactly while the state is
/// `Authenticating`; it is joined by `handle_result` after the final
/// notification arrives on the supervisor.
pub struct AuthSession {
    id: AuthId,
    display: DisplayId,
    service: String,
    requested_username: Option<String>,
    interactive: bool,
    privileged: bool,
    state: AuthState,
    backend: Option<Box<dyn AuthBackend>>,
    worker: Option<thread::JoinHandle<Box<dyn AuthBackend>>>,
    response_tx: Option<mpsc::Sender<ConvReply>>,
    pending: Arc<Mutex<Option<Vec<AuthMessage>>>>,
    stop_requested: Arc<AtomicBool>,
    result: Option<i32>,
    events: EventSender,
}

impl AuthSession {
    /// Initialize a handle against `service`. No I/O happens yet.
    pub fn new(
        stack: &dyn AuthStack,
        service: &str,
        username: Option<&str>,
        display: DisplayId,
        events: EventSender,
    ) -> Result<Self> {
        let backend = stack.start(service, username)?;
        let id = AuthId(NEXT_AUTH_ID.fetch_add(1, Ordering::Relaxed));
        let display_id = display;
        debug!(%id, display = %display_id, service, username = username.unwrap_or(""), "starting auth session");
        Ok(Self {
            id,
            display,
            service: service.to_owned(),
            requested_username: username.map(str::to_owned),
            interactive: true,
            privileged: false,
            state: AuthState::Idle,
            backend: Some(backend),
            worker: None,
            response_tx: None,
            pending: Arc::new(Mutex::new(None)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            result: None,
            events,
        })
    }

    pub fn id(&self) -> AuthId {
        self.id
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn result(&self) -> Option<i32> {
        self.result
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Whether the conversation callback may prompt. Non-interactive
    /// sessions (autologin) fail any conversation with `CONV_ERR`.
    pub fn set_interactive(&mut self, interactive: bool) {
        self.interactive = interactive;
    }

    /// Whether session and credential calls reach the host library.
    /// They are no-ops when the daemon is unprivileged.
    pub fn set_privileged(&mut self, privileged: bool) {
        self.privileged = privileged;
    }

    pub fn set_item(&mut self, item: AuthItem, value: &str) -> Result<()> {
        match self.backend.as_mut() {
            Some(backend) => {
                backend.set_item(item, value);
                Ok(())
            }
            None => Err(DaemonError::state("cannot set item while authenticating")),
        }
    }

    /// The authenticated (or requested) username. While the worker holds the
    /// backend this is the username the conversation was started with.
    pub fn username(&self) -> Option<String> {
        match &self.backend {
            Some(backend) => backend.username().or_else(|| self.requested_username.clone()),
            None => self.requested_username.clone(),
        }
    }

    /// Start the worker thread running the full authentication, account
    /// management, and (if required) expired-token change dialog.
    pub fn authenticate(&mut self) -> Result<()> {
        if self.state != AuthState::Idle || self.worker.is_some() {
            return Err(DaemonError::state(format!(
                "authenticate called in state {:?}",
                self.state
            )));
        }
        let mut backend = self
            .backend
            .take()
            .ok_or_else(|| DaemonError::state("authentication handle already consumed"))?;

        let (response_tx, response_rx) = mpsc::channel();
        let mut conversation = WorkerConversation {
            interactive: self.interactive,
            stop_requested: Arc::clone(&self.stop_requested),
            pending: Arc::clone(&self.pending),
            responses: response_rx,
            events: self.events.clone(),
            display: self.display,
            auth: self.id,
        };
        let events = self.events.clone();
        let display = self.display;
        let auth = self.id;

        let worker = thread::Builder::new()
            .name(format!("{auth}"))
            .spawn(move || {
                let mut result = backend.authenticate(&mut conversation);
                if result == code::SUCCESS {
                    result = backend.acct_mgmt();
                    if result == code::NEW_AUTHTOK_REQD {
                        result = backend.change_expired_authtok(&mut conversation);
                    }
                }
                events.auth_result(display, auth, result);
                backend
            })
            .map_err(|e| DaemonError::io("failed to spawn authentication worker", e))?;

        self.worker = Some(worker);
        self.response_tx = Some(response_tx);
        self.state = AuthState::Authenticating;
        Ok(())
    }

    /// Messages of the most recent conversation batch.
    pub fn messages(&self) -> Vec<AuthMessage> {
        let guard = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        guard.clone().unwrap_or_default()
    }

    /// How many of the pending messages expect a response.
    pub fn prompt_count(&self) -> usize {
        self.messages().iter().filter(|m| m.is_prompt()).count()
    }

    /// Push responses onto the queue the worker is blocked on. The vector
    /// must hold one entry per pending message.
    pub fn respond(&mut self, responses: Vec<String>) -> Result<()> {
        if self.state != AuthState::Authenticating {
            return Err(DaemonError::state(format!("respond called in state {:?}", self.state)));
        }
        match &self.response_tx {
            Some(tx) => {
                let _ = tx.send(ConvReply::Responses(responses));
                Ok(())
            }
            None => Err(DaemonError::state("no conversation in progress")),
        }
    }

    /// Signal cancellation. Idempotent: only the first call does anything.
    /// A worker blocked on the response queue is woken with a sentinel that
    /// makes it return `CONV_ERR` to the host library.
    pub fn cancel(&mut self) {
        if self.stop_requested.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(id = %self.id, "cancelling authentication");
        if let Some(tx) = &self.response_tx {
            let _ = tx.send(ConvReply::Cancel);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Join the worker after its final notification and record the result.
    pub fn handle_result(&mut self, result: i32) {
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(backend) => self.backend = Some(backend),
                Err(_) => warn!(id = %self.id, "authentication worker panicked"),
            }
        }
        self.response_tx = None;
        self.result = Some(result);
        self.state =
            if result == code::SUCCESS { AuthState::Succeeded } else { AuthState::Failed };
        debug!(id = %self.id, result, "authentication result: {}", code::strerror(result));
        if self.stop_requested.load(Ordering::Acquire) {
            // One more cancel for cleanup; a no-op past the first call.
            self.cancel();
        }
    }

    /// Open the host session. Valid only after a successful authentication;
    /// a no-op when unprivileged.
    pub fn open_session(&mut self) -> Result<()> {
        if self.state != AuthState::Succeeded {
            return Err(DaemonError::state(format!(
                "open_session called in state {:?}",
                self.state
            )));
        }
        if self.privileged {
            if let Some(backend) = self.backend.as_mut() {
                let result = backend.open_session();
                if result != code::SUCCESS {
                    return Err(DaemonError::auth(result));
                }
            }
        }
        self.state = AuthState::SessionOpen;
        Ok(())
    }

    /// Establish credentials for the opened session. No-op when unprivileged.
    pub fn setup_credentials(&mut self) -> Result<()> {
        if !matches!(self.state, AuthState::Succeeded | AuthState::SessionOpen) {
            return Err(DaemonError::state(format!(
                "setup_credentials called in state {:?}",
                self.state
            )));
        }
        if self.privileged {
            if let Some(backend) = self.backend.as_mut() {
                let result = backend.establish_credentials();
                if result != code::SUCCESS {
                    return Err(DaemonError::auth(result));
                }
            }
        }
        Ok(())
    }

    /// Close the session and delete credentials. Cancellation never closes
    /// an open session implicitly; this must be called explicitly.
    pub fn close_session(&mut self) {
        if self.state == AuthState::SessionOpen && self.privileged {
            if let Some(backend) = self.backend.as_mut() {
                backend.close_session();
                backend.delete_credentials();
            }
        }
        self.state = AuthState::Closed;
    }

    /// Environment variables the host library wants in the session.
    pub fn envlist(&self) -> Vec<(String, String)> {
        self.backend.as_ref().map(|b| b.envlist()).unwrap_or_default()
    }
}

impl Drop for AuthSession {
    fn drop(&mut self) {
        // Unblock a still-running worker; its late events carry a stale id
        // and are dropped by the router.
        self.cancel();
    }
}

struct WorkerConversation {
    interactive: bool,
    stop_requested: Arc<AtomicBool>,
    pending: Arc<Mutex<Option<Vec<AuthMessage>>>>,
    responses: mpsc::Receiver<ConvReply>,
    events: EventSender,
    display: DisplayId,
    auth: AuthId,
}

impl Conversation for WorkerConversation {
    fn converse(
        &mut self,
        messages: &[AuthMessage],
    ) -> std::result::Result<Vec<String>, ConvError> {
        // A cancelled session can still reach the callback; fail it here.
        if self.stop_requested.load(Ordering::Acquire) {
            return Err(ConvError);
        }
        if !self.interactive {
            return Err(ConvError);
        }

        {
            let mut guard = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            *guard = Some(messages.to_vec());
        }
        self.events.auth_messages(self.display, self.auth, messages.len());

        let reply = self.responses.recv().map_err(|_| ConvError)?;
        {
            let mut guard = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            *guard = None;
        }
        if self.stop_requested.load(Ordering::Acquire) {
            return Err(ConvError);
        }
        match reply {
            ConvReply::Responses(responses) => Ok(responses),
            ConvReply::Cancel => Err(ConvError),
        }
    }
}

// -- Static user stack -------------------------------------------------------

/// Service suffix that authenticates without a conversation (autologin).
const AUTOLOGIN_SERVICE_SUFFIX: &str = "-autologin";

/// Test-mode authentication stack backed by a static user table.
///
/// Entries come from a passwd-style file (`user:password` per line, `#`
/// comments). Services ending in `-autologin` succeed for known users
/// without prompting; everything else runs a username (if absent) and
/// password conversation.
#[derive(Debug, Default, Clone)]
pub struct StaticUserStack {
    users: HashMap<String, String>,
}

impl StaticUserStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.insert(username.into(), password.into());
        self
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| DaemonError::io(format!("failed to read {}", path.display()), e))?;
        let mut users = HashMap::new();
        for (number, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((username, password)) = line.split_once(':') else {
                return Err(DaemonError::config(format!(
                    "{}:{}: expected user:password",
                    path.display(),
                    number + 1
                )));
            };
            users.insert(username.to_owned(), password.to_owned());
        }
        Ok(Self { users })
    }
}

impl AuthStack for StaticUserStack {
    fn start(&self, service: &str, username: Option<&str>) -> Result<Box<dyn AuthBackend>> {
        Ok(Box::new(StaticBackend {
            users: self.users.clone(),
            service: service.to_owned(),
            username: username.map(str::to_owned),
        }))
    }
}

struct StaticBackend {
    users: HashMap<String, String>,
    service: String,
    username: Option<String>,
}

impl AuthBackend for StaticBackend {
    fn authenticate(&mut self, conversation: &mut dyn Conversation) -> i32 {
        if self.service.ends_with(AUTOLOGIN_SERVICE_SUFFIX) {
            return match self.username.as_deref() {
                Some(username) if self.users.contains_key(username) => code::SUCCESS,
                _ => code::USER_UNKNOWN,
            };
        }

        if self.username.is_none() {
            let Ok(responses) =
                conversation.converse(&[AuthMessage::visible_prompt("login:")])
            else {
                return code::CONV_ERR;
            };
            self.username = responses.into_iter().next().filter(|r| !r.is_empty());
            if self.username.is_none() {
                return code::USER_UNKNOWN;
            }
        }

        let Ok(responses) = conversation.converse(&[AuthMessage::hidden_prompt("Password:")])
        else {
            return code::CONV_ERR;
        };
        let supplied = responses.into_iter().next().unwrap_or_default();
        match self.username.as_deref().and_then(|u| self.users.get(u)) {
            None => code::USER_UNKNOWN,
            Some(password) if *password == supplied => code::SUCCESS,
            Some(_) => code::AUTH_ERR,
        }
    }

    fn acct_mgmt(&mut self) -> i32 {
        code::SUCCESS
    }

    fn change_expired_authtok(&mut self, _conversation: &mut dyn Conversation) -> i32 {
        code::SUCCESS
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
        Vec::new()
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
