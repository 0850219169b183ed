// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

use super::*;
use crate::test_support::{GreeterClient, ScriptedAuthStack, ScriptedUser};

const DISPLAY: DisplayId = DisplayId(9);

struct Fixture {
    greeter: Greeter,
    rx: UnboundedReceiver<CoreEvent>,
    client: GreeterClient,
    outcomes: Vec<GreeterOutcome>,
}

fn stack() -> ScriptedAuthStack {
    ScriptedAuthStack::new().user("alice", ScriptedUser::password("s3cret"))
}

fn fixture_with(
    stack: ScriptedAuthStack,
    configure: impl FnOnce(&mut Greeter),
) -> anyhow::Result<Fixture> {
    let (events, rx) = EventSender::channel();
    let mut greeter = Greeter::new(DISPLAY, events, Arc::new(stack), "doorman");
    configure(&mut greeter);
    greeter.start()?;
    let pipes = greeter
        .take_child_pipes()
        .ok_or_else(|| anyhow::anyhow!("pipes missing"))?;
    let client = GreeterClient::new(pipes.from_server, pipes.to_server);
    Ok(Fixture { greeter, rx, client, outcomes: Vec::new() })
}

fn fixture() -> anyhow::Result<Fixture> {
    fixture_with(stack(), |_| {})
}

impl Fixture {
    async fn pump_one(&mut self) -> bool {
        match tokio::time::timeout(Duration::from_millis(100), self.rx.recv()).await {
            Ok(Some(CoreEvent::GreeterRequest { request, .. })) => {
                let outcome = self.greeter.on_request(request);
                self.outcomes.push(outcome);
                true
            }
            Ok(Some(CoreEvent::Auth { auth, event, .. })) => {
                self.greeter.on_auth_event(auth, event);
                true
            }
            Ok(Some(_)) => true,
            _ => false,
        }
    }

    async fn recv(&mut self) -> anyhow::Result<ServerMessage> {
        for _ in 0..100 {
            if let Some(message) = self.client.poll() {
                return Ok(message);
            }
            self.pump_one().await;
        }
        anyhow::bail!("timed out waiting for a server message")
    }
}

#[tokio::test]
async fn connect_answers_with_version_and_hints() -> anyhow::Result<()> {
    let mut f = fixture_with(stack(), |greeter| {
        greeter.set_hint("default-session", "wrong");
        greeter.set_hint("default-session", "xterm");
        greeter.set_hint("hide-users", "true");
    })?;

    f.client.send(&GreeterRequest::Connect { version: "1.0".to_owned() })?;
    let message = f.recv().await?;
    assert_eq!(
        message,
        ServerMessage::Connected {
            version: env!("CARGO_PKG_VERSION").to_owned(),
            hints: vec![
                ("default-session".to_owned(), "xterm".to_owned()),
                ("hide-users".to_owned(), "true".to_owned()),
            ],
        }
    );
    assert!(f.greeter.is_connected());
    assert_eq!(f.outcomes.last(), Some(&GreeterOutcome::Connected));
    Ok(())
}

#[tokio::test]
async fn password_conversation_round_trip() -> anyhow::Result<()> {
    let mut f = fixture()?;
    f.client
        .send(&GreeterRequest::Authenticate { sequence: 7, username: "alice".to_owned() })?;
    assert_eq!(
        f.recv().await?,
        ServerMessage::Prompt {
            sequence: 7,
            username: "alice".to_owned(),
            messages: vec![(1, "Password:".to_owned())],
        }
    );

    f.client
        .send(&GreeterRequest::ContinueAuthentication { secrets: vec!["s3cret".to_owned()] })?;
    assert_eq!(
        f.recv().await?,
        ServerMessage::EndAuthentication {
            sequence: 7,
            username: "alice".to_owned(),
            result: 0,
        }
    );
    assert!(f.greeter.is_authenticated());
    Ok(())
}

#[tokio::test]
async fn wrong_secret_count_cancels_the_authentication() -> anyhow::Result<()> {
    let mut f = fixture()?;
    f.client
        .send(&GreeterRequest::Authenticate { sequence: 2, username: "alice".to_owned() })?;
    let _prompt = f.recv().await?;

    f.client.send(&GreeterRequest::ContinueAuthentication {
        secrets: vec!["a".to_owned(), "b".to_owned()],
    })?;
    assert_eq!(
        f.recv().await?,
        ServerMessage::EndAuthentication {
            sequence: 2,
            username: "alice".to_owned(),
            result: code::CONV_ERR as u32,
        }
    );
    assert!(!f.greeter.is_authenticated());
    Ok(())
}

#[tokio::test]
async fn guest_authentication_is_immediate_when_allowed() -> anyhow::Result<()> {
    let mut f = fixture_with(stack(), |greeter| greeter.set_allow_guest(true))?;
    f.client.send(&GreeterRequest::AuthenticateAsGuest { sequence: 5 })?;
    assert_eq!(
        f.recv().await?,
        ServerMessage::EndAuthentication {
            sequence: 5,
            username: String::new(),
            result: 0,
        }
    );
    assert!(f.greeter.guest_authenticated());
    Ok(())
}

#[tokio::test]
async fn guest_authentication_is_rejected_when_disabled() -> anyhow::Result<()> {
    let mut f = fixture()?;
    f.client.send(&GreeterRequest::AuthenticateAsGuest { sequence: 5 })?;
    assert_eq!(
        f.recv().await?,
        ServerMessage::EndAuthentication {
            sequence: 5,
            username: String::new(),
            result: code::USER_UNKNOWN as u32,
        }
    );
    assert!(!f.greeter.guest_authenticated());
    Ok(())
}

#[tokio::test]
async fn start_session_requires_authorization() -> anyhow::Result<()> {
    let mut f = fixture()?;
    f.client.send(&GreeterRequest::StartSession { session: String::new() })?;
    assert_eq!(f.recv().await?, ServerMessage::SessionResult { result: 1 });
    assert!(!f.outcomes.iter().any(|o| matches!(o, GreeterOutcome::SessionRequested { .. })));
    Ok(())
}

#[tokio::test]
async fn start_session_after_guest_auth_passes_through() -> anyhow::Result<()> {
    let mut f = fixture_with(stack(), |greeter| greeter.set_allow_guest(true))?;
    f.client.send(&GreeterRequest::AuthenticateAsGuest { sequence: 1 })?;
    let _end = f.recv().await?;

    f.client.send(&GreeterRequest::StartSession { session: "xterm".to_owned() })?;
    for _ in 0..100 {
        if f.outcomes.iter().any(|o| matches!(o, GreeterOutcome::SessionRequested { .. })) {
            break;
        }
        f.pump_one().await;
    }
    assert!(f.outcomes.contains(&GreeterOutcome::SessionRequested {
        session: Some("xterm".to_owned())
    }));
    Ok(())
}

#[tokio::test]
async fn second_authenticate_cancels_the_first() -> anyhow::Result<()> {
    let mut f = fixture()?;
    f.client
        .send(&GreeterRequest::Authenticate { sequence: 1, username: "alice".to_owned() })?;
    let _prompt = f.recv().await?;

    f.client
        .send(&GreeterRequest::Authenticate { sequence: 2, username: "alice".to_owned() })?;
    // The replaced conversation gets its terminal frame first.
    assert_eq!(
        f.recv().await?,
        ServerMessage::EndAuthentication {
            sequence: 1,
            username: "alice".to_owned(),
            result: code::CONV_ERR as u32,
        }
    );
    assert_eq!(
        f.recv().await?,
        ServerMessage::Prompt {
            sequence: 2,
            username: "alice".to_owned(),
            messages: vec![(1, "Password:".to_owned())],
        }
    );

    f.client
        .send(&GreeterRequest::ContinueAuthentication { secrets: vec!["s3cret".to_owned()] })?;
    assert_eq!(
        f.recv().await?,
        ServerMessage::EndAuthentication {
            sequence: 2,
            username: "alice".to_owned(),
            result: 0,
        }
    );
    Ok(())
}

#[tokio::test]
async fn info_only_batches_are_answered_for_the_worker() -> anyhow::Result<()> {
    let stack = ScriptedAuthStack::new().user(
        "carol",
        ScriptedUser::password("pw").with_round(
            vec![crate::auth::AuthMessage::info("system maintenance at noon")],
            vec![],
        ),
    );
    let mut f = fixture_with(stack, |_| {})?;
    f.client
        .send(&GreeterRequest::Authenticate { sequence: 4, username: "carol".to_owned() })?;
    let _password_prompt = f.recv().await?;
    f.client
        .send(&GreeterRequest::ContinueAuthentication { secrets: vec!["pw".to_owned()] })?;

    // The info batch is displayed but needs no reply; authentication
    // completes without another CONTINUE.
    assert_eq!(
        f.recv().await?,
        ServerMessage::Prompt {
            sequence: 4,
            username: "carol".to_owned(),
            messages: vec![(4, "system maintenance at noon".to_owned())],
        }
    );
    assert_eq!(
        f.recv().await?,
        ServerMessage::EndAuthentication {
            sequence: 4,
            username: "carol".to_owned(),
            result: 0,
        }
    );
    Ok(())
}

#[tokio::test]
async fn set_language_requires_a_non_guest_user() -> anyhow::Result<()> {
    let mut f = fixture()?;
    f.client.send(&GreeterRequest::SetLanguage { language: "de_DE.UTF-8".to_owned() })?;
    // Not authenticated: ignored.
    f.client
        .send(&GreeterRequest::Authenticate { sequence: 1, username: "alice".to_owned() })?;
    let _prompt = f.recv().await?;
    f.client
        .send(&GreeterRequest::ContinueAuthentication { secrets: vec!["s3cret".to_owned()] })?;
    let _end = f.recv().await?;
    assert_eq!(f.greeter.language(), None);

    f.client.send(&GreeterRequest::SetLanguage { language: "de_DE.UTF-8".to_owned() })?;
    for _ in 0..100 {
        if f.greeter.language().is_some() {
            break;
        }
        f.pump_one().await;
    }
    assert_eq!(f.greeter.language(), Some("de_DE.UTF-8"));
    Ok(())
}

#[tokio::test]
async fn quit_acknowledges_and_closes_the_channel() -> anyhow::Result<()> {
    let mut f = fixture()?;
    f.greeter.quit();
    assert_eq!(f.recv().await?, ServerMessage::SessionResult { result: 0 });
    for _ in 0..100 {
        if f.client.disconnected() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    anyhow::bail!("channel still open after quit")
}

#[tokio::test]
async fn cancellation_mid_prompt_reports_conv_err() -> anyhow::Result<()> {
    let mut f = fixture()?;
    f.client
        .send(&GreeterRequest::Authenticate { sequence: 3, username: "alice".to_owned() })?;
    let _prompt = f.recv().await?;

    f.client.send(&GreeterRequest::CancelAuthentication)?;
    assert_eq!(
        f.recv().await?,
        ServerMessage::EndAuthentication {
            sequence: 3,
            username: "alice".to_owned(),
            result: code::CONV_ERR as u32,
        }
    );

    // A late CONTINUE for the dead conversation is ignored.
    f.client
        .send(&GreeterRequest::ContinueAuthentication { secrets: vec!["s3cret".to_owned()] })?;
    for _ in 0..10 {
        f.pump_one().await;
    }
    assert_eq!(f.client.poll(), None);
    Ok(())
}
