// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end login scenarios over the greeter wire protocol.

use std::fs;
use std::os::unix::fs::PermissionsExt;

use doorman::auth::code;
use doorman::protocol::{GreeterRequest, ServerMessage};
use doorman::session::SessionKind;
use doorman::test_support::{GreeterClient, SeatHarness};
use doorman_specs::{scenario_seat, ALICE_PASSWORD};

async fn connected_greeter(
    harness: &mut SeatHarness,
) -> anyhow::Result<(GreeterClient, Vec<(String, String)>)> {
    harness
        .pump_until("greeter launch", |h| h.launcher.count(SessionKind::Greeter) == 1)
        .await?;
    let mut client = harness.greeter_client()?;
    client.send(&GreeterRequest::Connect { version: "1.0".to_owned() })?;
    match harness.recv_from_server(&mut client).await? {
        ServerMessage::Connected { hints, .. } => Ok((client, hints)),
        other => anyhow::bail!("expected CONNECTED, got {other:?}"),
    }
}

// -- S1: successful password login -------------------------------------------

#[tokio::test]
async fn successful_password_login() -> anyhow::Result<()> {
    let mut harness = scenario_seat()
        .property("greeter-show-manual-login", "true")
        .build()?;
    assert!(harness.start());
    let (mut client, hints) = connected_greeter(&mut harness).await?;
    assert!(hints.contains(&("show-manual-login".to_owned(), "true".to_owned())));
    assert!(hints.contains(&("default-session".to_owned(), "/usr/bin/test-session".to_owned())));

    client.send(&GreeterRequest::Authenticate { sequence: 7, username: "alice".to_owned() })?;
    assert_eq!(
        harness.recv_from_server(&mut client).await?,
        ServerMessage::Prompt {
            sequence: 7,
            username: "alice".to_owned(),
            messages: vec![(1, "Password:".to_owned())],
        }
    );

    client.send(&GreeterRequest::ContinueAuthentication {
        secrets: vec![ALICE_PASSWORD.to_owned()],
    })?;
    assert_eq!(
        harness.recv_from_server(&mut client).await?,
        ServerMessage::EndAuthentication {
            sequence: 7,
            username: "alice".to_owned(),
            result: 0,
        }
    );

    client.send(&GreeterRequest::StartSession { session: String::new() })?;
    assert_eq!(
        harness.recv_from_server(&mut client).await?,
        ServerMessage::SessionResult { result: 0 }
    );
    harness.wait_for_eof(&mut client).await?;

    harness
        .pump_until("user session", |h| h.launcher.count(SessionKind::User) == 1)
        .await?;
    let launch = harness
        .launcher
        .last(SessionKind::User)
        .ok_or_else(|| anyhow::anyhow!("no session launch"))?;
    assert_eq!(launch.username.as_deref(), Some("alice"));
    assert_eq!(launch.command, vec!["/usr/bin/test-session".to_owned()]);
    assert!(launch.env.contains(&("USER".to_owned(), "alice".to_owned())));
    assert!(harness.launcher.last_stopped(SessionKind::Greeter));

    harness.settle().await;
    assert!(harness.seat.displays().iter().any(|d| d.username() == Some("alice")));
    Ok(())
}

// -- S2: wrong password -------------------------------------------------------

#[tokio::test]
async fn wrong_password_then_retry() -> anyhow::Result<()> {
    let mut harness = scenario_seat().build()?;
    assert!(harness.start());
    let (mut client, _hints) = connected_greeter(&mut harness).await?;

    client.send(&GreeterRequest::Authenticate { sequence: 7, username: "alice".to_owned() })?;
    let _prompt = harness.recv_from_server(&mut client).await?;
    client.send(&GreeterRequest::ContinueAuthentication { secrets: vec!["wrong".to_owned()] })?;
    assert_eq!(
        harness.recv_from_server(&mut client).await?,
        ServerMessage::EndAuthentication {
            sequence: 7,
            username: "alice".to_owned(),
            result: code::AUTH_ERR as u32,
        }
    );

    // Retry with a fresh sequence number; nothing is left to cancel.
    client.send(&GreeterRequest::Authenticate { sequence: 8, username: "alice".to_owned() })?;
    assert_eq!(
        harness.recv_from_server(&mut client).await?,
        ServerMessage::Prompt {
            sequence: 8,
            username: "alice".to_owned(),
            messages: vec![(1, "Password:".to_owned())],
        }
    );
    client.send(&GreeterRequest::ContinueAuthentication {
        secrets: vec![ALICE_PASSWORD.to_owned()],
    })?;
    assert_eq!(
        harness.recv_from_server(&mut client).await?,
        ServerMessage::EndAuthentication {
            sequence: 8,
            username: "alice".to_owned(),
            result: 0,
        }
    );
    Ok(())
}

// -- S3: cancellation mid-prompt ----------------------------------------------

#[tokio::test]
async fn cancellation_mid_prompt() -> anyhow::Result<()> {
    let mut harness = scenario_seat().build()?;
    assert!(harness.start());
    let (mut client, _hints) = connected_greeter(&mut harness).await?;

    client.send(&GreeterRequest::Authenticate { sequence: 3, username: "alice".to_owned() })?;
    let _prompt = harness.recv_from_server(&mut client).await?;

    client.send(&GreeterRequest::CancelAuthentication)?;
    assert_eq!(
        harness.recv_from_server(&mut client).await?,
        ServerMessage::EndAuthentication {
            sequence: 3,
            username: "alice".to_owned(),
            result: code::CONV_ERR as u32,
        }
    );

    // A late CONTINUE for the cancelled conversation is ignored.
    client.send(&GreeterRequest::ContinueAuthentication {
        secrets: vec![ALICE_PASSWORD.to_owned()],
    })?;
    harness.settle().await;
    assert_eq!(client.poll(), None);
    assert_eq!(harness.launcher.count(SessionKind::User), 0);
    Ok(())
}

// -- S4: two-factor conversation ----------------------------------------------

#[tokio::test]
async fn two_factor_login_keeps_the_sequence() -> anyhow::Result<()> {
    let mut harness = scenario_seat().build()?;
    assert!(harness.start());
    let (mut client, _hints) = connected_greeter(&mut harness).await?;

    client
        .send(&GreeterRequest::Authenticate { sequence: 9, username: "two-factor".to_owned() })?;
    assert_eq!(
        harness.recv_from_server(&mut client).await?,
        ServerMessage::Prompt {
            sequence: 9,
            username: "two-factor".to_owned(),
            messages: vec![(1, "Password:".to_owned())],
        }
    );
    client.send(&GreeterRequest::ContinueAuthentication {
        secrets: vec![ALICE_PASSWORD.to_owned()],
    })?;

    // The second factor arrives under the same sequence number.
    assert_eq!(
        harness.recv_from_server(&mut client).await?,
        ServerMessage::Prompt {
            sequence: 9,
            username: "two-factor".to_owned(),
            messages: vec![(2, "OTP:".to_owned())],
        }
    );
    client.send(&GreeterRequest::ContinueAuthentication { secrets: vec!["otp".to_owned()] })?;
    assert_eq!(
        harness.recv_from_server(&mut client).await?,
        ServerMessage::EndAuthentication {
            sequence: 9,
            username: "two-factor".to_owned(),
            result: 0,
        }
    );
    Ok(())
}

// -- S5: guest switch ---------------------------------------------------------

#[tokio::test]
async fn guest_switch_creates_then_reuses_a_display() -> anyhow::Result<()> {
    let mut harness = scenario_seat().property("allow-guest", "true").build()?;
    assert!(harness.start());
    harness
        .pump_until("greeter launch", |h| h.launcher.count(SessionKind::Greeter) == 1)
        .await?;

    let (switched, _) = harness.seat.switch_to_guest(None);
    assert!(switched);
    harness
        .pump_until("guest session", |h| h.launcher.count(SessionKind::User) == 1)
        .await?;
    harness.settle().await;

    assert_eq!(harness.seat.guest_username(), Some("guest-001"));
    let launch = harness
        .launcher
        .last(SessionKind::User)
        .ok_or_else(|| anyhow::anyhow!("no session launch"))?;
    assert_eq!(launch.username.as_deref(), Some("guest-001"));

    // The second switch re-activates the existing guest display.
    let displays_before = harness.seat.displays().len();
    let (switched, _) = harness.seat.switch_to_guest(None);
    assert!(switched);
    harness.settle().await;
    assert_eq!(harness.seat.displays().len(), displays_before);
    assert_eq!(harness.launcher.count(SessionKind::User), 1);
    Ok(())
}

// -- S6: hook rejection -------------------------------------------------------

#[tokio::test]
async fn session_setup_hook_rejection_blocks_the_login() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let hook = dir.path().join("block.sh");
    fs::write(&hook, "#!/bin/sh\nexit 1\n")?;
    fs::set_permissions(&hook, fs::Permissions::from_mode(0o755))?;

    let mut harness = scenario_seat()
        .privileged()
        .property("session-setup-script", hook.to_string_lossy())
        .build()?;
    assert!(harness.start());
    let (mut client, _hints) = connected_greeter(&mut harness).await?;

    client.send(&GreeterRequest::Authenticate { sequence: 1, username: "alice".to_owned() })?;
    let _prompt = harness.recv_from_server(&mut client).await?;
    client.send(&GreeterRequest::ContinueAuthentication {
        secrets: vec![ALICE_PASSWORD.to_owned()],
    })?;
    assert_eq!(
        harness.recv_from_server(&mut client).await?,
        ServerMessage::EndAuthentication {
            sequence: 1,
            username: "alice".to_owned(),
            result: 0,
        }
    );

    // The hook fails after authentication and before the session: the
    // display stops without starting anything.
    client.send(&GreeterRequest::StartSession { session: String::new() })?;
    harness.wait_for_eof(&mut client).await?;
    harness.settle().await;
    assert_eq!(harness.launcher.count(SessionKind::User), 0);
    assert!(harness.seat.displays().is_empty());
    Ok(())
}

// -- Protocol violations ------------------------------------------------------

#[tokio::test]
async fn oversized_frame_terminates_the_greeter() -> anyhow::Result<()> {
    let mut harness = scenario_seat().build()?;
    assert!(harness.start());
    let (mut client, _hints) = connected_greeter(&mut harness).await?;

    // Header announcing a payload beyond the 1024-octet cap.
    let mut frame = Vec::new();
    frame.extend_from_slice(&1u32.to_be_bytes());
    frame.extend_from_slice(&4096u32.to_be_bytes());
    client.send_raw(&frame)?;

    harness.wait_for_eof(&mut client).await?;
    harness.settle().await;
    assert!(harness.seat.displays().is_empty());
    Ok(())
}

#[tokio::test]
async fn unknown_message_id_terminates_the_greeter() -> anyhow::Result<()> {
    let mut harness = scenario_seat().build()?;
    assert!(harness.start());
    let (mut client, _hints) = connected_greeter(&mut harness).await?;

    let mut frame = Vec::new();
    frame.extend_from_slice(&99u32.to_be_bytes());
    frame.extend_from_slice(&0u32.to_be_bytes());
    client.send_raw(&frame)?;

    harness.wait_for_eof(&mut client).await?;
    harness.settle().await;
    assert!(harness.seat.displays().is_empty());
    Ok(())
}
