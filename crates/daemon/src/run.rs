// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level daemon runner — shared by `main` and integration tests.
//!
//! One supervisor loop owns the display manager and every seat, display,
//! greeter, and authentication session under it. All asynchronous sources
//! post into a single event channel; the loop drains it until the manager
//! reports stopped or a termination signal arrives.

use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::auth::StaticUserStack;
use crate::config::Config;
use crate::event::EventSender;
use crate::manager::DisplayManager;
use crate::seat::{DisabledGuestAccount, Seat, SeatDefaults, SeatDeps};
use crate::session::ProcessLauncher;

/// Initialize the tracing subscriber from the config.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    } else {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
}

/// Run the daemon to completion. Returns the process exit code.
pub async fn run(config: Config) -> anyhow::Result<i32> {
    init_tracing(&config);

    let privileged = !config.test_mode && nix::unistd::getuid().is_root();
    info!(privileged, "starting doorman");

    // The host authentication binding is injected behind `AuthStack`; the
    // in-tree stack is the static test-mode user table.
    let auth_stack = Arc::new(match &config.passwd_file {
        Some(path) => StaticUserStack::load(path)?,
        None => StaticUserStack::new(),
    });

    let (events, mut event_rx) = EventSender::channel();
    let deps = SeatDeps {
        events,
        auth_stack,
        launcher: Arc::new(ProcessLauncher::new(privileged)),
        guest: Arc::new(DisabledGuestAccount),
        privileged,
        display_ids: Arc::new(AtomicU32::new(0)),
        defaults: SeatDefaults {
            greeter_session: config.greeter_session.clone(),
            user_session: config.user_session.clone(),
            greeter_user: config.greeter_user.clone(),
        },
    };

    let mut manager = DisplayManager::new();
    for (index, definition) in config.load_seats()?.into_iter().enumerate() {
        let name = definition.name.unwrap_or_else(|| format!("seat{index}"));
        let seat = Seat::new(name.as_str(), definition.kind.as_str(), definition.properties, deps.clone())
            .map_err(|e| anyhow::anyhow!("seat {name}: {e}"))?;
        if !manager.add_seat(seat) {
            anyhow::bail!("seat {name} failed to start");
        }
    }

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone())?;

    loop {
        tokio::select! {
            event = event_rx.recv() => {
                match event {
                    Some(event) => manager.handle_event(event),
                    None => {
                        warn!("event channel closed");
                        break;
                    }
                }
            }
            _ = shutdown.cancelled(), if !manager.is_stopping() => {
                info!("shutdown requested");
                manager.stop();
            }
        }
        if manager.is_stopped() {
            break;
        }
    }

    Ok(if manager.has_failed() { 1 } else { 0 })
}

/// Cancel the token on SIGTERM or SIGINT.
fn spawn_signal_listener(shutdown: CancellationToken) -> anyhow::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("received SIGINT, shutting down"),
        }
        shutdown.cancel();
    });
    Ok(())
}
