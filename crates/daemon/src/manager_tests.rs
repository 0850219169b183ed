// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use tokio::sync::mpsc::UnboundedReceiver;

use super::*;
use crate::event::{DisplayId, EventSender};
use crate::error::Result;
use crate::seat::{SeatDefaults, SeatDeps};
use crate::test_support::{FakeGuestAccount, FakeLauncher, ScriptedAuthStack};

struct Fixture {
    manager: DisplayManager,
    rx: UnboundedReceiver<CoreEvent>,
    deps: SeatDeps,
}

fn fixture() -> Fixture {
    let (events, rx) = EventSender::channel();
    let deps = SeatDeps {
        events,
        auth_stack: Arc::new(ScriptedAuthStack::new()),
        launcher: Arc::new(FakeLauncher::new()),
        guest: Arc::new(FakeGuestAccount::new()),
        privileged: false,
        display_ids: Arc::new(AtomicU32::new(0)),
        defaults: SeatDefaults {
            greeter_session: "/usr/bin/test-greeter".to_owned(),
            user_session: "/usr/bin/test-session".to_owned(),
            greeter_user: "greeter".to_owned(),
        },
    };
    Fixture { manager: DisplayManager::new(), rx, deps }
}

fn seat(deps: &SeatDeps, name: &str, properties: &[(&str, &str)]) -> Result<Seat> {
    let mut map = IndexMap::new();
    for (key, value) in properties {
        map.insert((*key).to_owned(), (*value).to_owned());
    }
    Seat::new(name, "local", map, deps.clone())
}

impl Fixture {
    async fn settle(&mut self) {
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(150), self.rx.recv()).await
        {
            self.manager.handle_event(event);
        }
    }
}

#[tokio::test]
async fn seats_are_added_and_stopped() -> anyhow::Result<()> {
    let mut f = fixture();
    assert!(f.manager.add_seat(seat(&f.deps, "seat0", &[])?));
    assert!(f.manager.add_seat(seat(&f.deps, "seat1", &[])?));
    assert_eq!(f.manager.seats().len(), 2);
    f.settle().await;

    f.manager.stop();
    f.settle().await;
    assert!(f.manager.is_stopped());
    assert!(!f.manager.has_failed());
    assert!(f.manager.seats().is_empty());
    Ok(())
}

#[tokio::test]
async fn stopped_waits_for_every_seat() -> anyhow::Result<()> {
    let mut f = fixture();
    assert!(f.manager.add_seat(seat(&f.deps, "seat0", &[])?));
    f.settle().await;

    // Greeter processes are still winding down; the manager is not stopped
    // until their exits are processed.
    f.manager.stop();
    if !f.manager.is_stopped() {
        f.settle().await;
    }
    assert!(f.manager.is_stopped());
    Ok(())
}

#[tokio::test]
async fn required_seat_stopping_fails_the_manager() -> anyhow::Result<()> {
    let mut f = fixture();
    assert!(f.manager.add_seat(seat(&f.deps, "seat0", &[("exit-on-failure", "true")])?));
    assert!(f.manager.add_seat(seat(&f.deps, "seat1", &[])?));
    f.settle().await;

    f.manager.remove_seat("seat0");
    f.settle().await;
    assert!(f.manager.has_failed());
    assert!(f.manager.is_stopped());
    assert!(f.manager.seats().is_empty());
    Ok(())
}

#[tokio::test]
async fn events_for_unknown_displays_are_dropped() {
    let mut f = fixture();
    f.manager.handle_event(CoreEvent::ServerReady { display: DisplayId(999) });
    assert!(!f.manager.is_stopped());
}

#[tokio::test]
async fn removing_an_ordinary_seat_does_not_fail_the_manager() -> anyhow::Result<()> {
    let mut f = fixture();
    assert!(f.manager.add_seat(seat(&f.deps, "seat0", &[])?));
    assert!(f.manager.add_seat(seat(&f.deps, "seat1", &[])?));
    f.settle().await;

    f.manager.remove_seat("seat1");
    f.settle().await;
    assert!(!f.manager.has_failed());
    assert!(!f.manager.is_stopped());
    assert_eq!(f.manager.seats().len(), 1);
    Ok(())
}
