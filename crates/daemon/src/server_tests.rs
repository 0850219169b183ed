// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::event::{CoreEvent, DisplayId, EventSender};

#[tokio::test]
async fn static_server_reports_ready_on_start() -> anyhow::Result<()> {
    let (events, mut rx) = EventSender::channel();
    let mut server = StaticDisplayServer::new(Some(":0".to_owned()));
    assert!(!server.is_ready());

    server.start(DisplayId(4), &events)?;
    assert!(server.is_ready());
    assert_eq!(server.address().as_deref(), Some(":0"));

    match rx.recv().await {
        Some(CoreEvent::ServerReady { display }) => assert_eq!(display, DisplayId(4)),
        other => anyhow::bail!("expected ServerReady, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn static_server_reports_stopped_once() -> anyhow::Result<()> {
    let (events, mut rx) = EventSender::channel();
    let mut server = StaticDisplayServer::new(None);
    server.start(DisplayId(1), &events)?;
    let _ = rx.recv().await;

    server.stop(DisplayId(1), &events);
    server.stop(DisplayId(1), &events);
    match rx.recv().await {
        Some(CoreEvent::ServerStopped { display }) => assert_eq!(display, DisplayId(1)),
        other => anyhow::bail!("expected ServerStopped, got {other:?}"),
    }
    assert!(rx.try_recv().is_err());
    assert!(!server.is_ready());
    Ok(())
}
