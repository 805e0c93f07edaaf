/*
 * SPDX-FileCopyrightText: 2026 Peerlink Contributors
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use peerlink_core::events::CoreEvent;
use peerlink_core::{ConnectionState, CoreConfig, PeerClient, PeerId};
use tracing::info;

/// Dev peer: connect to a relay, print our id, optionally call a target and
/// exchange a greeting over the data channel.
///
/// PEERLINK_RELAY_WS  relay url (default ws://127.0.0.1:9090/ws)
/// PEERLINK_CALL      peer id to call once connected (optional)
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap()),
        )
        .init();

    let relay_url = std::env::var("PEERLINK_RELAY_WS")
        .unwrap_or_else(|_| "ws://127.0.0.1:9090/ws".to_string());
    let call_target = std::env::var("PEERLINK_CALL").ok().filter(|s| !s.is_empty());

    let cfg = CoreConfig {
        relay_url,
        ..CoreConfig::default()
    };
    let (client, mut events) = PeerClient::connect(cfg).await?;
    let local_id = client.local_id().expect("id assigned after connect");
    info!(peer = %local_id, "connected; share this id with the other side");

    if let Some(target) = call_target {
        info!(target = %target, "calling");
        client.start_call(PeerId::new(target)).await?;
    }

    while let Some(event) = events.recv().await {
        match event {
            CoreEvent::Open { local_id } => info!(peer = %local_id, "relay id (re)assigned"),
            CoreEvent::IncomingCall { peer } => info!(peer = %peer, "incoming call, answering"),
            CoreEvent::ConnectionState { peer, state } => {
                info!(peer = %peer, state = ?state, "connection state");
                if state == ConnectionState::Connected {
                    let greeting = format!("hello from {local_id}");
                    client.send_data(peer, greeting.into_bytes()).await?;
                }
            }
            CoreEvent::DataReceived { peer, data } => {
                info!(peer = %peer, "data: {}", String::from_utf8_lossy(&data));
            }
            CoreEvent::RemoteMediaAvailable { peer, kind, track_id } => {
                info!(peer = %peer, kind = %kind, track = %track_id, "remote media available");
            }
        }
    }
    Ok(())
}
