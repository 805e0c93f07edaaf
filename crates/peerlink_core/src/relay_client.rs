/*
 * SPDX-FileCopyrightText: 2026 Peerlink Contributors
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::session::PeerId;
use futures_util::{SinkExt, StreamExt};
use peerlink_protocol::{ClientFrame, ServerFrame, SignalPayload};
use rand::Rng;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tracing::{debug, info, warn};
use url::Url;

/// One outbound signaling message, addressed by relay endpoint id.
#[derive(Debug, Clone)]
pub struct OutboundSignal {
    pub to: PeerId,
    pub payload: SignalPayload,
}

/// What the adapter surfaces to the supervisor.
#[derive(Debug)]
pub enum RelayEvent {
    /// Connected (or reconnected); the relay assigned us a fresh id.
    Open { local_id: PeerId },
    /// Inbound signaling from one peer, in per-pair arrival order.
    Signal { from: PeerId, payload: SignalPayload },
    /// The relay connection dropped; reconnect attempts continue behind this.
    Down { reason: String },
}

/// Both ends of the adapter, as the supervisor sees them. Tests substitute an
/// in-memory pair; production uses [`spawn_websocket`].
pub struct RelayLink {
    pub inbound: mpsc::UnboundedReceiver<RelayEvent>,
    pub outbound: mpsc::UnboundedSender<OutboundSignal>,
}

/// Decode one relay text frame. Undecodable payloads surface as
/// `MalformedSignal` so callers can log them; they are never silently dropped.
pub fn decode_server_frame(text: &str) -> Result<ServerFrame, CoreError> {
    serde_json::from_str(text).map_err(|e| CoreError::MalformedSignal(e.to_string()))
}

/// Spawn the WebSocket adapter task: connect, perform the welcome handshake,
/// then pump frames both ways until the process ends. Reconnects forever with
/// capped backoff; sessions are someone else's problem (the supervisor applies
/// the outage timeout).
pub fn spawn_websocket(cfg: &CoreConfig) -> Result<RelayLink, CoreError> {
    let url = Url::parse(&cfg.relay_url)
        .map_err(|e| CoreError::RelayUnavailable(format!("bad relay url {}: {e}", cfg.relay_url)))?;
    let (event_tx, event_rx) = mpsc::unbounded_channel::<RelayEvent>();
    let (out_tx, out_rx) = mpsc::unbounded_channel::<OutboundSignal>();

    let keepalive = cfg.keepalive();
    let backoff_max = cfg.reconnect_backoff_max();
    tokio::spawn(run_adapter(url, event_tx, out_rx, keepalive, backoff_max));

    Ok(RelayLink {
        inbound: event_rx,
        outbound: out_tx,
    })
}

async fn run_adapter(
    url: Url,
    events: mpsc::UnboundedSender<RelayEvent>,
    mut out_rx: mpsc::UnboundedReceiver<OutboundSignal>,
    keepalive: Duration,
    backoff_max: Duration,
) {
    let mut backoff = Duration::from_millis(200);
    loop {
        match connect_once(&url, &events, &mut out_rx, keepalive).await {
            Ok(()) => {
                // Normal close; treat like any other drop and reconnect.
                backoff = Duration::from_millis(200);
            }
            Err(e) => {
                warn!(url = %url, "relay connection lost: {e:#}");
                if events
                    .send(RelayEvent::Down {
                        reason: e.to_string(),
                    })
                    .is_err()
                {
                    return;
                }
            }
        }
        if events.is_closed() {
            return;
        }
        sleep_with_jitter(backoff).await;
        backoff = backoff.saturating_mul(2).min(backoff_max);
    }
}

async fn connect_once(
    url: &Url,
    events: &mpsc::UnboundedSender<RelayEvent>,
    out_rx: &mut mpsc::UnboundedReceiver<OutboundSignal>,
    keepalive: Duration,
) -> anyhow::Result<()> {
    info!(%url, "connecting to relay");
    let (ws, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
    let (mut ws_tx, mut ws_rx) = ws.split();

    let mut ping = tokio::time::interval(keepalive);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ping.tick() => {
                ws_tx.send(tungstenite::Message::Ping(Vec::new())).await?;
            }
            out = out_rx.recv() => {
                let Some(signal) = out else {
                    // Supervisor is gone; close cleanly and stop for good.
                    let _ = ws_tx.send(tungstenite::Message::Close(None)).await;
                    anyhow::bail!("outbound channel closed");
                };
                let frame = ClientFrame::Signal {
                    to: signal.to.as_str().to_string(),
                    payload: signal.payload,
                };
                let json = serde_json::to_string(&frame)?;
                ws_tx.send(tungstenite::Message::Text(json)).await?;
            }
            msg = ws_rx.next() => {
                let Some(msg) = msg else { anyhow::bail!("relay stream ended") };
                let text = match msg? {
                    tungstenite::Message::Text(t) => t,
                    tungstenite::Message::Ping(p) => {
                        let _ = ws_tx.send(tungstenite::Message::Pong(p)).await;
                        continue;
                    }
                    tungstenite::Message::Close(_) => anyhow::bail!("relay closed the connection"),
                    _ => continue,
                };
                match decode_server_frame(&text) {
                    Ok(ServerFrame::Welcome { id }) => {
                        info!(peer = %id, "relay assigned endpoint id");
                        if events.send(RelayEvent::Open { local_id: PeerId::new(id) }).is_err() {
                            return Ok(());
                        }
                    }
                    Ok(ServerFrame::Signal { from, payload }) => {
                        debug!(from = %from, kind = payload.kind(), "inbound signal");
                        if events
                            .send(RelayEvent::Signal { from: PeerId::new(from), payload })
                            .is_err()
                        {
                            return Ok(());
                        }
                    }
                    Ok(ServerFrame::Error { message }) => {
                        warn!(%message, "relay reported delivery error");
                    }
                    Err(e) => {
                        // Malformed frames are surfaced and skipped, never fatal.
                        warn!("{e}");
                    }
                }
            }
        }
    }
}

async fn sleep_with_jitter(base: Duration) {
    let jitter_ms: u64 = rand::thread_rng().gen_range(0..=200);
    tokio::time::sleep(base + Duration::from_millis(jitter_ms)).await;
}
