/*
 * SPDX-FileCopyrightText: 2026 Peerlink Contributors
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use peerlink_protocol::{ClientFrame, ServerFrame};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

/// Development relay: assigns each WebSocket peer an opaque id and forwards
/// signal frames by target id. Ordered per connection, no persistence, no
/// auth — the bus the negotiation core assumes, nothing more.
#[derive(Clone, Default)]
struct AppState {
    peers: Arc<RwLock<HashMap<String, mpsc::Sender<Message>>>>,
}

fn random_id() -> String {
    let mut b = [0u8; 8];
    use rand::RngCore as _;
    rand::rngs::OsRng.fill_bytes(&mut b);
    b.iter().map(|v| format!("{v:02x}")).collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap()),
        )
        .init();

    let bind = std::env::var("PEERLINK_RELAY_BIND").unwrap_or_else(|_| "127.0.0.1:9090".to_string());
    let state = AppState::default();

    let app = Router::new()
        .route("/ws", get(relay_ws))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state);

    let addr: SocketAddr = bind.parse()?;
    info!(%addr, "relay listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

async fn relay_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_peer(state, socket))
}

async fn handle_peer(state: AppState, socket: WebSocket) {
    let id = random_id();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(64);

    let welcome = ServerFrame::Welcome { id: id.clone() };
    let Ok(welcome) = serde_json::to_string(&welcome) else {
        return;
    };
    if ws_tx.send(Message::Text(welcome)).await.is_err() {
        return;
    }
    state.peers.write().await.insert(id.clone(), tx);
    info!(peer = %id, "peer connected");

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_rx.next().await {
        let Message::Text(text) = msg else { continue };
        let frame: ClientFrame = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                warn!(peer = %id, "bad client frame: {e}");
                send_error(&state, &id, format!("bad frame: {e}")).await;
                continue;
            }
        };
        let ClientFrame::Signal { to, payload } = frame;
        let target = { state.peers.read().await.get(&to).cloned() };
        let delivered = match target {
            Some(target_tx) => {
                let forward = ServerFrame::Signal {
                    from: id.clone(),
                    payload,
                };
                match serde_json::to_string(&forward) {
                    Ok(json) => target_tx.send(Message::Text(json)).await.is_ok(),
                    Err(_) => false,
                }
            }
            None => false,
        };
        if !delivered {
            warn!(peer = %id, target = %to, "undeliverable signal");
            send_error(&state, &id, format!("peer {to} not connected")).await;
        }
    }

    state.peers.write().await.remove(&id);
    writer.abort();
    info!(peer = %id, "peer disconnected");
}

async fn send_error(state: &AppState, to: &str, message: String) {
    let Some(tx) = state.peers.read().await.get(to).cloned() else {
        return;
    };
    if let Ok(json) = serde_json::to_string(&ServerFrame::Error { message }) {
        let _ = tx.send(Message::Text(json)).await;
    }
}
