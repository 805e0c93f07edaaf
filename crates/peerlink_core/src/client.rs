/*
 * SPDX-FileCopyrightText: 2026 Peerlink Contributors
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::config::CoreConfig;
use crate::engine::EngineFactory;
use crate::error::CoreError;
use crate::events::CoreEvent;
use crate::negotiator::{self, SessionInput};
use crate::registry::SessionRegistry;
use crate::relay_client::{self, OutboundSignal, RelayEvent, RelayLink};
use crate::session::{Descriptor, DescriptorKind, PeerId};
use crate::webrtc_engine::WebrtcEngineFactory;
use bytes::Bytes;
use peerlink_protocol::SignalPayload;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

enum Command {
    StartCall {
        remote: PeerId,
        resp: oneshot::Sender<Result<(), CoreError>>,
    },
    EndCall {
        remote: PeerId,
    },
    SendData {
        remote: PeerId,
        data: Bytes,
        resp: oneshot::Sender<Result<(), CoreError>>,
    },
}

/// Application handle. Cheap to clone; dropping the last clone shuts the
/// client down and closes every session.
#[derive(Clone)]
pub struct PeerClient {
    cmd_tx: mpsc::UnboundedSender<Command>,
    local_id: watch::Receiver<Option<PeerId>>,
}

impl PeerClient {
    /// Connect to the relay with the production engine and wait for the
    /// relay-assigned endpoint id.
    pub async fn connect(
        cfg: CoreConfig,
    ) -> Result<(PeerClient, mpsc::UnboundedReceiver<CoreEvent>), CoreError> {
        let factory = Arc::new(WebrtcEngineFactory::new(cfg.ice_servers()));
        let link = relay_client::spawn_websocket(&cfg)?;
        Self::connect_over(cfg, link, factory).await
    }

    /// Same wiring over a caller-supplied relay link and engine factory.
    /// This is the seam the scenario tests (and embedders with their own
    /// transports) plug into.
    pub async fn connect_over(
        cfg: CoreConfig,
        link: RelayLink,
        factory: Arc<dyn EngineFactory>,
    ) -> Result<(PeerClient, mpsc::UnboundedReceiver<CoreEvent>), CoreError> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (local_id_tx, local_id_rx) = watch::channel(None);

        let supervisor = Supervisor {
            cfg: cfg.clone(),
            factory,
            registry: Arc::new(SessionRegistry::new()),
            out_tx: link.outbound,
            events: event_tx,
            local_id: None,
            local_id_tx,
            outage_deadline: None,
        };
        tokio::spawn(supervisor.run(link.inbound, cmd_rx));

        let client = PeerClient {
            cmd_tx,
            local_id: local_id_rx,
        };
        client.wait_open(cfg.connect_timeout()).await?;
        Ok((client, event_rx))
    }

    async fn wait_open(&self, timeout: std::time::Duration) -> Result<(), CoreError> {
        let mut rx = self.local_id.clone();
        let deadline = Instant::now() + timeout;
        while rx.borrow().is_none() {
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(CoreError::RelayUnavailable("client stopped".to_string()));
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(CoreError::RelayUnavailable(
                        "timed out waiting for relay welcome".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// The relay-assigned endpoint id, once the relay has said welcome.
    pub fn local_id(&self) -> Option<PeerId> {
        self.local_id.borrow().clone()
    }

    /// Open (or re-drive) a session towards `remote` as the offerer.
    pub async fn start_call(&self, remote: PeerId) -> Result<(), CoreError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::StartCall {
                remote,
                resp: resp_tx,
            })
            .map_err(|_| CoreError::RelayUnavailable("client stopped".to_string()))?;
        resp_rx
            .await
            .map_err(|_| CoreError::RelayUnavailable("client stopped".to_string()))?
    }

    /// Close the session towards `remote` immediately. Signaling that arrives
    /// for the pair afterwards is dropped.
    pub fn end_call(&self, remote: PeerId) -> Result<(), CoreError> {
        self.cmd_tx
            .send(Command::EndCall { remote })
            .map_err(|_| CoreError::RelayUnavailable("client stopped".to_string()))
    }

    /// Send bytes over the session's data channel.
    pub async fn send_data(&self, remote: PeerId, data: impl Into<Bytes>) -> Result<(), CoreError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::SendData {
                remote,
                data: data.into(),
                resp: resp_tx,
            })
            .map_err(|_| CoreError::RelayUnavailable("client stopped".to_string()))?;
        resp_rx
            .await
            .map_err(|_| CoreError::RelayUnavailable("client stopped".to_string()))?
    }
}

struct Supervisor {
    cfg: CoreConfig,
    factory: Arc<dyn EngineFactory>,
    registry: Arc<SessionRegistry>,
    out_tx: mpsc::UnboundedSender<OutboundSignal>,
    events: mpsc::UnboundedSender<CoreEvent>,
    local_id: Option<PeerId>,
    local_id_tx: watch::Sender<Option<PeerId>>,
    outage_deadline: Option<Instant>,
}

async fn sleep_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl Supervisor {
    async fn run(
        mut self,
        mut inbound: mpsc::UnboundedReceiver<RelayEvent>,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    ) {
        loop {
            tokio::select! {
                Some(ev) = inbound.recv() => self.handle_relay_event(ev).await,
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        // Last client handle dropped.
                        None => break,
                    }
                }
                _ = sleep_opt(self.outage_deadline) => {
                    warn!("relay outage exceeded the configured timeout, closing all sessions");
                    self.outage_deadline = None;
                    self.registry.close_all().await;
                }
            }
        }
        self.registry.close_all().await;
        info!("peer client stopped");
    }

    async fn handle_relay_event(&mut self, ev: RelayEvent) {
        match ev {
            RelayEvent::Open { local_id } => {
                // A reconnect hands out a fresh id; in-progress sessions keep
                // running on the engine and are not torn down here.
                info!(peer = %local_id, "relay open");
                self.outage_deadline = None;
                self.local_id = Some(local_id.clone());
                let _ = self.local_id_tx.send(Some(local_id.clone()));
                let _ = self.events.send(CoreEvent::Open { local_id });
            }
            RelayEvent::Down { reason } => {
                warn!(%reason, "relay down, sessions preserved pending reconnect");
                if self.outage_deadline.is_none() {
                    self.outage_deadline =
                        Some(Instant::now() + self.cfg.relay_outage_timeout());
                }
            }
            RelayEvent::Signal { from, payload } => self.route_signal(from, payload).await,
        }
    }

    async fn route_signal(&mut self, from: PeerId, payload: SignalPayload) {
        let Some(local_id) = self.local_id.clone() else {
            warn!(from = %from, "signal before relay welcome, dropped");
            return;
        };
        match payload {
            SignalPayload::Offer { sdp } => {
                // First inbound offer from an unknown peer creates the
                // session lazily, as the answerer.
                let handle = self
                    .registry
                    .lookup_or_create(&from, || {
                        negotiator::spawn(
                            local_id.clone(),
                            from.clone(),
                            self.factory.clone(),
                            self.out_tx.clone(),
                            self.events.clone(),
                            self.registry.clone(),
                            self.cfg.clone(),
                        )
                    })
                    .await;
                handle.send(SessionInput::RemoteDescriptor(Descriptor {
                    kind: DescriptorKind::Offer,
                    sdp,
                }));
            }
            SignalPayload::Answer { sdp } => match self.registry.lookup(&from).await {
                Some(handle) => {
                    handle.send(SessionInput::RemoteDescriptor(Descriptor {
                        kind: DescriptorKind::Answer,
                        sdp,
                    }));
                }
                None => warn!(from = %from, "answer for unknown session, dropped"),
            },
            SignalPayload::Candidate {
                candidate,
                sdp_mline_index,
                sdp_mid,
            } => match self.registry.lookup(&from).await {
                Some(handle) => {
                    handle.send(SessionInput::RemoteCandidate(crate::session::Candidate {
                        candidate,
                        sdp_mline_index,
                        sdp_mid,
                    }));
                }
                None => debug!(from = %from, "candidate for unknown session, dropped"),
            },
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::StartCall { remote, resp } => {
                let Some(local_id) = self.local_id.clone() else {
                    let _ = resp.send(Err(CoreError::RelayUnavailable(
                        "not connected to the relay".to_string(),
                    )));
                    return;
                };
                if local_id == remote {
                    let _ = resp.send(Err(CoreError::InvalidTransition(format!(
                        "cannot call own id {local_id}"
                    ))));
                    return;
                }
                let handle = self
                    .registry
                    .lookup_or_create(&remote, || {
                        negotiator::spawn(
                            local_id.clone(),
                            remote.clone(),
                            self.factory.clone(),
                            self.out_tx.clone(),
                            self.events.clone(),
                            self.registry.clone(),
                            self.cfg.clone(),
                        )
                    })
                    .await;
                handle.send(SessionInput::StartCall);
                let _ = resp.send(Ok(()));
            }
            Command::EndCall { remote } => match self.registry.lookup(&remote).await {
                // Cancel, not queue: the session must reject late events the
                // moment the application hangs up.
                Some(handle) => handle.close(),
                None => debug!(peer = %remote, "end_call for unknown session"),
            },
            Command::SendData { remote, data, resp } => {
                match self.registry.lookup(&remote).await {
                    Some(handle) => {
                        handle.send(SessionInput::SendData(data));
                        let _ = resp.send(Ok(()));
                    }
                    None => {
                        let _ = resp.send(Err(CoreError::InvalidTransition(format!(
                            "no session for peer {remote}"
                        ))));
                    }
                }
            }
        }
    }
}
