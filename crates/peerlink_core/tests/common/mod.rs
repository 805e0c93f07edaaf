#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use peerlink_core::config::CoreConfig;
use peerlink_core::engine::{EngineConnState, EngineEvent, EngineFactory, SessionEngine};
use peerlink_core::events::CoreEvent;
use peerlink_core::negotiator::{self, SessionHandle};
use peerlink_core::registry::SessionRegistry;
use peerlink_core::relay_client::{OutboundSignal, RelayEvent, RelayLink};
use peerlink_core::session::{Candidate, Descriptor, DescriptorKind, PeerId};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Behavior knobs for one scripted engine.
#[derive(Clone, Default)]
pub struct EngineScript {
    /// Stall `create_answer` to leave a window for close-during-in-flight.
    pub answer_delay: Option<Duration>,
    /// Reject a candidate that was already submitted, like a real engine.
    pub reject_duplicate_candidates: bool,
    /// Report transport connectivity once the answer is applied on this side.
    pub connect_after_answer: bool,
    /// Loop sent data back as a received-data event (stands in for the far
    /// side echoing).
    pub echo_data: bool,
}

/// Recording fake for the transport-engine collaborator.
pub struct MockEngine {
    label: String,
    script: EngineScript,
    events: mpsc::UnboundedSender<EngineEvent>,
    ops: Mutex<Vec<String>>,
    accepted_candidates: Mutex<Vec<Candidate>>,
    seen_candidates: Mutex<HashSet<String>>,
}

impl MockEngine {
    fn record(&self, op: impl Into<String>) {
        self.ops.lock().unwrap().push(op.into());
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    pub fn accepted_candidates(&self) -> Vec<Candidate> {
        self.accepted_candidates.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionEngine for MockEngine {
    async fn create_offer(&self) -> Result<Descriptor> {
        self.record("create_offer");
        Ok(Descriptor {
            kind: DescriptorKind::Offer,
            sdp: format!("offer-from-{}", self.label),
        })
    }

    async fn create_answer(&self) -> Result<Descriptor> {
        if let Some(delay) = self.script.answer_delay {
            tokio::time::sleep(delay).await;
        }
        self.record("create_answer");
        Ok(Descriptor {
            kind: DescriptorKind::Answer,
            sdp: format!("answer-from-{}", self.label),
        })
    }

    async fn set_local_description(&self, desc: Descriptor) -> Result<()> {
        self.record(format!("set_local:{}", desc.kind.as_str()));
        if desc.kind == DescriptorKind::Answer && self.script.connect_after_answer {
            let _ = self
                .events
                .send(EngineEvent::ConnectionStateChanged(EngineConnState::Connected));
        }
        Ok(())
    }

    async fn set_remote_description(&self, desc: Descriptor) -> Result<()> {
        self.record(format!("set_remote:{}", desc.kind.as_str()));
        if desc.kind == DescriptorKind::Answer && self.script.connect_after_answer {
            let _ = self
                .events
                .send(EngineEvent::ConnectionStateChanged(EngineConnState::Connected));
        }
        Ok(())
    }

    async fn add_candidate(&self, candidate: Candidate) -> Result<()> {
        if self.script.reject_duplicate_candidates
            && !self
                .seen_candidates
                .lock()
                .unwrap()
                .insert(candidate.candidate.clone())
        {
            return Err(anyhow!("duplicate candidate {}", candidate.candidate));
        }
        self.record(format!("add_candidate:{}", candidate.candidate));
        self.accepted_candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn send_data(&self, data: Bytes) -> Result<()> {
        self.record(format!("send_data:{}", data.len()));
        if self.script.echo_data {
            let _ = self.events.send(EngineEvent::DataReceived(data));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record("close");
        Ok(())
    }
}

pub struct MockEngineFactory {
    label: String,
    script: EngineScript,
    engines: Mutex<Vec<Arc<MockEngine>>>,
}

impl MockEngineFactory {
    pub fn new(label: &str, script: EngineScript) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            script,
            engines: Mutex::new(Vec::new()),
        })
    }

    pub fn engines(&self) -> Vec<Arc<MockEngine>> {
        self.engines.lock().unwrap().clone()
    }

    /// The engine most recently handed to a session.
    pub fn last_engine(&self) -> Option<Arc<MockEngine>> {
        self.engines.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl EngineFactory for MockEngineFactory {
    async fn create(
        &self,
        initiator: bool,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<Arc<dyn SessionEngine>> {
        let engine = Arc::new(MockEngine {
            label: format!(
                "{}-{}",
                self.label,
                if initiator { "offerer" } else { "answerer" }
            ),
            script: self.script.clone(),
            events,
            ops: Mutex::new(Vec::new()),
            accepted_candidates: Mutex::new(Vec::new()),
            seen_candidates: Mutex::new(HashSet::new()),
        });
        self.engines.lock().unwrap().push(engine.clone());
        Ok(engine)
    }
}

/// One session worker wired straight to channels, no relay or supervisor in
/// between. Inputs go in through `handle`, signaling comes out of
/// `outbound_rx`, application events out of `events_rx`.
pub struct SessionHarness {
    pub handle: SessionHandle,
    pub outbound_rx: mpsc::UnboundedReceiver<OutboundSignal>,
    pub events_rx: mpsc::UnboundedReceiver<CoreEvent>,
    pub factory: Arc<MockEngineFactory>,
    pub registry: Arc<SessionRegistry>,
}

pub fn spawn_session(local: &str, remote: &str, script: EngineScript) -> SessionHarness {
    let factory = MockEngineFactory::new(local, script);
    let registry = Arc::new(SessionRegistry::new());
    let (out_tx, outbound_rx) = mpsc::unbounded_channel();
    let (event_tx, events_rx) = mpsc::unbounded_channel();
    let handle = negotiator::spawn(
        PeerId::from(local),
        PeerId::from(remote),
        factory.clone(),
        out_tx,
        event_tx,
        registry.clone(),
        test_config(),
    );
    SessionHarness {
        handle,
        outbound_rx,
        events_rx,
        factory,
        registry,
    }
}

pub fn test_config() -> CoreConfig {
    CoreConfig {
        relay_url: "ws://127.0.0.1:1/unused".to_string(),
        connect_timeout_secs: Some(10),
        disconnect_grace_secs: Some(1),
        relay_outage_timeout_secs: Some(1),
        ..CoreConfig::default()
    }
}

/// One side of an in-memory relay: the link to hand to `connect_over` plus an
/// injector for relay-level events (outages, extra signals).
pub struct MemPeer {
    pub link: RelayLink,
    pub inject: mpsc::UnboundedSender<RelayEvent>,
}

/// Channel-backed stand-in for the relay bus: two endpoints with fixed ids,
/// per-pair ordered delivery. With `gated`, signal forwarding is held back
/// until the returned gate is released, which makes glare windows
/// deterministic. Welcomes are delivered immediately either way.
pub fn mem_pair(a_id: &str, b_id: &str, gated: bool) -> (MemPeer, MemPeer, Option<oneshot::Sender<()>>) {
    let (a_in_tx, a_in_rx) = mpsc::unbounded_channel::<RelayEvent>();
    let (b_in_tx, b_in_rx) = mpsc::unbounded_channel::<RelayEvent>();
    let (a_out_tx, mut a_out_rx) = mpsc::unbounded_channel::<OutboundSignal>();
    let (b_out_tx, mut b_out_rx) = mpsc::unbounded_channel::<OutboundSignal>();

    let _ = a_in_tx.send(RelayEvent::Open {
        local_id: PeerId::from(a_id),
    });
    let _ = b_in_tx.send(RelayEvent::Open {
        local_id: PeerId::from(b_id),
    });

    let (gate_tx, gate_rx) = oneshot::channel::<()>();
    let router = {
        let a_id = a_id.to_string();
        let b_id = b_id.to_string();
        let a_in_tx = a_in_tx.clone();
        let b_in_tx = b_in_tx.clone();
        async move {
            if gated {
                let _ = gate_rx.await;
            }
            loop {
                tokio::select! {
                    out = a_out_rx.recv() => {
                        let Some(signal) = out else { break };
                        if signal.to.as_str() == b_id {
                            let _ = b_in_tx.send(RelayEvent::Signal {
                                from: PeerId::new(a_id.clone()),
                                payload: signal.payload,
                            });
                        }
                    }
                    out = b_out_rx.recv() => {
                        let Some(signal) = out else { break };
                        if signal.to.as_str() == a_id {
                            let _ = a_in_tx.send(RelayEvent::Signal {
                                from: PeerId::new(b_id.clone()),
                                payload: signal.payload,
                            });
                        }
                    }
                }
            }
        }
    };
    tokio::spawn(router);

    (
        MemPeer {
            link: RelayLink {
                inbound: a_in_rx,
                outbound: a_out_tx,
            },
            inject: a_in_tx,
        },
        MemPeer {
            link: RelayLink {
                inbound: b_in_rx,
                outbound: b_out_tx,
            },
            inject: b_in_tx,
        },
        gated.then_some(gate_tx),
    )
}

/// Next event or panic; scenario tests should never wait forever.
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<CoreEvent>) -> CoreEvent {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream ended")
}

/// Skip events until the given peer reaches the given state.
pub async fn wait_for_state(
    rx: &mut mpsc::UnboundedReceiver<CoreEvent>,
    peer: &PeerId,
    state: peerlink_core::ConnectionState,
) {
    loop {
        match next_event(rx).await {
            CoreEvent::ConnectionState { peer: p, state: s } if &p == peer && s == state => return,
            _ => {}
        }
    }
}

/// Drain whatever is immediately available.
pub fn drain_events(rx: &mut mpsc::UnboundedReceiver<CoreEvent>) -> Vec<CoreEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

pub fn candidate(n: u32) -> Candidate {
    Candidate {
        candidate: format!("candidate:{n} 1 udp 2130706431 192.0.2.{n} 54321 typ host"),
        sdp_mline_index: Some(0),
        sdp_mid: Some("0".to_string()),
    }
}

pub fn offer(from: &str) -> Descriptor {
    Descriptor {
        kind: DescriptorKind::Offer,
        sdp: format!("offer-from-{from}"),
    }
}

pub fn answer(from: &str) -> Descriptor {
    Descriptor {
        kind: DescriptorKind::Answer,
        sdp: format!("answer-from-{from}"),
    }
}
