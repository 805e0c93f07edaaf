/*
 * SPDX-FileCopyrightText: 2026 Peerlink Contributors
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::config::CoreConfig;
use crate::engine::{EngineConnState, EngineEvent, EngineFactory, SessionEngine};
use crate::events::{ConnectionState, CoreEvent};
use crate::registry::SessionRegistry;
use crate::relay_client::OutboundSignal;
use crate::session::{
    Candidate, Descriptor, DescriptorKind, NegotiationState, PeerId, RemoteDecision, Role, Session,
};
use bytes::Bytes;
use peerlink_protocol::SignalPayload;
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

static HANDLE_SEQ: AtomicU64 = AtomicU64::new(1);

/// Everything a session reacts to. One queue per session keeps processing
/// strictly sequential; different sessions run fully in parallel.
#[derive(Debug)]
pub enum SessionInput {
    StartCall,
    RemoteDescriptor(Descriptor),
    RemoteCandidate(Candidate),
    SendData(Bytes),
    Close,
}

/// Routing entry for one session. Cloned into the registry; the worker owns
/// the actual state and engine.
#[derive(Clone)]
pub struct SessionHandle {
    seq: u64,
    tx: mpsc::UnboundedSender<SessionInput>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn send(&self, input: SessionInput) -> bool {
        self.tx.send(input).is_ok()
    }

    /// Marks the session closed immediately. A collaborator operation still in
    /// flight resolves into a no-op.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

pub fn spawn(
    local_id: PeerId,
    remote_id: PeerId,
    factory: Arc<dyn EngineFactory>,
    outbound: mpsc::UnboundedSender<OutboundSignal>,
    events: mpsc::UnboundedSender<CoreEvent>,
    registry: Arc<SessionRegistry>,
    cfg: CoreConfig,
) -> SessionHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let (engine_tx, engine_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let handle = SessionHandle {
        seq: HANDLE_SEQ.fetch_add(1, Ordering::Relaxed),
        tx,
        cancel: cancel.clone(),
    };

    let worker = Negotiator {
        session: Session::new(local_id, remote_id.clone()),
        factory,
        engine: None,
        engine_tx,
        outbound,
        events,
        cancel,
        cfg,
        grace_deadline: None,
        connect_deadline: None,
    };
    let seq = handle.seq;
    tokio::spawn(async move {
        worker.run(rx, engine_rx).await;
        registry.remove_if(&remote_id, seq).await;
    });
    handle
}

struct Negotiator {
    session: Session,
    factory: Arc<dyn EngineFactory>,
    engine: Option<Arc<dyn SessionEngine>>,
    engine_tx: mpsc::UnboundedSender<EngineEvent>,
    outbound: mpsc::UnboundedSender<OutboundSignal>,
    events: mpsc::UnboundedSender<CoreEvent>,
    cancel: CancellationToken,
    cfg: CoreConfig,
    grace_deadline: Option<Instant>,
    connect_deadline: Option<Instant>,
}

/// Await a collaborator operation unless the session gets closed first; a
/// close during the await discards the eventual result.
async fn with_cancel<T>(
    cancel: CancellationToken,
    fut: impl Future<Output = anyhow::Result<T>>,
) -> Option<anyhow::Result<T>> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        res = fut => Some(res),
    }
}

async fn sleep_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl Negotiator {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<SessionInput>,
        mut engine_rx: mpsc::UnboundedReceiver<EngineEvent>,
    ) {
        info!(peer = %self.session.remote_id(), "session worker started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.shutdown(ConnectionState::Closed).await;
                    break;
                }
                Some(input) = rx.recv() => {
                    if self.handle_input(input).await.is_break() {
                        break;
                    }
                }
                Some(ev) = engine_rx.recv() => {
                    if self.handle_engine_event(ev).await.is_break() {
                        break;
                    }
                }
                _ = sleep_opt(self.grace_deadline) => {
                    warn!(peer = %self.session.remote_id(), "transport did not recover within grace period");
                    self.shutdown(ConnectionState::Failed).await;
                    break;
                }
                _ = sleep_opt(self.connect_deadline) => {
                    warn!(peer = %self.session.remote_id(), "negotiation timed out");
                    self.shutdown(ConnectionState::Failed).await;
                    break;
                }
            }
        }
        info!(peer = %self.session.remote_id(), "session worker stopped");
    }

    fn emit(&self, event: CoreEvent) {
        let _ = self.events.send(event);
    }

    fn emit_state(&self, state: ConnectionState) {
        self.emit(CoreEvent::ConnectionState {
            peer: self.session.remote_id().clone(),
            state,
        });
    }

    fn send_signal(&self, payload: SignalPayload) {
        let _ = self.outbound.send(OutboundSignal {
            to: self.session.remote_id().clone(),
            payload,
        });
    }

    async fn ensure_engine(&mut self, initiator: bool) -> Option<anyhow::Result<Arc<dyn SessionEngine>>> {
        if let Some(engine) = &self.engine {
            return Some(Ok(engine.clone()));
        }
        let res = with_cancel(
            self.cancel.clone(),
            self.factory.create(initiator, self.engine_tx.clone()),
        )
        .await?;
        match res {
            Ok(engine) => {
                self.engine = Some(engine.clone());
                Some(Ok(engine))
            }
            Err(e) => Some(Err(e)),
        }
    }

    async fn handle_input(&mut self, input: SessionInput) -> ControlFlow<()> {
        if self.session.is_closed() {
            debug!(peer = %self.session.remote_id(), "dropping input for closed session");
            return ControlFlow::Continue(());
        }
        match input {
            SessionInput::StartCall => self.handle_start_call().await,
            SessionInput::RemoteDescriptor(desc) => self.handle_remote_descriptor(desc).await,
            SessionInput::RemoteCandidate(candidate) => self.handle_remote_candidate(candidate).await,
            SessionInput::SendData(data) => self.handle_send_data(data).await,
            SessionInput::Close => {
                self.shutdown(ConnectionState::Closed).await;
                ControlFlow::Break(())
            }
        }
    }

    async fn handle_start_call(&mut self) -> ControlFlow<()> {
        if let Err(e) = self.session.ensure_can_offer() {
            warn!(peer = %self.session.remote_id(), "start_call rejected: {e}");
            return ControlFlow::Continue(());
        }
        self.emit_state(ConnectionState::Connecting);

        let engine = match self.ensure_engine(true).await {
            None => return self.closed_mid_operation().await,
            Some(Err(e)) => {
                warn!(peer = %self.session.remote_id(), "engine setup failed: {e:#}");
                self.shutdown(ConnectionState::Failed).await;
                return ControlFlow::Break(());
            }
            Some(Ok(engine)) => engine,
        };

        let offer = match with_cancel(self.cancel.clone(), engine.create_offer()).await {
            None => return self.closed_mid_operation().await,
            Some(Err(e)) => {
                warn!(peer = %self.session.remote_id(), "create offer failed: {e:#}");
                self.shutdown(ConnectionState::Failed).await;
                return ControlFlow::Break(());
            }
            Some(Ok(offer)) => offer,
        };
        match with_cancel(self.cancel.clone(), engine.set_local_description(offer.clone())).await {
            None => return self.closed_mid_operation().await,
            Some(Err(e)) => {
                warn!(peer = %self.session.remote_id(), "apply local offer failed: {e:#}");
                self.shutdown(ConnectionState::Failed).await;
                return ControlFlow::Break(());
            }
            Some(Ok(())) => {}
        }
        if let Err(e) = self.session.note_local_offer() {
            warn!(peer = %self.session.remote_id(), "{e}");
            return ControlFlow::Continue(());
        }
        self.send_signal(SignalPayload::Offer { sdp: offer.sdp });
        self.connect_deadline = Some(Instant::now() + self.cfg.connect_timeout());
        ControlFlow::Continue(())
    }

    async fn handle_remote_descriptor(&mut self, desc: Descriptor) -> ControlFlow<()> {
        let decision = match self.session.decide_remote_descriptor(desc.kind) {
            Ok(d) => d,
            Err(e) => {
                // Kind/state mismatches are per-message conditions; the
                // session stays as it was.
                warn!(peer = %self.session.remote_id(), kind = desc.kind.as_str(), "{e}");
                return ControlFlow::Continue(());
            }
        };
        match decision {
            RemoteDecision::IgnoreOffer => {
                debug!(peer = %self.session.remote_id(), "glare: ignoring inbound offer, our id sorts higher");
                ControlFlow::Continue(())
            }
            RemoteDecision::ApplyOfferAfterRollback => {
                info!(peer = %self.session.remote_id(), "glare: discarding local offer, our id sorts lower");
                if let Err(e) = self.session.rollback_local_offer() {
                    warn!(peer = %self.session.remote_id(), "{e}");
                    return ControlFlow::Continue(());
                }
                // The discarded offer lives in the old engine; start over with
                // a fresh one for the answerer path.
                if let Some(old) = self.engine.take() {
                    tokio::spawn(async move {
                        let _ = old.close().await;
                    });
                }
                self.apply_remote_offer(desc).await
            }
            RemoteDecision::ApplyOffer => self.apply_remote_offer(desc).await,
            RemoteDecision::ApplyAnswer => self.apply_remote_answer(desc).await,
        }
    }

    async fn apply_remote_offer(&mut self, desc: Descriptor) -> ControlFlow<()> {
        let engine = match self.ensure_engine(false).await {
            None => return self.closed_mid_operation().await,
            Some(Err(e)) => {
                warn!(peer = %self.session.remote_id(), "engine setup failed: {e:#}");
                self.shutdown(ConnectionState::Failed).await;
                return ControlFlow::Break(());
            }
            Some(Ok(engine)) => engine,
        };
        match with_cancel(self.cancel.clone(), engine.set_remote_description(desc)).await {
            None => return self.closed_mid_operation().await,
            Some(Err(e)) => {
                warn!(peer = %self.session.remote_id(), "apply remote offer failed: {e:#}");
                self.shutdown(ConnectionState::Failed).await;
                return ControlFlow::Break(());
            }
            Some(Ok(())) => {}
        }
        if let Err(e) = self.session.note_remote_applied(DescriptorKind::Offer) {
            warn!(peer = %self.session.remote_id(), "{e}");
            return ControlFlow::Continue(());
        }
        if self.session.role() == Role::Answerer {
            self.emit(CoreEvent::IncomingCall {
                peer: self.session.remote_id().clone(),
            });
            self.emit_state(ConnectionState::Connecting);
        }
        if self.flush_candidates(&engine).await.is_none() {
            return self.closed_mid_operation().await;
        }

        // Default policy: answer inbound offers right away, like the
        // prototype UI did.
        if let Err(e) = self.session.ensure_can_answer() {
            warn!(peer = %self.session.remote_id(), "{e}");
            return ControlFlow::Continue(());
        }
        let answer = match with_cancel(self.cancel.clone(), engine.create_answer()).await {
            None => return self.closed_mid_operation().await,
            Some(Err(e)) => {
                warn!(peer = %self.session.remote_id(), "create answer failed: {e:#}");
                self.shutdown(ConnectionState::Failed).await;
                return ControlFlow::Break(());
            }
            Some(Ok(answer)) => answer,
        };
        match with_cancel(self.cancel.clone(), engine.set_local_description(answer.clone())).await {
            None => return self.closed_mid_operation().await,
            Some(Err(e)) => {
                warn!(peer = %self.session.remote_id(), "apply local answer failed: {e:#}");
                self.shutdown(ConnectionState::Failed).await;
                return ControlFlow::Break(());
            }
            Some(Ok(())) => {}
        }
        if let Err(e) = self.session.note_local_answer() {
            warn!(peer = %self.session.remote_id(), "{e}");
            return ControlFlow::Continue(());
        }
        self.send_signal(SignalPayload::Answer { sdp: answer.sdp });
        self.connect_deadline = Some(Instant::now() + self.cfg.connect_timeout());
        ControlFlow::Continue(())
    }

    async fn apply_remote_answer(&mut self, desc: Descriptor) -> ControlFlow<()> {
        let Some(engine) = self.engine.clone() else {
            warn!(peer = %self.session.remote_id(), "answer arrived without an engine");
            return ControlFlow::Continue(());
        };
        match with_cancel(self.cancel.clone(), engine.set_remote_description(desc)).await {
            None => return self.closed_mid_operation().await,
            Some(Err(e)) => {
                warn!(peer = %self.session.remote_id(), "apply remote answer failed: {e:#}");
                self.shutdown(ConnectionState::Failed).await;
                return ControlFlow::Break(());
            }
            Some(Ok(())) => {}
        }
        if let Err(e) = self.session.note_remote_applied(DescriptorKind::Answer) {
            warn!(peer = %self.session.remote_id(), "{e}");
            return ControlFlow::Continue(());
        }
        if self.flush_candidates(&engine).await.is_none() {
            return self.closed_mid_operation().await;
        }
        ControlFlow::Continue(())
    }

    /// Submit buffered candidates in arrival order. Individual rejections are
    /// recoverable and do not stop the rest of the flush. Returns `None` only
    /// when the session got closed mid-flush.
    async fn flush_candidates(&mut self, engine: &Arc<dyn SessionEngine>) -> Option<()> {
        let buffered = self.session.drain_pending_candidates();
        if buffered.is_empty() {
            return Some(());
        }
        debug!(peer = %self.session.remote_id(), count = buffered.len(), "flushing buffered candidates");
        for candidate in buffered {
            match with_cancel(self.cancel.clone(), engine.add_candidate(candidate)).await {
                None => return None,
                Some(Err(e)) => {
                    warn!(peer = %self.session.remote_id(), "candidate rejected (recoverable): {e:#}");
                }
                Some(Ok(())) => {}
            }
        }
        Some(())
    }

    async fn handle_remote_candidate(&mut self, candidate: Candidate) -> ControlFlow<()> {
        let Some(candidate) = self.session.route_candidate(candidate) else {
            debug!(peer = %self.session.remote_id(), buffered = self.session.pending_candidates(), "buffered early candidate");
            return ControlFlow::Continue(());
        };
        let Some(engine) = self.engine.clone() else {
            warn!(peer = %self.session.remote_id(), "candidate arrived without an engine");
            return ControlFlow::Continue(());
        };
        match with_cancel(self.cancel.clone(), engine.add_candidate(candidate)).await {
            None => self.closed_mid_operation().await,
            Some(Err(e)) => {
                warn!(peer = %self.session.remote_id(), "candidate rejected (recoverable): {e:#}");
                ControlFlow::Continue(())
            }
            Some(Ok(())) => ControlFlow::Continue(()),
        }
    }

    async fn handle_send_data(&mut self, data: Bytes) -> ControlFlow<()> {
        let Some(engine) = self.engine.clone() else {
            warn!(peer = %self.session.remote_id(), "send_data before session established");
            return ControlFlow::Continue(());
        };
        match with_cancel(self.cancel.clone(), engine.send_data(data)).await {
            None => self.closed_mid_operation().await,
            Some(Err(e)) => {
                warn!(peer = %self.session.remote_id(), "send_data failed (recoverable): {e:#}");
                ControlFlow::Continue(())
            }
            Some(Ok(())) => ControlFlow::Continue(()),
        }
    }

    async fn handle_engine_event(&mut self, ev: EngineEvent) -> ControlFlow<()> {
        if self.session.is_closed() {
            return ControlFlow::Continue(());
        }
        match ev {
            EngineEvent::CandidateDiscovered(candidate) => {
                self.send_signal(SignalPayload::Candidate {
                    candidate: candidate.candidate,
                    sdp_mline_index: candidate.sdp_mline_index,
                    sdp_mid: candidate.sdp_mid,
                });
                ControlFlow::Continue(())
            }
            EngineEvent::ConnectionStateChanged(state) => self.handle_engine_state(state).await,
            EngineEvent::DataChannelOpen => {
                debug!(peer = %self.session.remote_id(), "data channel open");
                ControlFlow::Continue(())
            }
            EngineEvent::DataReceived(data) => {
                self.emit(CoreEvent::DataReceived {
                    peer: self.session.remote_id().clone(),
                    data,
                });
                ControlFlow::Continue(())
            }
            EngineEvent::InboundTrack { kind, id } => {
                self.emit(CoreEvent::RemoteMediaAvailable {
                    peer: self.session.remote_id().clone(),
                    kind,
                    track_id: id,
                });
                ControlFlow::Continue(())
            }
        }
    }

    async fn handle_engine_state(&mut self, state: EngineConnState) -> ControlFlow<()> {
        match state {
            EngineConnState::Connected => {
                self.connect_deadline = None;
                self.grace_deadline = None;
                if self.session.state() == NegotiationState::Disconnected {
                    if let Err(e) = self.session.mark_recovered() {
                        warn!(peer = %self.session.remote_id(), "{e}");
                    } else {
                        info!(peer = %self.session.remote_id(), "transport recovered");
                    }
                }
                self.emit_state(ConnectionState::Connected);
                ControlFlow::Continue(())
            }
            EngineConnState::Disconnected | EngineConnState::Failed => {
                // Transient until the grace period says otherwise.
                self.grace_deadline = Some(Instant::now() + self.cfg.disconnect_grace());
                if self.session.state() == NegotiationState::Connected {
                    if let Err(e) = self.session.mark_disconnected() {
                        warn!(peer = %self.session.remote_id(), "{e}");
                    }
                    self.emit_state(ConnectionState::Disconnected);
                }
                ControlFlow::Continue(())
            }
            EngineConnState::Closed => {
                info!(peer = %self.session.remote_id(), "engine reported terminal close");
                self.shutdown(ConnectionState::Closed).await;
                ControlFlow::Break(())
            }
            EngineConnState::New | EngineConnState::Connecting => ControlFlow::Continue(()),
        }
    }

    /// The cancel token fired while a collaborator call was in flight; the
    /// result has already been discarded. Finish closing and stop the worker.
    async fn closed_mid_operation(&mut self) -> ControlFlow<()> {
        self.shutdown(ConnectionState::Closed).await;
        ControlFlow::Break(())
    }

    async fn shutdown(&mut self, state: ConnectionState) {
        if self.session.close() {
            if state == ConnectionState::Failed {
                self.emit_state(ConnectionState::Failed);
            }
            self.emit_state(ConnectionState::Closed);
            if let Some(engine) = self.engine.take() {
                // Best-effort; an in-flight engine op completing after this
                // point is a no-op for the closed session.
                tokio::spawn(async move {
                    let _ = engine.close().await;
                });
            }
        }
        self.cancel.cancel();
    }
}
