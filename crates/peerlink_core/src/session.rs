/*
 * SPDX-FileCopyrightText: 2026 Peerlink Contributors
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::error::CoreError;
use tracing::debug;

/// Relay-assigned endpoint identifier. Opaque, stable for the lifetime of one
/// relay connection, never persisted.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        PeerId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        PeerId(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    Offer,
    Answer,
}

impl DescriptorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DescriptorKind::Offer => "offer",
            DescriptorKind::Answer => "answer",
        }
    }
}

/// Opaque negotiation payload. Immutable once created; replaced, never mutated.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub kind: DescriptorKind,
    pub sdp: String,
}

/// Opaque path-discovery fragment bound to exactly one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub candidate: String,
    pub sdp_mline_index: Option<u16>,
    pub sdp_mid: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Unknown,
    Offerer,
    Answerer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    HaveLocalOffer,
    HaveRemoteOffer,
    Connected,
    Disconnected,
    Closed,
}

/// What to do with an inbound descriptor, decided before any engine call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteDecision {
    ApplyOffer,
    ApplyAnswer,
    /// Glare, and this side sorts lower: discard the local offer, restart the
    /// engine, then accept the inbound offer as if fresh.
    ApplyOfferAfterRollback,
    /// Glare, and this side sorts higher: drop the inbound offer and keep
    /// waiting for the answer.
    IgnoreOffer,
}

fn is_edge(from: NegotiationState, to: NegotiationState) -> bool {
    use NegotiationState::*;
    match (from, to) {
        (Idle, HaveLocalOffer) => true,
        (Idle, HaveRemoteOffer) => true,
        (HaveLocalOffer, Connected) => true,
        (HaveRemoteOffer, Connected) => true,
        // Glare rollback re-enters Idle.
        (HaveLocalOffer, Idle) => true,
        (Connected, Disconnected) => true,
        (Disconnected, Connected) => true,
        (_, Closed) => from != Closed,
        _ => false,
    }
}

/// Per-peer-pair negotiation state. Owned by exactly one negotiator worker;
/// the registry only holds a routing entry for it.
pub struct Session {
    local_id: PeerId,
    remote_id: PeerId,
    role: Role,
    state: NegotiationState,
    remote_applied: bool,
    pending_candidates: Vec<Candidate>,
}

impl Session {
    pub fn new(local_id: PeerId, remote_id: PeerId) -> Self {
        Session {
            local_id,
            remote_id,
            role: Role::Unknown,
            state: NegotiationState::Idle,
            remote_applied: false,
            pending_candidates: Vec::new(),
        }
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    pub fn remote_id(&self) -> &PeerId {
        &self.remote_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == NegotiationState::Closed
    }

    pub fn remote_applied(&self) -> bool {
        self.remote_applied
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    fn transition(&mut self, to: NegotiationState) -> Result<(), CoreError> {
        if !is_edge(self.state, to) {
            return Err(CoreError::InvalidTransition(format!(
                "{:?} -> {:?} (peer {})",
                self.state, to, self.remote_id
            )));
        }
        debug!(peer = %self.remote_id, from = ?self.state, to = ?to, "negotiation transition");
        self.state = to;
        Ok(())
    }

    /// Legality gate for `create_local_offer`.
    pub fn ensure_can_offer(&self) -> Result<(), CoreError> {
        if self.state != NegotiationState::Idle {
            return Err(CoreError::InvalidTransition(format!(
                "create_local_offer in {:?} (peer {})",
                self.state, self.remote_id
            )));
        }
        Ok(())
    }

    /// Called after the engine accepted the freshly synthesized local offer.
    /// Fixes the role on first use.
    pub fn note_local_offer(&mut self) -> Result<(), CoreError> {
        self.ensure_can_offer()?;
        self.transition(NegotiationState::HaveLocalOffer)?;
        if self.role == Role::Unknown {
            self.role = Role::Offerer;
        }
        Ok(())
    }

    /// Legality gate for `create_local_answer`: an answer can only be built
    /// on top of an applied remote offer.
    pub fn ensure_can_answer(&self) -> Result<(), CoreError> {
        if self.state != NegotiationState::HaveRemoteOffer {
            return Err(CoreError::ProtocolViolation(format!(
                "create_local_answer in {:?} (peer {})",
                self.state, self.remote_id
            )));
        }
        Ok(())
    }

    pub fn note_local_answer(&mut self) -> Result<(), CoreError> {
        self.ensure_can_answer()?;
        self.transition(NegotiationState::Connected)
    }

    /// Validate an inbound descriptor against the current state without
    /// mutating anything. Mismatches fail with `ProtocolViolation`; glare on
    /// an inbound offer is resolved deterministically by identifier order.
    pub fn decide_remote_descriptor(&self, kind: DescriptorKind) -> Result<RemoteDecision, CoreError> {
        match kind {
            DescriptorKind::Answer => {
                if self.role == Role::Offerer && self.state == NegotiationState::HaveLocalOffer {
                    Ok(RemoteDecision::ApplyAnswer)
                } else {
                    Err(CoreError::ProtocolViolation(format!(
                        "answer in {:?} as {:?} (peer {})",
                        self.state, self.role, self.remote_id
                    )))
                }
            }
            DescriptorKind::Offer => match self.state {
                NegotiationState::Idle => Ok(RemoteDecision::ApplyOffer),
                NegotiationState::HaveLocalOffer => {
                    // Both sides offered at once. The total order on ids picks
                    // the single surviving offer; equal ids mean we are being
                    // signaled by ourselves.
                    if self.local_id == self.remote_id {
                        Err(CoreError::InvalidTransition(format!(
                            "glare between identical ids ({})",
                            self.local_id
                        )))
                    } else if self.local_id < self.remote_id {
                        Ok(RemoteDecision::ApplyOfferAfterRollback)
                    } else {
                        Ok(RemoteDecision::IgnoreOffer)
                    }
                }
                _ => Err(CoreError::ProtocolViolation(format!(
                    "offer in {:?} (peer {})",
                    self.state, self.remote_id
                ))),
            },
        }
    }

    /// Discard the local offer after losing a glare race. The session returns
    /// to `Idle` with an unknown role and an untouched candidate buffer, ready
    /// to take the inbound offer as if fresh.
    pub fn rollback_local_offer(&mut self) -> Result<(), CoreError> {
        if self.state != NegotiationState::HaveLocalOffer {
            return Err(CoreError::InvalidTransition(format!(
                "rollback in {:?} (peer {})",
                self.state, self.remote_id
            )));
        }
        self.transition(NegotiationState::Idle)?;
        self.role = Role::Unknown;
        Ok(())
    }

    /// Called after the engine accepted the inbound descriptor.
    pub fn note_remote_applied(&mut self, kind: DescriptorKind) -> Result<(), CoreError> {
        match kind {
            DescriptorKind::Offer => {
                self.transition(NegotiationState::HaveRemoteOffer)?;
                if self.role == Role::Unknown {
                    self.role = Role::Answerer;
                }
            }
            DescriptorKind::Answer => {
                self.transition(NegotiationState::Connected)?;
            }
        }
        self.remote_applied = true;
        Ok(())
    }

    /// Buffer a remote candidate, or hand it back for immediate submission
    /// once the remote descriptor is in place.
    pub fn route_candidate(&mut self, candidate: Candidate) -> Option<Candidate> {
        if self.remote_applied {
            Some(candidate)
        } else {
            self.pending_candidates.push(candidate);
            None
        }
    }

    /// Drain the buffer in arrival order. Runs once, right after the remote
    /// descriptor applies.
    pub fn drain_pending_candidates(&mut self) -> Vec<Candidate> {
        std::mem::take(&mut self.pending_candidates)
    }

    /// Transport loss reported by the engine.
    pub fn mark_disconnected(&mut self) -> Result<(), CoreError> {
        self.transition(NegotiationState::Disconnected)
    }

    /// Transport recovered within the grace period.
    pub fn mark_recovered(&mut self) -> Result<(), CoreError> {
        self.transition(NegotiationState::Connected)
    }

    /// Terminal. Returns false when the session was already closed, so the
    /// closed edge fires at most once.
    pub fn close(&mut self) -> bool {
        if self.state == NegotiationState::Closed {
            return false;
        }
        self.state = NegotiationState::Closed;
        true
    }
}
