/*
 * SPDX-FileCopyrightText: 2026 Peerlink Contributors
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::session::{Candidate, Descriptor};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Transport-engine connection states, pre-mapping to the app-visible enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineConnState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Asynchronous notifications from the engine collaborator. Delivered over a
/// channel so the per-session worker consumes them in its own event order.
#[derive(Debug)]
pub enum EngineEvent {
    CandidateDiscovered(Candidate),
    ConnectionStateChanged(EngineConnState),
    DataChannelOpen,
    DataReceived(Bytes),
    InboundTrack { kind: String, id: String },
}

/// The network-path/media/data transport engine, owned by one session.
/// Everything here is potentially slow and fallible; callers decide severity.
#[async_trait]
pub trait SessionEngine: Send + Sync {
    async fn create_offer(&self) -> Result<Descriptor>;
    async fn create_answer(&self) -> Result<Descriptor>;
    async fn set_local_description(&self, desc: Descriptor) -> Result<()>;
    async fn set_remote_description(&self, desc: Descriptor) -> Result<()>;
    async fn add_candidate(&self, candidate: Candidate) -> Result<()>;
    async fn send_data(&self, data: Bytes) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// Builds one engine per session. `initiator` is true for the side that
/// creates the data channel.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(
        &self,
        initiator: bool,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<Arc<dyn SessionEngine>>;
}
