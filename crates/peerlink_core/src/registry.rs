/*
 * SPDX-FileCopyrightText: 2026 Peerlink Contributors
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::negotiator::SessionHandle;
use crate::session::PeerId;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Non-owning lookup of live sessions, keyed by remote endpoint id (the local
/// id is fixed per client). Engine handles stay inside each worker; this map
/// only routes.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<HashMap<PeerId, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lookup(&self, remote_id: &PeerId) -> Option<SessionHandle> {
        self.inner.lock().await.get(remote_id).cloned()
    }

    /// Return the live session for the pair, or create one via `make`.
    /// Entries whose worker already closed are replaced, not returned.
    pub async fn lookup_or_create(
        &self,
        remote_id: &PeerId,
        make: impl FnOnce() -> SessionHandle,
    ) -> SessionHandle {
        let mut guard = self.inner.lock().await;
        if let Some(existing) = guard.get(remote_id) {
            if !existing.is_closed() {
                return existing.clone();
            }
            debug!(peer = %remote_id, "replacing closed session entry");
        }
        let handle = make();
        guard.insert(remote_id.clone(), handle.clone());
        info!(peer = %remote_id, sessions = guard.len(), "session registered");
        handle
    }

    /// Release the entry on terminal close, but only if it still belongs to
    /// the worker that is exiting (a successor session may have replaced it).
    pub async fn remove_if(&self, remote_id: &PeerId, seq: u64) {
        let mut guard = self.inner.lock().await;
        if guard.get(remote_id).map(|h| h.seq()) == Some(seq) {
            guard.remove(remote_id);
            info!(peer = %remote_id, sessions = guard.len(), "session released");
        }
    }

    /// Close every live session (relay outage timeout, client shutdown).
    pub async fn close_all(&self) {
        let guard = self.inner.lock().await;
        for (peer, handle) in guard.iter() {
            debug!(peer = %peer, "closing session");
            handle.close();
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}
