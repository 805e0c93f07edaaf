/*
 * SPDX-FileCopyrightText: 2026 Peerlink Contributors
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::session::PeerId;
use bytes::Bytes;

/// Coarse per-peer connection state surfaced to the application. Granular
/// protocol errors stay in the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// The relay accepted the connection and assigned our endpoint id.
    Open { local_id: PeerId },
    /// An inbound offer opened a session; it is being answered.
    IncomingCall { peer: PeerId },
    ConnectionState {
        peer: PeerId,
        state: ConnectionState,
    },
    DataReceived { peer: PeerId, data: Bytes },
    /// The engine exposed an inbound media track.
    RemoteMediaAvailable {
        peer: PeerId,
        kind: String,
        track_id: String,
    },
}
