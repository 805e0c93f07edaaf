/*
 * SPDX-FileCopyrightText: 2026 Peerlink Contributors
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::{Deserialize, Serialize};

/// Signaling payload exchanged between two endpoints through the relay.
///
/// The JSON shape is the fixed wire contract: `type` discriminates, SDP bodies
/// travel under `sdp`, candidates keep the browser-conventional
/// `sdpMLineIndex`/`sdpMid` names so non-Rust endpoints interoperate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalPayload {
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    Candidate {
        candidate: String,
        #[serde(rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
        sdp_mline_index: Option<u16>,
        #[serde(rename = "sdpMid", skip_serializing_if = "Option::is_none")]
        sdp_mid: Option<String>,
    },
}

impl SignalPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            SignalPayload::Offer { .. } => "offer",
            SignalPayload::Answer { .. } => "answer",
            SignalPayload::Candidate { .. } => "candidate",
        }
    }
}

/// Frames a client sends to the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Forward `payload` to the endpoint identified by `to`.
    Signal { to: String, payload: SignalPayload },
}

/// Frames the relay sends to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    /// First frame after connect: the relay-assigned endpoint id.
    Welcome { id: String },
    /// A payload forwarded from the endpoint identified by `from`.
    Signal { from: String, payload: SignalPayload },
    /// Relay-side delivery problem (unknown target, oversized frame, ...).
    Error { message: String },
}
