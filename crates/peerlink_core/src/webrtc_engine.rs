/*
 * SPDX-FileCopyrightText: 2026 Peerlink Contributors
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::config::IceServerConfig;
use crate::engine::{EngineConnState, EngineEvent, EngineFactory, SessionEngine};
use crate::session::{Candidate, Descriptor, DescriptorKind};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

const DATA_CHANNEL_LABEL: &str = "peerlink-data";

/// Production engine over the `webrtc` crate. One peer connection per session.
pub struct WebrtcEngine {
    pc: Arc<RTCPeerConnection>,
    // Slot filled on create (initiator) or on_data_channel (answerer).
    dc: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
}

pub struct WebrtcEngineFactory {
    ice_servers: Vec<IceServerConfig>,
}

impl WebrtcEngineFactory {
    pub fn new(ice_servers: Vec<IceServerConfig>) -> Self {
        Self { ice_servers }
    }
}

fn build_ice_servers(servers: &[IceServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|s| RTCIceServer {
            urls: s.urls.clone(),
            username: s.username.clone().unwrap_or_default(),
            credential: s.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

fn map_state(st: RTCPeerConnectionState) -> EngineConnState {
    match st {
        RTCPeerConnectionState::Connecting => EngineConnState::Connecting,
        RTCPeerConnectionState::Connected => EngineConnState::Connected,
        RTCPeerConnectionState::Disconnected => EngineConnState::Disconnected,
        RTCPeerConnectionState::Failed => EngineConnState::Failed,
        RTCPeerConnectionState::Closed => EngineConnState::Closed,
        _ => EngineConnState::New,
    }
}

fn attach_dc(
    dc: &Arc<RTCDataChannel>,
    slot: &Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
    events: &mpsc::UnboundedSender<EngineEvent>,
) {
    *slot.lock().unwrap() = Some(dc.clone());

    let open_events = events.clone();
    dc.on_open(Box::new(move || {
        let _ = open_events.send(EngineEvent::DataChannelOpen);
        Box::pin(async {})
    }));

    let msg_events = events.clone();
    dc.on_message(Box::new(move |m: DataChannelMessage| {
        let _ = msg_events.send(EngineEvent::DataReceived(m.data));
        Box::pin(async {})
    }));
}

#[async_trait]
impl EngineFactory for WebrtcEngineFactory {
    async fn create(
        &self,
        initiator: bool,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<Arc<dyn SessionEngine>> {
        let api = APIBuilder::new().build();
        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers: build_ice_servers(&self.ice_servers),
                ..Default::default()
            })
            .await
            .context("new peer connection")?,
        );

        // Trickle: discovered local candidates go out through the worker.
        let cand_events = events.clone();
        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            let cand_events = cand_events.clone();
            Box::pin(async move {
                let Some(cand) = cand else { return };
                if let Ok(init) = cand.to_json() {
                    let _ = cand_events.send(EngineEvent::CandidateDiscovered(Candidate {
                        candidate: init.candidate,
                        sdp_mline_index: init.sdp_mline_index,
                        sdp_mid: init.sdp_mid,
                    }));
                }
            })
        }));

        let state_events = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            debug!(state = ?st, "peer connection state");
            let _ = state_events.send(EngineEvent::ConnectionStateChanged(map_state(st)));
            Box::pin(async {})
        }));

        let track_events = events.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let _ = track_events.send(EngineEvent::InboundTrack {
                kind: track.kind().to_string(),
                id: track.id(),
            });
            Box::pin(async {})
        }));

        let dc_slot: Arc<Mutex<Option<Arc<RTCDataChannel>>>> = Arc::new(Mutex::new(None));
        if initiator {
            let dc = pc
                .create_data_channel(DATA_CHANNEL_LABEL, None)
                .await
                .context("create data channel")?;
            attach_dc(&dc, &dc_slot, &events);
        } else {
            let slot = dc_slot.clone();
            let dc_events = events.clone();
            pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                attach_dc(&dc, &slot, &dc_events);
                Box::pin(async {})
            }));
        }

        Ok(Arc::new(WebrtcEngine { pc, dc: dc_slot }))
    }
}

impl WebrtcEngine {
    fn data_channel(&self) -> Result<Arc<RTCDataChannel>> {
        self.dc
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow!("data channel not open yet"))
    }
}

#[async_trait]
impl SessionEngine for WebrtcEngine {
    async fn create_offer(&self) -> Result<Descriptor> {
        let offer = self.pc.create_offer(None).await.context("create offer")?;
        Ok(Descriptor {
            kind: DescriptorKind::Offer,
            sdp: offer.sdp,
        })
    }

    async fn create_answer(&self) -> Result<Descriptor> {
        let answer = self.pc.create_answer(None).await.context("create answer")?;
        Ok(Descriptor {
            kind: DescriptorKind::Answer,
            sdp: answer.sdp,
        })
    }

    async fn set_local_description(&self, desc: Descriptor) -> Result<()> {
        self.pc
            .set_local_description(to_rtc(&desc)?)
            .await
            .context("set local description")
    }

    async fn set_remote_description(&self, desc: Descriptor) -> Result<()> {
        self.pc
            .set_remote_description(to_rtc(&desc)?)
            .await
            .context("set remote description")
    }

    async fn add_candidate(&self, candidate: Candidate) -> Result<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: None,
            })
            .await
            .context("add ice candidate")
    }

    async fn send_data(&self, data: Bytes) -> Result<()> {
        let dc = self.data_channel()?;
        dc.send(&data).await.map_err(|e| anyhow!("dc send: {e}"))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await.context("close peer connection")
    }
}

fn to_rtc(desc: &Descriptor) -> Result<RTCSessionDescription> {
    let rtc = match desc.kind {
        DescriptorKind::Offer => RTCSessionDescription::offer(desc.sdp.clone()),
        DescriptorKind::Answer => RTCSessionDescription::answer(desc.sdp.clone()),
    };
    rtc.map_err(|e| anyhow!("bad {} sdp: {e}", desc.kind.as_str()))
}
