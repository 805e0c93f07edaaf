/*
 * SPDX-FileCopyrightText: 2026 Peerlink Contributors
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use std::time::Duration;

/// One ICE server entry handed to the transport engine.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct IceServerConfig {
    /// Server URLs (`stun:...`, `turn:...`, `turns:...`).
    pub urls: Vec<String>,
    /// Username for TURN entries.
    pub username: Option<String>,
    /// Credential for TURN entries.
    pub credential: Option<String>,
}

#[derive(Clone, Debug, serde::Deserialize)]
pub struct CoreConfig {
    /// WebSocket URL of the signaling relay (e.g. `ws://127.0.0.1:9090/ws`).
    pub relay_url: String,
    /// ICE servers for path discovery. Defaults to public STUN.
    pub ice_servers: Option<Vec<IceServerConfig>>,
    /// Seconds a session may negotiate before it is failed and closed.
    pub connect_timeout_secs: Option<u64>,
    /// Grace seconds after a transient transport loss before the session closes.
    pub disconnect_grace_secs: Option<u64>,
    /// Relay keepalive ping interval seconds.
    pub keepalive_secs: Option<u64>,
    /// Seconds the relay may stay unreachable before all sessions are force-closed.
    pub relay_outage_timeout_secs: Option<u64>,
    /// Upper bound for the relay reconnect backoff, seconds.
    pub reconnect_backoff_max_secs: Option<u64>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:9090/ws".to_string(),
            ice_servers: None,
            connect_timeout_secs: Some(20),
            disconnect_grace_secs: Some(10),
            keepalive_secs: Some(5),
            relay_outage_timeout_secs: Some(45),
            reconnect_backoff_max_secs: Some(5),
        }
    }
}

impl CoreConfig {
    pub fn ice_servers(&self) -> Vec<IceServerConfig> {
        self.ice_servers
            .clone()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_ice_servers)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.unwrap_or(20).max(5).min(120))
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_secs(self.disconnect_grace_secs.unwrap_or(10).max(1).min(60))
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs.unwrap_or(5).max(1).min(60))
    }

    pub fn relay_outage_timeout(&self) -> Duration {
        Duration::from_secs(self.relay_outage_timeout_secs.unwrap_or(45).max(1).min(600))
    }

    pub fn reconnect_backoff_max(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_max_secs.unwrap_or(5).max(1).min(60))
    }
}

/// Public STUN defaults; deployments with TURN put credentials in the config.
pub fn default_ice_servers() -> Vec<IceServerConfig> {
    vec![IceServerConfig {
        urls: vec![
            "stun:stun.l.google.com:19302".to_string(),
            "stun:stun1.l.google.com:19302".to_string(),
        ],
        username: None,
        credential: None,
    }]
}
