/*
 * SPDX-FileCopyrightText: 2026 Peerlink Contributors
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod negotiator;
pub mod registry;
pub mod relay_client;
pub mod session;
pub mod webrtc_engine;

pub use client::PeerClient;
pub use config::CoreConfig;
pub use error::CoreError;
pub use events::{ConnectionState, CoreEvent};
pub use session::PeerId;
