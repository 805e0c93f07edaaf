/*
 * SPDX-FileCopyrightText: 2026 Peerlink Contributors
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use thiserror::Error;

/// How bad an engine-reported failure is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSeverity {
    /// Path may come back; session enters the disconnect grace period.
    Transient,
    /// Session is gone; close immediately.
    Fatal,
}

#[derive(Debug, Error)]
pub enum CoreError {
    /// Descriptor kind inconsistent with the session state. Recoverable by
    /// glare resolution or by dropping the message.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Out-of-order or malformed event for the state machine. Logged,
    /// session-preserving.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Undeserializable signaling payload. Dropped, session-preserving.
    #[error("malformed signal: {0}")]
    MalformedSignal(String),

    /// The transport engine rejected or failed an operation.
    #[error("collaborator failure: {message}")]
    CollaboratorFailure {
        severity: FailureSeverity,
        message: String,
    },

    /// The signaling relay is down. Sessions are preserved until the
    /// configured outage timeout expires.
    #[error("relay unavailable: {0}")]
    RelayUnavailable(String),
}

impl CoreError {
    pub fn collaborator(severity: FailureSeverity, err: impl std::fmt::Display) -> Self {
        CoreError::CollaboratorFailure {
            severity,
            message: err.to_string(),
        }
    }
}
