mod common;

use common::*;
use peerlink_core::events::CoreEvent;
use peerlink_core::negotiator::SessionInput;
use peerlink_core::ConnectionState;
use std::time::Duration;

/// After close, inbound signaling for the pair is dropped outright — nothing
/// queues, nothing reaches the engine, nothing re-opens the session.
#[tokio::test]
async fn closed_session_drops_late_signaling() {
    let mut h = spawn_session("bob", "alice", EngineScript::default());

    h.handle
        .send(SessionInput::RemoteDescriptor(offer("alice")));
    loop {
        if matches!(next_event(&mut h.events_rx).await, CoreEvent::IncomingCall { .. }) {
            break;
        }
    }

    h.handle.close();
    loop {
        match next_event(&mut h.events_rx).await {
            CoreEvent::ConnectionState {
                state: ConnectionState::Closed,
                ..
            } => break,
            _ => {}
        }
    }
    let engine = h.factory.last_engine().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let ops_at_close = engine.ops();

    // Late arrivals for the closed pair.
    h.handle.send(SessionInput::RemoteCandidate(candidate(9)));
    h.handle.send(SessionInput::RemoteDescriptor(answer("alice")));
    h.handle.send(SessionInput::StartCall);
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Engine log only gained the teardown close, nothing from the late input.
    let ops_after: Vec<_> = engine
        .ops()
        .into_iter()
        .filter(|op| op != "close")
        .collect();
    let ops_before: Vec<_> = ops_at_close.into_iter().filter(|op| op != "close").collect();
    assert_eq!(ops_after, ops_before);
    assert!(drain_events(&mut h.events_rx).is_empty());
    assert!(h.handle.is_closed());
}
