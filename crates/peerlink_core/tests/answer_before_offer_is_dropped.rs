mod common;

use common::*;
use peerlink_core::events::CoreEvent;
use peerlink_core::negotiator::SessionInput;
use std::time::Duration;

/// An answer with no matching local offer is a protocol violation: the
/// message is dropped, the session state is untouched, and a proper offer
/// afterwards still goes through.
#[tokio::test]
async fn answer_before_offer_is_dropped() {
    let mut h = spawn_session("bob", "alice", EngineScript::default());

    h.handle
        .send(SessionInput::RemoteDescriptor(answer("alice")));
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Dropped before any engine was even built; no events surfaced.
    assert!(h.factory.engines().is_empty());
    assert!(drain_events(&mut h.events_rx).is_empty());
    assert!(!h.handle.is_closed());

    // The session is still usable for a well-ordered exchange.
    h.handle
        .send(SessionInput::RemoteDescriptor(offer("alice")));
    loop {
        if matches!(next_event(&mut h.events_rx).await, CoreEvent::IncomingCall { .. }) {
            break;
        }
    }
    let engine = h.factory.last_engine().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(engine.ops().contains(&"set_local:answer".to_string()));
}
