mod common;

use common::*;
use peerlink_core::events::CoreEvent;
use peerlink_core::{ConnectionState, PeerClient, PeerId};

/// alice calls bob through the relay: bob's session is created lazily from
/// the inbound offer, both sides reach connected, and data flows afterwards.
#[tokio::test]
async fn call_establishes_both_sides() {
    let (a, b, _gate) = mem_pair("alice", "bob", false);
    let script = EngineScript {
        connect_after_answer: true,
        echo_data: true,
        ..Default::default()
    };
    let fa = MockEngineFactory::new("alice", script.clone());
    let fb = MockEngineFactory::new("bob", script);

    let (alice, mut a_events) = PeerClient::connect_over(test_config(), a.link, fa.clone())
        .await
        .unwrap();
    let (_bob, mut b_events) = PeerClient::connect_over(test_config(), b.link, fb.clone())
        .await
        .unwrap();
    assert_eq!(alice.local_id().unwrap().as_str(), "alice");

    alice.start_call(PeerId::from("bob")).await.unwrap();

    // Collect each side's events until it reports connected.
    let mut a_seen = Vec::new();
    loop {
        let ev = next_event(&mut a_events).await;
        if matches!(
            ev,
            CoreEvent::ConnectionState {
                state: ConnectionState::Connected,
                ..
            }
        ) {
            break;
        }
        a_seen.push(ev);
    }
    let mut b_seen = Vec::new();
    loop {
        let ev = next_event(&mut b_events).await;
        if matches!(
            ev,
            CoreEvent::ConnectionState {
                state: ConnectionState::Connected,
                ..
            }
        ) {
            break;
        }
        b_seen.push(ev);
    }

    // The callee saw the incoming call; the caller did not.
    assert!(b_seen
        .iter()
        .any(|ev| matches!(ev, CoreEvent::IncomingCall { peer } if peer.as_str() == "alice")));
    assert!(!a_seen
        .iter()
        .any(|ev| matches!(ev, CoreEvent::IncomingCall { .. })));

    // Callee engine ran the answerer sequence in order.
    let bob_engine = fb.last_engine().expect("bob created an engine");
    assert_eq!(
        bob_engine.ops()[..3],
        [
            "set_remote:offer".to_string(),
            "create_answer".to_string(),
            "set_local:answer".to_string(),
        ]
    );

    // Data channel is usable once connected (mock echoes back).
    alice
        .send_data(PeerId::from("bob"), &b"ping"[..])
        .await
        .unwrap();
    loop {
        match next_event(&mut a_events).await {
            CoreEvent::DataReceived { peer, data } => {
                assert_eq!(peer.as_str(), "bob");
                assert_eq!(&data[..], b"ping");
                break;
            }
            _ => {}
        }
    }
}
