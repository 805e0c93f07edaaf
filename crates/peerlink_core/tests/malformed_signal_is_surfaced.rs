use peerlink_core::relay_client::decode_server_frame;
use peerlink_core::CoreError;
use peerlink_protocol::{ServerFrame, SignalPayload};

/// Undecodable relay frames surface as MalformedSignal; they are reported,
/// not silently swallowed, and well-formed frames keep decoding.
#[test]
fn malformed_signal_is_surfaced() {
    let err = decode_server_frame("this is not json").unwrap_err();
    assert!(matches!(err, CoreError::MalformedSignal(_)));

    let err = decode_server_frame(r#"{"type":"transmogrify","x":1}"#).unwrap_err();
    assert!(matches!(err, CoreError::MalformedSignal(_)));

    // Missing required fields is malformed too.
    let err = decode_server_frame(r#"{"type":"signal","from":"abc"}"#).unwrap_err();
    assert!(matches!(err, CoreError::MalformedSignal(_)));

    let frame =
        decode_server_frame(r#"{"type":"signal","from":"abc","payload":{"type":"offer","sdp":"v=0"}}"#)
            .unwrap();
    match frame {
        ServerFrame::Signal { from, payload } => {
            assert_eq!(from, "abc");
            assert!(matches!(payload, SignalPayload::Offer { .. }));
        }
        other => panic!("unexpected frame: {other:?}"),
    }

    let frame = decode_server_frame(
        r#"{"type":"signal","from":"abc","payload":{"type":"candidate","candidate":"candidate:1","sdpMLineIndex":0,"sdpMid":"0"}}"#,
    )
    .unwrap();
    match frame {
        ServerFrame::Signal {
            payload:
                SignalPayload::Candidate {
                    candidate,
                    sdp_mline_index,
                    sdp_mid,
                },
            ..
        } => {
            assert_eq!(candidate, "candidate:1");
            assert_eq!(sdp_mline_index, Some(0));
            assert_eq!(sdp_mid.as_deref(), Some("0"));
        }
        other => panic!("unexpected frame: {other:?}"),
    }
}
