//! Property-based decode robustness tests.
//!
//! Uses proptest to verify:
//! 1. Arbitrary text never panics the client-frame decoder.
//! 2. Any targeted event with arbitrary ids and payload strings survives
//!    encode → decode with the target intact.
//! 3. The size limit is applied before parsing.

use huddle_proto::codec::{self, CodecError};
use huddle_proto::id::ConnectionId;
use huddle_proto::signal::ClientEvent;
use proptest::prelude::*;
use serde_json::Value;

fn arb_targeted() -> impl Strategy<Value = ClientEvent> {
    (0..4u8, ".{0,64}", ".{0,256}").prop_map(|(kind, target, payload)| {
        let target_id = ConnectionId::new(target);
        let blob = Value::String(payload);
        match kind {
            0 => ClientEvent::Offer {
                offer: blob,
                target_id,
            },
            1 => ClientEvent::Answer {
                answer: blob,
                target_id,
            },
            2 => ClientEvent::IceCandidate {
                candidate: blob,
                target_id,
            },
            _ => ClientEvent::TranscriptionMessage {
                transcript: blob.clone(),
                translation: blob,
                target_id,
            },
        }
    })
}

proptest! {
    #[test]
    fn arbitrary_text_never_panics(text in ".{0,512}") {
        let _ = codec::decode_client(&text, codec::DEFAULT_MAX_FRAME_SIZE);
    }

    #[test]
    fn arbitrary_json_objects_never_panic(
        event in "[a-z-]{0,24}",
        key in "[a-zA-Z]{0,12}",
        value in ".{0,32}",
    ) {
        let mut data = serde_json::Map::new();
        data.insert(key, Value::String(value));
        let frame = serde_json::json!({ "event": event, "data": data }).to_string();
        let _ = codec::decode_client(&frame, codec::DEFAULT_MAX_FRAME_SIZE);
    }

    #[test]
    fn targeted_events_keep_their_target(event in arb_targeted()) {
        let text = codec::encode(&event).unwrap();
        let decoded = codec::decode_client(&text, usize::MAX).unwrap();
        prop_assert_eq!(decoded.target(), event.target());
        prop_assert_eq!(decoded, event);
    }

    #[test]
    fn oversized_frames_rejected_before_parsing(extra in 1usize..64) {
        let text = "x".repeat(16 + extra);
        let result = codec::decode_client(&text, 16);
        let is_too_large = matches!(result, Err(CodecError::TooLarge { .. }));
        prop_assert!(is_too_large);
    }
}
