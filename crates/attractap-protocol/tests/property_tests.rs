//! Property-based tests for envelope size limits and frame decoding.

use attractap_core::constants::MAX_MESSAGE_SIZE;
use attractap_protocol::payloads::{MessagePayload, NfcTapPayload};
use attractap_protocol::{Envelope, Frame, FrameCodec, MessageType, ProtocolError};
use bytes::BytesMut;
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};

fn arbitrary_frame() -> impl Strategy<Value = Frame> {
    prop_oneof![
        ".{0,200}".prop_map(Frame::text),
        prop::collection::vec(any::<u8>(), 0..512).prop_map(Frame::binary),
    ]
}

proptest! {
    /// Serialization either fits in the limit or fails with MessageTooLarge.
    #[test]
    fn prop_outbound_size_limit(uid in "[0-9a-f]{0,1200}") {
        let envelope = Envelope::event(
            MessageType::NfcTap,
            &NfcTapPayload { card_uid: uid },
        ).unwrap();

        match envelope.to_json() {
            Ok(json) => prop_assert!(json.len() <= MAX_MESSAGE_SIZE),
            Err(ProtocolError::MessageTooLarge { size, max_size }) => {
                prop_assert!(size > max_size);
                prop_assert_eq!(max_size, MAX_MESSAGE_SIZE);
            }
            Err(other) => prop_assert!(false, "unexpected error {other}"),
        }
    }

    /// Arbitrary text never panics the envelope parser.
    #[test]
    fn prop_envelope_parse_never_panics(input in ".{0,256}") {
        let _ = Envelope::from_json(&input);
    }

    /// Inbound display payloads survive with any message text.
    #[test]
    fn prop_message_payload_text(message in ".{0,120}") {
        let json = serde_json::json!({
            "event": "EVENT",
            "data": {"type": "DISPLAY_ERROR", "payload": {"message": message.clone()}}
        })
        .to_string();
        let envelope = Envelope::from_json(&json).unwrap();
        let payload: MessagePayload = envelope.payload_as().unwrap();
        prop_assert_eq!(payload.message, Some(message));
    }

    /// A sequence of frames decodes to the same sequence regardless of how
    /// the byte stream is split.
    #[test]
    fn prop_frames_survive_any_split(
        frames in prop::collection::vec(arbitrary_frame(), 1..8),
        split in 1usize..64,
    ) {
        let mut codec = FrameCodec::new();
        let mut wire = BytesMut::new();
        for frame in &frames {
            codec.encode(frame.clone(), &mut wire).unwrap();
        }

        let mut decoded = Vec::new();
        let mut buffer = BytesMut::new();
        for chunk in wire.chunks(split) {
            buffer.extend_from_slice(chunk);
            while let Some(frame) = codec.decode(&mut buffer).unwrap() {
                decoded.push(frame);
            }
        }

        prop_assert_eq!(decoded, frames);
        prop_assert!(buffer.is_empty());
    }

    /// Random bytes either decode, wait for more data, or fail; never panic.
    #[test]
    fn prop_decode_garbage_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
        let mut codec = FrameCodec::with_max_frame_size(32);
        let mut buffer = BytesMut::from(&bytes[..]);
        let _ = codec.decode(&mut buffer);
    }
}
