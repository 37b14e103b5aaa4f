// Test-specific lint overrides: property tests use unwrap/expect freely.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::needless_pass_by_value
)]

//! Property tests for the real-time packet codec and room keys.
//!
//! 1. Arbitrary text never panics the decoder.
//! 2. Chat events survive encode → decode with their payload intact.
//! 3. Room keys are independent of participant order.

use proptest::prelude::*;
use mentorlink_proto::event::{InboundEvent, OutboundEvent, ReceiveMessage, SendMessage};
use mentorlink_proto::packet::{self, Packet, SocketPacket};
use mentorlink_proto::room::RoomKey;

fn arb_id() -> impl Strategy<Value = String> {
    "[a-f0-9]{1,24}"
}

fn arb_send_message() -> impl Strategy<Value = SendMessage> {
    (
        ".{0,32}",
        arb_id(),
        arb_id(),
        ".{1,256}",
        proptest::option::of(arb_id()),
    )
        .prop_map(
            |(first_name, target_user_id, logged_in_user_id, text, client_message_id)| {
                SendMessage {
                    first_name,
                    target_user_id,
                    logged_in_user_id,
                    text,
                    client_message_id,
                }
            },
        )
}

fn arb_receive_message() -> impl Strategy<Value = ReceiveMessage> {
    (
        proptest::option::of(".{0,32}"),
        proptest::option::of(".{0,32}"),
        ".{1,256}",
        arb_id(),
        proptest::option::of(arb_id()),
    )
        .prop_map(
            |(first_name, last_name, text, sender_id, client_message_id)| ReceiveMessage {
                first_name,
                last_name,
                text,
                timestamp: None,
                sender_id,
                client_message_id,
            },
        )
}

fn unwrap_event(packet: Packet) -> (String, Vec<serde_json::Value>) {
    match packet {
        Packet::Message(SocketPacket::Event { name, args, .. }) => (name, args),
        other => panic!("expected event packet, got {other:?}"),
    }
}

proptest! {
    /// Arbitrary frames decode to Ok or Err, never a panic.
    #[test]
    fn random_text_decode_no_panic(text in ".{0,256}") {
        let _ = packet::decode(&text);
    }

    /// Frames starting with a message prefix exercise the Socket.IO layer.
    #[test]
    fn random_message_frames_no_panic(kind in "[0-9]", ns in "(/[a-z]{0,8},)?", body in ".{0,128}") {
        let _ = packet::decode(&format!("4{kind}{ns}{body}"));
    }

    /// An outbound `sendMessage` arrives at the server unchanged.
    #[test]
    fn send_message_survives_codec(message in arb_send_message()) {
        let event = OutboundEvent::SendMessage(message);
        let text = packet::encode(&event.to_packet().unwrap()).unwrap();
        let (name, args) = unwrap_event(packet::decode(&text).unwrap());
        let parsed = OutboundEvent::from_event(&name, args).unwrap();
        prop_assert_eq!(Some(event), parsed);
    }

    /// An inbound `receiveMessage` arrives at the client unchanged.
    #[test]
    fn receive_message_survives_codec(message in arb_receive_message()) {
        let event = InboundEvent::ReceiveMessage(message);
        let text = packet::encode(&event.to_packet().unwrap()).unwrap();
        let (name, args) = unwrap_event(packet::decode(&text).unwrap());
        let parsed = InboundEvent::from_event(&name, args).unwrap();
        prop_assert_eq!(Some(event), parsed);
    }

    /// Both participants compute the same room key.
    #[test]
    fn room_key_symmetric(a in arb_id(), b in arb_id()) {
        let forward = RoomKey::between(&a, &b);
        let backward = RoomKey::between(&b, &a);
        prop_assert_eq!(forward.to_string(), backward.to_string());
        prop_assert!(forward.includes(&a));
        prop_assert!(forward.includes(&b));
    }
}
