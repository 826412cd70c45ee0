// Wire format tests for the message layer
// Run with: cargo test --test message

use proptest::prelude::*;
use replay_ipc::Protocol::Message::Message;
use replay_ipc::Protocol::{
    frame_size, Direction, MessageHeader, MessageType, Payload, PayloadLayout, BULK_FLAG,
    HEADER_SIZE, MAX_FRAME_SIZE,
};
use replay_ipc::ProtocolError;
use std::num::NonZeroU64;

#[test]
fn test_header_is_twelve_little_endian_bytes() {
    let header = MessageHeader {
        size: 0x0102_0304,
        flags: 0x0506,
        kind: 0x0708,
        fork_id: 0x090a_0b0c,
    };
    let bytes = header.to_bytes();
    assert_eq!(HEADER_SIZE, 12);
    assert_eq!(
        bytes,
        [0x04, 0x03, 0x02, 0x01, 0x06, 0x05, 0x08, 0x07, 0x0c, 0x0b, 0x0a, 0x09]
    );
    assert_eq!(MessageHeader::from_bytes(&bytes).unwrap(), header);
}

#[test]
fn test_size_smaller_than_header_is_rejected() {
    let header = MessageHeader {
        size: 11,
        flags: 0,
        kind: MessageType::Terminate.as_u16(),
        fork_id: 0,
    };
    let err = MessageHeader::from_bytes(&header.to_bytes()).unwrap_err();
    assert_eq!(err, ProtocolError::SizeTooSmall { size: 11, header: 12 });
}

#[test]
fn test_empty_message_is_header_only() {
    let msg = Message::terminate(3);
    assert_eq!(msg.size(), HEADER_SIZE);
    let bytes = msg.encode().unwrap();
    assert_eq!(bytes.len(), HEADER_SIZE);
    assert_eq!(&bytes[6..8], &MessageType::Terminate.as_u16().to_le_bytes());
    assert_eq!(&bytes[8..12], &3u32.to_le_bytes());
}

#[test]
fn test_introduction_scenario() {
    let msg = Message::introduction(42, vec!["--x".to_string(), "--y".to_string()]);
    let decoded = Message::decode(&msg.encode().unwrap()).unwrap();

    let intro = decoded.introduction_args().unwrap();
    assert_eq!(intro.parent_pid, 42);
    assert_eq!(intro.argc(), 2);
    assert_eq!(intro.argv, vec!["--x", "--y"]);
}

#[test]
fn test_introduction_argc_mismatch_is_malformed() {
    let mut bytes = Message::introduction(1, vec!["a".to_string()]).encode().unwrap();
    // argc says two, only one argument follows
    bytes[HEADER_SIZE + 4..HEADER_SIZE + 8].copy_from_slice(&2u32.to_le_bytes());
    assert!(matches!(
        Message::decode(&bytes),
        Err(ProtocolError::MalformedPayload { .. })
    ));
}

#[test]
fn test_unknown_type_is_rejected() {
    let header = MessageHeader {
        size: HEADER_SIZE as u32,
        flags: 0,
        kind: 9,
        fork_id: 0,
    };
    assert_eq!(
        Message::decode(&header.to_bytes()),
        Err(ProtocolError::UnknownType(9))
    );
}

#[test]
fn test_truncated_frame_is_rejected() {
    let bytes = Message::recording_data(0, 8, vec![1, 2, 3, 4]).encode().unwrap();
    assert!(matches!(
        Message::decode(&bytes[..bytes.len() - 1]),
        Err(ProtocolError::Truncated { .. })
    ));
}

#[test]
fn test_error_text_is_nul_terminated() {
    let msg = Message::fatal_error(2, "boom");
    let bytes = msg.encode().unwrap();
    assert_eq!(bytes.last(), Some(&0));
    assert_eq!(msg.size(), HEADER_SIZE + 5);
    let decoded = Message::decode(&bytes).unwrap();
    assert_eq!(decoded.error_text(), Some("boom"));
    assert_eq!(decoded.fork_id(), 2);
}

#[test]
fn test_shared_key_set_splits_on_tag() {
    let msg = Message::shared_key_set(3, "color", "blue");
    assert_eq!(msg.tag(), Some(5));
    let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
    let (key, value) = decoded.shared_key_entry().unwrap();
    assert_eq!(key, b"color");
    assert_eq!(value, b"blue");
}

#[test]
fn test_bulk_flag_survives_encoding() {
    let mut msg = Message::manifest_finished(1, vec![0; 64]);
    assert!(!msg.is_bulk());
    msg.set_bulk();
    let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
    assert!(decoded.is_bulk());
    assert_eq!(decoded.flags() & BULK_FLAG, BULK_FLAG);
}

#[test]
fn test_hash_is_order_sensitive_fold() {
    let msg = Message::ping(0, 7);
    let expected = msg
        .encode()
        .unwrap()
        .iter()
        .fold(0u32, |h, b| h.wrapping_mul(31).wrapping_add(*b as u32));
    assert_eq!(msg.hash().unwrap(), expected);
    assert_eq!(Message::hash_encoded(&msg.encode().unwrap()), expected);
    assert_ne!(
        Message::ping(0, 7).hash().unwrap(),
        Message::ping(0, 8).hash().unwrap()
    );
}

#[test]
fn test_type_tags_and_layouts() {
    for kind in MessageType::ALL {
        assert_eq!(MessageType::from_u16(kind.as_u16()), Some(kind));
        assert!(!kind.name().is_empty());
    }
    assert_eq!(MessageType::from_u16(9), None);
    assert_eq!(MessageType::SharedKeyResponse.as_u16(), 23);
    assert_eq!(MessageType::FatalError.layout(), PayloadLayout::Error);
    assert_eq!(MessageType::Terminate.layout(), PayloadLayout::Empty);
    assert_eq!(MessageType::RecordingData.layout(), PayloadLayout::Binary);
}

#[test]
fn test_send_direction_rule() {
    use Direction::*;

    // Children send while running, middlemen while the child is paused.
    assert!(MessageType::ManifestFinished.may_send(FromChild, false));
    assert!(!MessageType::ManifestFinished.may_send(FromChild, true));
    assert!(MessageType::ManifestStart.may_send(ToChild, true));
    assert!(!MessageType::ManifestStart.may_send(ToChild, false));

    for urgent in [MessageType::Terminate, MessageType::Crash, MessageType::Ping] {
        assert!(urgent.is_urgent());
        assert!(urgent.may_send(ToChild, false));
        assert!(urgent.may_send(ToChild, true));
    }
    assert!(!MessageType::CreateCheckpoint.is_urgent());
}

#[test]
fn test_read_from_stream_of_frames() {
    let mut bytes = Vec::new();
    Message::ping(0, 1).encode_into(&mut bytes).unwrap();
    Message::log_text(0, "hello").encode_into(&mut bytes).unwrap();

    let mut reader = bytes.as_slice();
    let first = Message::read_from(&mut reader).unwrap().unwrap();
    let second = Message::read_from(&mut reader).unwrap().unwrap();
    assert_eq!(first.payload(), &Payload::Ping { id: 1 });
    assert_eq!(second.binary_data(), Some(&b"hello"[..]));
    assert!(Message::read_from(&mut reader).unwrap().is_none());
}

#[test]
fn test_external_call_tag_zero_means_unavailable() {
    let id = NonZeroU64::MIN;
    let response = Message::external_call_response(2, id, b"out".to_vec());
    assert_eq!(response.tag(), Some(1));

    let bytes = Message::external_call_unavailable(2).encode().unwrap();
    let unavailable = Message::decode(&bytes).unwrap();
    assert_eq!(unavailable.kind(), MessageType::ExternalCallResponse);
    assert_eq!(unavailable.tag(), Some(0));
    assert!(NonZeroU64::new(unavailable.tag().unwrap()).is_none());
}

#[test]
fn test_frame_size_must_fit_size_field() {
    assert_eq!(frame_size(0), Ok(HEADER_SIZE as u32));
    assert_eq!(frame_size(MAX_FRAME_SIZE - HEADER_SIZE), Ok(u32::MAX));

    let err = frame_size(MAX_FRAME_SIZE - HEADER_SIZE + 1).unwrap_err();
    assert_eq!(
        err,
        ProtocolError::TooLarge {
            size: MAX_FRAME_SIZE + 1,
            max: MAX_FRAME_SIZE
        }
    );
    assert!(matches!(
        frame_size(usize::MAX),
        Err(ProtocolError::TooLarge { .. })
    ));
}

fn arb_message() -> impl Strategy<Value = Message> {
    let fork = 0u32..16;
    let bytes = prop::collection::vec(any::<u8>(), 0..256);
    let arg = "[a-z-]{0,12}";
    prop_oneof![
        (fork.clone(), any::<u32>()).prop_map(|(f, id)| Message::ping(f, id)),
        (fork.clone(), any::<u32>(), any::<u64>())
            .prop_map(|(f, id, p)| Message::ping_response(f, id, p)),
        (any::<u32>(), prop::collection::vec(arg, 0..4))
            .prop_map(|(pid, argv)| Message::introduction(pid, argv)),
        (fork.clone(), any::<u64>(), bytes.clone())
            .prop_map(|(f, off, data)| Message::recording_data(f, off, data)),
        (fork.clone(), 1u64.., bytes.clone()).prop_map(|(f, id, data)| {
            Message::external_call_response(f, NonZeroU64::new(id).unwrap(), data)
        }),
        (fork.clone(), any::<u64>(), any::<u64>())
            .prop_map(|(f, s, l)| Message::update_recording_from_root(f, s, l)),
        (fork.clone(), "[ -~]{0,40}").prop_map(|(f, t)| Message::fatal_error(f, t)),
        (fork.clone(), "[a-z]{0,8}", "[a-z]{0,8}")
            .prop_map(|(f, k, v)| Message::shared_key_set(f, &k, &v)),
        fork.prop_map(Message::terminate),
    ]
}

proptest! {
    #[test]
    fn prop_decode_inverts_encode(msg in arb_message(), bulk in any::<bool>()) {
        let mut msg = msg;
        if bulk {
            msg.set_bulk();
        }
        let bytes = msg.encode().unwrap();
        prop_assert_eq!(bytes.len(), msg.size());
        let decoded = Message::decode(&bytes).unwrap();
        prop_assert_eq!(decoded.size(), msg.size());
        prop_assert_eq!(decoded.hash().unwrap(), Message::hash_encoded(&bytes));
        prop_assert_eq!(decoded, msg);
    }
}
