// Wire Message Tests

use gossipmesh::resolver::ContentId;
use gossipmesh::wire::{framed, read_message, write_frame, encode, Message, MessageType, WireError, VERSION_1};

#[test]
fn test_constructors_set_type_and_version() {
    let id = ContentId::of(b"c");

    let push = Message::push(&id);
    assert_eq!(push.msg_type, MessageType::Push);
    assert_eq!(push.version, VERSION_1);
    assert_eq!(push.content_id(), Some(id));

    assert_eq!(Message::pull(&id).msg_type, MessageType::Pull);
    assert_eq!(Message::sync(b"x".to_vec()).msg_type, MessageType::Sync);
    assert_eq!(Message::direct(b"x".to_vec()).msg_type, MessageType::Direct);
}

#[test]
fn test_message_survives_encoding() {
    let msg = Message::sync(b"payload bytes".to_vec());
    let decoded = Message::from_bytes(&msg.to_bytes().unwrap()).unwrap();
    assert_eq!(decoded, msg);
}

#[test]
fn test_reserved_tags_are_rejected() {
    for tag in [0u16, 1, 6, 999] {
        assert_eq!(MessageType::try_from(tag), Err(WireError::InvalidType(tag)));
    }
}

#[test]
fn test_decode_rejects_garbage() {
    assert!(Message::from_bytes(&[0xFF, 0xFF, 0xFF]).is_err());
    assert!(Message::from_bytes(&[]).is_err());
}

#[test]
fn test_short_payload_has_no_content_id() {
    let msg = Message::new(MessageType::Push, vec![0; 31]);
    assert_eq!(msg.content_id(), None);
}

#[tokio::test]
async fn test_frames_over_a_stream() {
    let (a, b) = tokio::io::duplex(1024);
    let mut writer = framed(a, 1024);
    let mut reader = framed(b, 1024);

    let first = Message::direct(b"one".to_vec());
    let second = Message::push(&ContentId::of(b"two"));
    write_frame(&mut writer, encode(&first).unwrap()).await.unwrap();
    write_frame(&mut writer, encode(&second).unwrap()).await.unwrap();

    assert_eq!(read_message(&mut reader).await.unwrap(), first);
    assert_eq!(read_message(&mut reader).await.unwrap(), second);
}
