use bytes::BytesMut;

use courier::http::request::Method;
use courier::http::transfer::{Role, Transfer};
use courier::http::websocket::{
    MAX_PAYLOAD, OPCODE_BINARY, OPCODE_PING, OPCODE_TEXT, decode_frame, encode_frame, handshake,
};
use courier::{Error, ParseError};

fn upgrade_request(key: Option<&str>) -> Transfer {
    let mut req = Transfer::new_request(Method::GET, "/ws", None, None).unwrap();
    req.set_header("Upgrade", "websocket").unwrap();
    req.set_header("Connection", "Upgrade").unwrap();
    if let Some(key) = key {
        req.set_header("Sec-WebSocket-Key", key).unwrap();
    }
    req
}

#[test]
fn test_handshake_builds_101() {
    let mut resp = Transfer::new(Role::Server);
    handshake(&upgrade_request(Some("dGhlIHNhbXBsZSBub25jZQ==")), &mut resp).unwrap();
    assert_eq!(resp.status(), Some(101));
    assert_eq!(resp.status_message(), Some("Upgrade to WebSocket"));
    assert_eq!(
        resp.header("Sec-WebSocket-Accept"),
        Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=")
    );
    assert_eq!(resp.header("connection"), Some("Upgrade"));
}

#[test]
fn test_handshake_requires_key() {
    let mut resp = Transfer::new(Role::Server);
    let err = handshake(&upgrade_request(None), &mut resp).unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
    assert!(resp.preamble().is_empty());
}

#[test]
fn test_encode_small_frame() {
    let mut buf = BytesMut::new();
    encode_frame(&mut buf, OPCODE_TEXT, b"hey").unwrap();
    assert_eq!(&buf[..], b"\x81\x03hey");
}

#[test]
fn test_encode_uses_extended_lengths() {
    let mut buf = BytesMut::new();
    encode_frame(&mut buf, OPCODE_BINARY, &[7u8; 300]).unwrap();
    assert_eq!(&buf[..4], &[0x82, 126, 0x01, 0x2c]);
    assert_eq!(buf.len(), 304);

    let mut buf = BytesMut::new();
    encode_frame(&mut buf, OPCODE_BINARY, &vec![0u8; 70_000]).unwrap();
    assert_eq!(&buf[..10], &[0x82, 127, 0, 0, 0, 0, 0, 0x01, 0x11, 0x70]);
}

#[test]
fn test_encode_limits() {
    let mut buf = BytesMut::new();
    assert!(matches!(
        encode_frame(&mut buf, 16, b""),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        encode_frame(&mut buf, OPCODE_BINARY, &vec![0u8; MAX_PAYLOAD + 1]),
        Err(Error::Parse(ParseError::FrameTooLarge))
    ));
    assert!(buf.is_empty());
}

#[test]
fn test_decode_what_we_encode() {
    let mut buf = BytesMut::new();
    encode_frame(&mut buf, OPCODE_PING, &[1u8; 200]).unwrap();
    encode_frame(&mut buf, OPCODE_TEXT, b"next").unwrap();

    let first = decode_frame(&mut buf).unwrap().unwrap();
    assert_eq!(first.opcode, OPCODE_PING);
    assert_eq!(first.payload, 4..204);
    let rest = &mut buf[first.consumed..];
    let second = decode_frame(rest).unwrap().unwrap();
    assert_eq!(&rest[second.payload], b"next");
}

#[test]
fn test_decode_rejects_fragments_and_huge_frames() {
    let mut fragment = vec![0x01, 0x01, b'x'];
    assert_eq!(decode_frame(&mut fragment), Err(ParseError::UnsupportedFrame));

    let mut huge = vec![0x82, 127, 0, 0, 0, 0, 1, 0, 0, 0];
    assert_eq!(decode_frame(&mut huge), Err(ParseError::FrameTooLarge));
}

#[test]
fn test_decode_waits_for_whole_frame() {
    let mut partial = vec![0x81, 126, 0x01];
    assert_eq!(decode_frame(&mut partial), Ok(None));
    let mut partial = vec![0x81, 0x85, 1, 2, 3, 4, b'a'];
    assert_eq!(decode_frame(&mut partial), Ok(None));
}
