use bytes::BytesMut;

use courier::http::response::{EMERGENCY_RESPONSE, StatusCode};
use courier::http::transfer::{Role, Transfer};
use courier::http::writer::encode_transfer;

#[test]
fn test_status_code_as_u16() {
    assert_eq!(StatusCode::SwitchingProtocols.as_u16(), 101);
    assert_eq!(StatusCode::Ok.as_u16(), 200);
    assert_eq!(StatusCode::NotFound.as_u16(), 404);
    assert_eq!(StatusCode::MethodNotAllowed.as_u16(), 405);
    assert_eq!(StatusCode::InternalServerError.as_u16(), 500);
}

#[test]
fn test_status_code_reason_phrase() {
    assert_eq!(StatusCode::Ok.reason_phrase(), "OK");
    assert_eq!(StatusCode::NotFound.reason_phrase(), "Not found");
    assert_eq!(
        StatusCode::InternalServerError.reason_phrase(),
        "Internal server error"
    );
}

#[test]
fn test_respond_replaces_everything() {
    let mut resp = Transfer::new(Role::Server);
    resp.respond(200, "OK").unwrap();
    resp.set_header("X-Old", "1").unwrap();
    resp.set_body("old body");

    resp.respond_with(StatusCode::NotFound).unwrap();
    assert_eq!(resp.preamble(), "HTTP/1.1 404 Not found");
    assert_eq!(resp.header("X-Old"), None);
    assert!(resp.body().is_empty());
}

#[test]
fn test_respond_needs_server_role() {
    let mut req = Transfer::new(Role::Client);
    assert!(req.respond(200, "OK").is_err());
}

#[test]
fn test_response_always_has_length() {
    let mut resp = Transfer::new(Role::Server);
    resp.respond_with(StatusCode::MethodNotAllowed).unwrap();
    let mut buf = BytesMut::new();
    encode_transfer(&mut buf, &resp).unwrap();
    assert_eq!(&buf[..], b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n");
}

#[test]
fn test_emergency_response_is_complete() {
    let text = std::str::from_utf8(EMERGENCY_RESPONSE).unwrap();
    assert!(text.starts_with("HTTP/1.1 500 Internal server error\r\n"));
    assert!(text.ends_with("Content-Length: 0\r\n\r\n"));
}
