use std::ops::ControlFlow;

use courier::http::request::Method;
use courier::http::transfer::{Role, Transfer};
use courier::Error;

fn request_line(line: &str) -> Transfer {
    let mut xfer = Transfer::new(Role::Client);
    xfer.set_preamble(line).unwrap();
    xfer
}

#[test]
fn test_request_line_parts() {
    let req = request_line("  post   /a/b?x=1#frag   HTTP/1.0 \r\n");
    assert_eq!(req.preamble(), "post   /a/b?x=1#frag   HTTP/1.0");
    assert_eq!(req.method(), Some("post"));
    assert_eq!(req.parse_method(), Some(Method::POST));
    assert_eq!(req.path(), Some("/a/b?x=1#frag"));
    assert_eq!(req.path_only(), Some("/a/b"));
    assert_eq!(req.protocol(), Some("HTTP/1.0"));
    assert_eq!(req.status(), None);
}

#[test]
fn test_status_line_parts() {
    let mut resp = Transfer::new(Role::Server);
    resp.set_preamble("HTTP/1.1 404 Not found").unwrap();
    assert_eq!(resp.protocol(), Some("HTTP/1.1"));
    assert_eq!(resp.status(), Some(404));
    assert_eq!(resp.status_message(), Some("Not found"));
    assert_eq!(resp.method(), None);

    resp.set_preamble("HTTP/1.1 2000 Too long").unwrap();
    assert_eq!(resp.status(), None);
}

#[test]
fn test_line_builders_validate() {
    let mut req = Transfer::new(Role::Client);
    req.set_request_line(Method::DELETE, "", "").unwrap();
    assert_eq!(req.preamble(), "DELETE / HTTP/1.1");
    assert!(matches!(
        req.set_request_line(Method::GET, "/has space", ""),
        Err(Error::InvalidArgument(_))
    ));
    assert!(req.set_status_line("", 200, "OK").is_err());

    let mut resp = Transfer::new(Role::Server);
    assert!(resp.set_status_line("", 99, "Low").is_err());
    assert!(resp.set_status_line("", 1000, "High").is_err());
    resp.set_status_line("HTTP/1.0", 302, "Found").unwrap();
    assert_eq!(resp.preamble(), "HTTP/1.0 302 Found");
}

#[test]
fn test_headers_case_insensitive_and_ordered() {
    let mut req = Transfer::new(Role::Client);
    req.add_header("Accept", "text/html").unwrap();
    req.add_header("X-Multi", "1").unwrap();
    req.add_header("x-multi", "2").unwrap();
    assert_eq!(req.header("ACCEPT"), Some("text/html"));
    assert_eq!(req.header("X-MULTI"), Some("1"));

    req.set_header("x-MULTI", "3").unwrap();
    let all: Vec<_> = req.headers().collect();
    assert_eq!(all, vec![("Accept", "text/html"), ("X-Multi", "3"), ("x-multi", "2")]);

    assert!(req.add_header("Bad Key", "v").is_err());
    assert!(req.add_header("Key", "line\r\nbreak").is_err());
    assert!(req.add_header("Key", "tab\tis fine").is_ok());
}

#[test]
fn test_header_int() {
    let mut req = Transfer::new(Role::Client);
    req.set_header_int("Content-Length", 42).unwrap();
    req.set_header("X-Weird", "12abc").unwrap();
    req.set_header("X-None", "abc").unwrap();
    assert_eq!(req.header_int("content-length", -1), 42);
    assert_eq!(req.header_int("X-Weird", -1), 12);
    assert_eq!(req.header_int("X-None", -1), -1);
    assert_eq!(req.header_int("Missing", 7), 7);
}

#[test]
fn test_query_from_path_and_form_body() {
    let mut req = request_line("POST /search?q=rust+lang&page=2&flag HTTP/1.1");
    req.set_header("Content-Type", "application/x-www-form-urlencoded").unwrap();
    req.set_body("name=J%C3%BCrgen&page=9");

    assert_eq!(req.query(), Some("q=rust+lang&page=2&flag"));
    assert_eq!(req.aux_query(), Some("name=J%C3%BCrgen&page=9"));
    assert_eq!(req.query_string("q"), Some("rust+lang"));
    assert_eq!(req.decode_query_string("q").as_deref(), Some("rust lang"));
    assert_eq!(req.decode_query_string("name").as_deref(), Some("Jürgen"));
    assert_eq!(req.query_int("page", 0), 2);
    assert_eq!(req.query_string("flag"), Some(""));
    assert!(req.query_present("flag"));
    assert!(!req.query_present("missing"));
    assert_eq!(req.query_int("missing", -5), -5);
}

#[test]
fn test_form_body_ignored_without_form_type() {
    let mut req = request_line("POST /submit HTTP/1.1");
    req.set_header("Content-Type", "text/plain").unwrap();
    req.set_body("a=1");
    assert_eq!(req.aux_query(), None);
    assert!(!req.query_present("a"));
}

#[test]
fn test_parse_query_stops_on_break() {
    let req = request_line("GET /?a=1&b=2&c=3 HTTP/1.1");
    let mut seen = Vec::new();
    let flow = req.parse_query(|key, _value| {
        seen.push(key.to_string());
        if key == "b" {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    });
    assert_eq!(flow, ControlFlow::Break(()));
    assert_eq!(seen, vec!["a", "b"]);
}

#[test]
fn test_clear_keeps_role() {
    let mut resp = Transfer::new(Role::Server);
    resp.respond(200, "OK").unwrap();
    resp.set_header("X", "y").unwrap();
    resp.set_body("body");
    resp.clear();
    assert_eq!(resp.role(), Role::Server);
    assert!(resp.preamble().is_empty());
    assert_eq!(resp.headers().count(), 0);
    assert!(resp.body().is_empty());
}
