//! Content-Type guessing from a path suffix or, failing that, the body.

const OCTET_STREAM: &str = "application/octet-stream";

/// How much of the body the text heuristic looks at.
const TEXT_SNIFF_LEN: usize = 256;

/// Guesses a MIME type.
///
/// A known path suffix wins. Otherwise the body is checked for a handful of
/// magic numbers, then for "looks like text".
///
/// # Example
///
/// ```
/// # use courier::http::mime::guess_content_type;
/// assert_eq!(guess_content_type(Some("/a/b.JPG"), b""), "image/jpeg");
/// assert_eq!(guess_content_type(None, b"\x89PNG\r\n\x1a\n...."), "image/png");
/// assert_eq!(guess_content_type(None, b"{\"a\":1}"), "application/json");
/// assert_eq!(guess_content_type(None, b"hello\n"), "text/plain");
/// ```
pub fn guess_content_type(path: Option<&str>, body: &[u8]) -> &'static str {
    if let Some(known) = path.and_then(suffix).and_then(from_suffix) {
        return known;
    }
    if body.is_empty() {
        return OCTET_STREAM;
    }
    if let Some(known) = from_signature(body) {
        return known;
    }
    if !looks_like_text(body) {
        return OCTET_STREAM;
    }
    if body.starts_with(b"<!DOCTYPE html>") {
        "text/html"
    } else if body.starts_with(b"<?xml") {
        "application/xml"
    } else if body[0] == b'{' {
        "application/json"
    } else {
        "text/plain"
    }
}

/// The text after the last `.` of the last path segment.
fn suffix(path: &str) -> Option<&str> {
    let segment = path.rsplit('/').next().unwrap_or(path);
    let dot = segment.rfind('.')?;
    let sfx = &segment[dot + 1..];
    (1..=8).contains(&sfx.len()).then_some(sfx)
}

fn from_suffix(sfx: &str) -> Option<&'static str> {
    let known = match sfx.to_ascii_lowercase().as_str() {
        "js" => "application/javascript",
        "css" => "text/css",
        "xml" => "application/xml",
        "png" => "image/png",
        "gif" => "image/gif",
        "mid" => "audio/midi",
        "wav" => "audio/wave",
        "txt" => "text/plain",
        "htm" | "html" => "text/html",
        "jpg" | "jpeg" => "image/jpeg",
        "json" => "application/json",
        "wasm" => "application/wasm",
        _ => return None,
    };
    Some(known)
}

fn from_signature(body: &[u8]) -> Option<&'static str> {
    if body.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if body.starts_with(b"GIF87a") || body.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if body.len() >= 8 && body.starts_with(b"MThd\0\0\0") {
        Some("audio/midi")
    } else if body.starts_with(b"\0asm") {
        Some("application/wasm")
    } else {
        None
    }
}

/// Bytes that never occur in UTF-8, or C0 controls other than HT, LF and CR,
/// mark the body as binary.
fn looks_like_text(body: &[u8]) -> bool {
    body.iter()
        .take(TEXT_SNIFF_LEN)
        .all(|&b| b < 0xf8 && (b >= 0x20 || matches!(b, b'\t' | b'\n' | b'\r')))
}
