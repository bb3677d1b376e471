//! Line-level decoding helpers used by the connection state machine.
//!
//! Nothing here buffers: each function looks at the bytes it is given and
//! either decodes a complete unit or reports that more input is needed.

use crate::error::ParseError;

/// Longest preamble or header line accepted before giving up on a peer.
pub const MAX_LINE: usize = 64 * 1024;

/// Length of the first line in `src` including its `\n`, if complete.
///
/// # Example
///
/// ```
/// # use courier::http::parser::measure_line;
/// assert_eq!(measure_line(b"GET / HTTP/1.1\r\nHost"), Some(16));
/// assert_eq!(measure_line(b"partial"), None);
/// ```
pub fn measure_line(src: &[u8]) -> Option<usize> {
    src.iter().position(|&b| b == b'\n').map(|i| i + 1)
}

/// Length of a header block including the blank line that ends it.
pub fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| i + 4)
}

/// Splits a header line at its first `:`.
///
/// Returns `Ok(None)` for the blank line that ends a header block.
pub fn parse_header_line(line: &str) -> Result<Option<(&str, &str)>, ParseError> {
    let line = line.trim_matches(|c: char| c <= ' ');
    if line.is_empty() {
        return Ok(None);
    }
    let (key, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;
    let key = key.trim_end_matches(|c: char| c <= ' ');
    if key.is_empty() {
        return Err(ParseError::InvalidHeader);
    }
    Ok(Some((key, value.trim_matches(|c: char| c <= ' '))))
}

/// Parses a chunk-size line. `Ok(None)` means the line was blank, which is
/// the CRLF that trails each chunk's data. Chunk extensions are ignored.
pub fn parse_chunk_size(line: &[u8]) -> Result<Option<usize>, ParseError> {
    let end = line.iter().position(|&b| b == b';').unwrap_or(line.len());
    let token = line[..end].trim_ascii();
    if token.is_empty() {
        return Ok(None);
    }
    let mut size = 0usize;
    for &b in token {
        let digit = (b as char).to_digit(16).ok_or(ParseError::InvalidChunk)?;
        size = size
            .checked_mul(16)
            .and_then(|s| s.checked_add(digit as usize))
            .ok_or(ParseError::InvalidChunk)?;
    }
    Ok(Some(size))
}

/// Status code from the first line of a response header block.
pub fn status_code(head: &[u8]) -> Result<u16, ParseError> {
    let line = &head[..measure_line(head).unwrap_or(head.len())];
    let mut tokens = line
        .split(|&b| b <= 0x20)
        .filter(|token| !token.is_empty());
    let _protocol = tokens.next().ok_or(ParseError::InvalidRequest)?;
    let code = tokens.next().ok_or(ParseError::InvalidRequest)?;
    if code.len() != 3 || !code.iter().all(u8::is_ascii_digit) {
        return Err(ParseError::InvalidRequest);
    }
    Ok(code.iter().fold(0u16, |acc, &b| acc * 10 + u16::from(b - b'0')))
}

/// Parses an optionally signed run of leading decimal digits.
///
/// # Example
///
/// ```
/// # use courier::http::parser::parse_int;
/// assert_eq!(parse_int(" 42"), Some(42));
/// assert_eq!(parse_int("-7px"), Some(-7));
/// assert_eq!(parse_int("abc"), None);
/// ```
pub fn parse_int(src: &str) -> Option<i64> {
    let src = src.trim_matches(|c: char| c <= ' ');
    let (negative, digits) = match src.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, src.strip_prefix('+').unwrap_or(src)),
    };
    let end = digits
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    let value: i64 = digits[..end].parse().ok()?;
    Some(if negative { -value } else { value })
}

/// Decodes `%XX` escapes and `+` as space. Malformed escapes pass through.
pub fn url_decode(src: &str) -> String {
    let bytes = src.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' => match bytes.get(i + 1..i + 3).and_then(|h| hex_pair(h[0], h[1])) {
                Some(decoded) => {
                    out.push(decoded);
                    i += 2;
                }
                None => out.push(b'%'),
            },
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    Some((hi * 16 + lo) as u8)
}
