//! A single HTTP message: either a request or a response.
//!
//! The preamble (request line or status line) is stored as one string and
//! its parts are read on demand. Headers keep their insertion order and
//! are matched case-insensitively.

use std::ops::ControlFlow;

use crate::error::{Error, ParseError, Result};
use crate::http::parser::{parse_int, url_decode};
use crate::http::request::Method;

pub const DEFAULT_PROTOCOL: &str = "HTTP/1.1";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Which side of the exchange produced a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The transfer is a request.
    Client,
    /// The transfer is a response.
    Server,
}

impl Role {
    pub fn opposite(self) -> Role {
        match self {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Transfer {
    role: Role,
    preamble: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

fn is_space(b: u8) -> bool {
    b <= 0x20
}

fn trim_space(s: &str) -> &str {
    s.trim_matches(|c: char| c <= ' ')
}

/// Splits off the first whitespace-delimited token. The remainder comes back
/// without its leading whitespace.
fn split_token(src: &str) -> (&str, &str) {
    let end = src.bytes().position(is_space).unwrap_or(src.len());
    let (token, rest) = src.split_at(end);
    (token, rest.trim_start_matches(|c: char| c <= ' '))
}

fn has_control(s: &str) -> bool {
    s.bytes().any(|b| b < 0x20 && b != b'\t')
}

fn check_header(key: &str, value: &str) -> Result<()> {
    if key.is_empty() || key.bytes().any(|b| is_space(b) || b == b':') || has_control(value) {
        return Err(Error::InvalidArgument("invalid header"));
    }
    Ok(())
}

/// Iterates the `key[=value]` pairs of a `&`-separated query.
fn split_query(src: &str) -> impl Iterator<Item = (&str, Option<&str>)> {
    let mut rest = src;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let (pair, tail) = match rest.find('&') {
            Some(i) => (&rest[..i], &rest[i + 1..]),
            None => (rest, ""),
        };
        rest = tail;
        Some(match pair.find('=') {
            Some(i) => (&pair[..i], Some(&pair[i + 1..])),
            None => (pair, None),
        })
    })
}

impl Transfer {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            preamble: String::new(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Drops the preamble, headers and body. The role is kept.
    pub fn clear(&mut self) {
        self.preamble.clear();
        self.headers.clear();
        self.body.clear();
    }

    pub fn preamble(&self) -> &str {
        &self.preamble
    }

    /// Stores a raw preamble line, trimming surrounding whitespace.
    pub fn set_preamble(&mut self, line: &str) -> Result<()> {
        let line = trim_space(line);
        if has_control(line) {
            return Err(ParseError::InvalidRequest.into());
        }
        self.preamble = line.to_string();
        Ok(())
    }

    /// Writes `METHOD PATH PROTOCOL`. An empty path becomes `/` and an empty
    /// protocol becomes `HTTP/1.1`.
    pub fn set_request_line(&mut self, method: Method, path: &str, protocol: &str) -> Result<()> {
        if self.role != Role::Client {
            return Err(Error::InvalidArgument("request line on a response"));
        }
        let path = if path.is_empty() { "/" } else { path };
        let protocol = if protocol.is_empty() { DEFAULT_PROTOCOL } else { protocol };
        if path.bytes().chain(protocol.bytes()).any(is_space) {
            return Err(Error::InvalidArgument("request line contains whitespace"));
        }
        self.preamble = format!("{} {} {}", method.as_str(), path, protocol);
        Ok(())
    }

    /// Writes `PROTOCOL STATUS MESSAGE`. The status must be three digits.
    pub fn set_status_line(&mut self, protocol: &str, status: u16, message: &str) -> Result<()> {
        if self.role != Role::Server {
            return Err(Error::InvalidArgument("status line on a request"));
        }
        if !(100..=999).contains(&status) {
            return Err(Error::InvalidArgument("status out of range"));
        }
        let protocol = if protocol.is_empty() { DEFAULT_PROTOCOL } else { protocol };
        if protocol.bytes().any(is_space) || has_control(message) {
            return Err(Error::InvalidArgument("invalid status line"));
        }
        self.preamble = format!("{} {} {}", protocol, status, message);
        Ok(())
    }

    /// First token of a request line.
    pub fn method(&self) -> Option<&str> {
        if self.role != Role::Client {
            return None;
        }
        Some(split_token(&self.preamble).0)
    }

    pub fn parse_method(&self) -> Option<Method> {
        self.method().and_then(Method::eval)
    }

    /// Second token of a request line, including any query and fragment.
    pub fn path(&self) -> Option<&str> {
        if self.role != Role::Client {
            return None;
        }
        let (_, rest) = split_token(&self.preamble);
        Some(split_token(rest).0)
    }

    /// The path up to the first `?` or `#`.
    pub fn path_only(&self) -> Option<&str> {
        let path = self.path()?;
        let end = path.find(['?', '#']).unwrap_or(path.len());
        Some(&path[..end])
    }

    pub fn protocol(&self) -> Option<&str> {
        match self.role {
            Role::Client => {
                let (_, rest) = split_token(&self.preamble);
                Some(split_token(rest).1)
            }
            Role::Server => Some(split_token(&self.preamble).0),
        }
    }

    pub fn status(&self) -> Option<u16> {
        if self.role != Role::Server {
            return None;
        }
        let (_, rest) = split_token(&self.preamble);
        let (code, _) = split_token(rest);
        if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        code.parse().ok().filter(|s| (100..=999).contains(s))
    }

    pub fn status_message(&self) -> Option<&str> {
        if self.role != Role::Server {
            return None;
        }
        let (_, rest) = split_token(&self.preamble);
        Some(split_token(rest).1)
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Reads a header as an integer, falling back when it is absent or has
    /// no leading digits.
    pub fn header_int(&self, key: &str, fallback: i64) -> i64 {
        self.header(key).and_then(parse_int).unwrap_or(fallback)
    }

    /// Replaces the first header with a matching key, or appends one.
    pub fn set_header(&mut self, key: &str, value: &str) -> Result<()> {
        check_header(key, value)?;
        match self.headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
            Some(slot) => slot.1 = value.to_string(),
            None => self.headers.push((key.to_string(), value.to_string())),
        }
        Ok(())
    }

    /// Appends a header even if one with the same key exists.
    pub fn add_header(&mut self, key: &str, value: &str) -> Result<()> {
        check_header(key, value)?;
        self.headers.push((key.to_string(), value.to_string()));
        Ok(())
    }

    pub fn set_header_int(&mut self, key: &str, value: i64) -> Result<()> {
        self.set_header(key, &value.to_string())
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Vec<u8> {
        &mut self.body
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = body.into();
    }

    /// The part of the path after `?`.
    pub fn query(&self) -> Option<&str> {
        let path = self.path()?;
        path.find('?').map(|i| &path[i + 1..])
    }

    /// The body, when it is a form submission.
    pub fn aux_query(&self) -> Option<&str> {
        if self.header("Content-Type") != Some(FORM_CONTENT_TYPE) {
            return None;
        }
        std::str::from_utf8(&self.body).ok()
    }

    /// All query pairs: the path query first, then a form body.
    pub fn query_pairs(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.query().into_iter().chain(self.aux_query()).flat_map(split_query)
    }

    /// Feeds every query pair to `visit` until it breaks.
    pub fn parse_query<F>(&self, mut visit: F) -> ControlFlow<()>
    where
        F: FnMut(&str, Option<&str>) -> ControlFlow<()>,
    {
        for (key, value) in self.query_pairs() {
            if visit(key, value).is_break() {
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Raw value of the first pair named `key`. A key without `=` yields an
    /// empty value.
    pub fn query_string(&self, key: &str) -> Option<&str> {
        self.query_pairs()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.unwrap_or(""))
    }

    pub fn query_int(&self, key: &str, fallback: i64) -> i64 {
        self.query_string(key).and_then(parse_int).unwrap_or(fallback)
    }

    /// Percent-decoded value of the first pair named `key`.
    pub fn decode_query_string(&self, key: &str) -> Option<String> {
        self.query_string(key).map(url_decode)
    }

    pub fn query_present(&self, key: &str) -> bool {
        self.query_pairs().any(|(k, _)| k == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_token_skips_runs_of_whitespace() {
        assert_eq!(split_token("GET   /x HTTP/1.1"), ("GET", "/x HTTP/1.1"));
        assert_eq!(split_token("alone"), ("alone", ""));
    }

    #[test]
    fn test_split_query_empty_segments() {
        let pairs: Vec<_> = split_query("a&&b=2&").collect();
        assert_eq!(pairs, vec![("a", None), ("", None), ("b", Some("2"))]);
        assert_eq!(split_query("").count(), 0);
    }
}
