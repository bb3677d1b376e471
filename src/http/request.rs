use std::fmt;

use crate::error::{Error, Result};
use crate::http::mime::guess_content_type;
use crate::http::transfer::{Role, Transfer};

/// HTTP request methods.
///
/// Method names are matched case-insensitively on the wire and always
/// written in uppercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// PATCH - Partial modification of a resource
    PATCH,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// CONNECT - Establish a tunnel
    CONNECT,
}

impl Method {
    pub const ALL: [Method; 8] = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::PATCH,
        Method::HEAD,
        Method::OPTIONS,
        Method::CONNECT,
    ];

    /// Parses an HTTP method name.
    ///
    /// # Example
    ///
    /// ```
    /// # use courier::http::request::Method;
    /// assert_eq!(Method::eval("GET"), Some(Method::GET));
    /// assert_eq!(Method::eval("get"), Some(Method::GET));
    /// assert_eq!(Method::eval("FETCH"), None);
    /// ```
    pub fn eval(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|method| method.as_str().eq_ignore_ascii_case(s))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::PATCH => "PATCH",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::CONNECT => "CONNECT",
        }
    }

    /// Whether a request with this method carries a body, and therefore a
    /// `Content-Length`, when encoded.
    pub fn expects_body(&self) -> bool {
        !matches!(self, Method::GET | Method::DELETE | Method::OPTIONS)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Transfer {
    /// Builds a client request for `path`.
    ///
    /// When a body is given, `Content-Type` is set to `content_type` or,
    /// failing that, to a type sniffed from the body bytes.
    ///
    /// # Example
    ///
    /// ```
    /// # use courier::http::request::Method;
    /// # use courier::http::transfer::Transfer;
    /// let req = Transfer::new_request(Method::POST, "/notes", None, Some(&b"hi"[..])).unwrap();
    /// assert_eq!(req.preamble(), "POST /notes HTTP/1.1");
    /// assert_eq!(req.header("Content-Type"), Some("text/plain"));
    /// ```
    pub fn new_request(
        method: Method,
        path: &str,
        content_type: Option<&str>,
        body: Option<&[u8]>,
    ) -> Result<Transfer> {
        let mut request = Transfer::new(Role::Client);
        request.set_request_line(method, path, "")?;
        if let Some(body) = body {
            let content_type = match content_type {
                Some(ct) if !ct.is_empty() => ct,
                _ => guess_content_type(None, body),
            };
            request
                .add_header("Content-Type", content_type)
                .map_err(|_| Error::InvalidArgument("invalid content type"))?;
            request.set_body(body);
        }
        Ok(request)
    }
}
