use crate::error::Result;
use crate::http::mime::guess_content_type;
use crate::http::transfer::Transfer;

/// Written verbatim when no response could be built or encoded.
pub const EMERGENCY_RESPONSE: &[u8] =
    b"HTTP/1.1 500 Internal server error\r\nContent-Length: 0\r\n\r\n";

/// Status codes the engine produces itself:
/// - `SwitchingProtocols` (101): WebSocket upgrade accepted
/// - `Ok` (200): Request successful
/// - `NotFound` (404): Resource not found
/// - `MethodNotAllowed` (405): HTTP method not supported
/// - `InternalServerError` (500): Server error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 101 Switching Protocols
    SwitchingProtocols,
    /// 200 OK
    Ok,
    /// 404 Not Found
    NotFound,
    /// 405 Method Not Allowed
    MethodNotAllowed,
    /// 500 Internal Server Error
    InternalServerError,
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use courier::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::NotFound.as_u16(), 404);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::SwitchingProtocols => 101,
            StatusCode::Ok => 200,
            StatusCode::NotFound => 404,
            StatusCode::MethodNotAllowed => 405,
            StatusCode::InternalServerError => 500,
        }
    }

    /// Returns the reason phrase this engine writes for the status.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::SwitchingProtocols => "Switching Protocols",
            StatusCode::Ok => "OK",
            StatusCode::NotFound => "Not found",
            StatusCode::MethodNotAllowed => "Method Not Allowed",
            StatusCode::InternalServerError => "Internal server error",
        }
    }
}

impl Transfer {
    /// Resets the transfer and writes a status line with the default
    /// protocol.
    ///
    /// # Example
    ///
    /// ```
    /// # use courier::http::transfer::{Role, Transfer};
    /// let mut resp = Transfer::new(Role::Server);
    /// resp.respond(404, "Not found").unwrap();
    /// assert_eq!(resp.preamble(), "HTTP/1.1 404 Not found");
    /// ```
    pub fn respond(&mut self, status: u16, message: &str) -> Result<()> {
        self.clear();
        self.set_status_line("", status, message)
    }

    pub fn respond_with(&mut self, status: StatusCode) -> Result<()> {
        self.respond(status.as_u16(), status.reason_phrase())
    }

    pub(crate) fn set_not_found(&mut self) -> Result<()> {
        self.respond_with(StatusCode::NotFound)
    }

    pub(crate) fn set_listener_failure(&mut self) -> Result<()> {
        self.respond_with(StatusCode::InternalServerError)
    }

    pub(crate) fn set_websocket_failure(&mut self) -> Result<()> {
        self.respond_with(StatusCode::InternalServerError)
    }

    /// Fills in what a handler left out: a `200 OK` status line and, for a
    /// non-empty body, a `Content-Type` guessed from the request path.
    pub(crate) fn sanitize(&mut self, request: &Transfer) -> Result<()> {
        if self.preamble().is_empty() {
            self.respond_keeping_content(StatusCode::Ok)?;
        }
        if !self.body().is_empty() && self.header("Content-Type").is_none() {
            let content_type = guess_content_type(request.path_only(), self.body());
            self.set_header("Content-Type", content_type)?;
        }
        Ok(())
    }

    fn respond_keeping_content(&mut self, status: StatusCode) -> Result<()> {
        self.set_status_line("", status.as_u16(), status.reason_phrase())
    }
}
