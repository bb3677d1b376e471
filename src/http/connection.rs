//! Per-socket HTTP/1.1 state machine.
//!
//! A [`Connection`] owns one non-blocking byte stream, a read buffer and a
//! write buffer. It never waits: [`Connection::read`] performs one read and
//! decodes whatever is complete, [`Connection::write`] performs one write.
//! Whoever owns the connection decides when to call them, usually an event
//! handler driven by a [`Poller`](crate::poll::Poller).

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::rc::{Rc, Weak};

use bytes::{Buf, BytesMut};
use tracing::{debug, info, warn};

use crate::error::{Error, ParseError, Result};
use crate::http::parser::{self, MAX_LINE};
use crate::http::request::Method;
use crate::http::response::{EMERGENCY_RESPONSE, StatusCode};
use crate::http::transfer::{Role, Transfer};
use crate::http::url::split_url;
use crate::http::{websocket, writer};
use crate::server::listener::{Handler, Listener, Router};

/// Read buffer growth step.
const READ_CHUNK: usize = 1024;

/// A chunk-size line longer than this without a terminator is garbage.
const MAX_CHUNK_LINE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Between messages.
    Idle,
    /// Reading the request or status line.
    Preamble,
    /// Reading header lines.
    Header,
    /// Reading a Content-Length or chunked body.
    Body,
    /// Exchanging WebSocket frames.
    WebSocket,
    /// Upgrade request sent, waiting for the 101.
    WebSocketInitiate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    /// No descriptor.
    Defunct,
    /// Nothing queued for output.
    Read,
    /// Output is waiting to be written.
    Write,
}

/// Outcome of [`Connection::read`] that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    Open,
    /// The peer hung up and the descriptor is closed.
    Closed,
}

/// A non-blocking byte stream with a descriptor the poller can watch.
pub trait Stream: Read + Write + AsRawFd {}

impl<T: Read + Write + AsRawFd> Stream for T {}

pub type RequestFn = Box<dyn FnMut(&mut Connection, &Transfer, &mut Transfer) -> anyhow::Result<()>>;
pub type ResponseFn = Box<dyn FnMut(&mut Connection, &Transfer) -> anyhow::Result<()>>;
pub type FrameFn = Box<dyn FnMut(&mut Connection, u8, &[u8]) -> anyhow::Result<()>>;
pub type EventFn = Box<dyn FnMut(&mut Connection) -> anyhow::Result<()>>;

/// Optional callbacks a connection owner can install.
#[derive(Default)]
pub struct Delegate {
    /// Serves a request directly, bypassing listener lookup.
    pub request_ready: Option<RequestFn>,
    /// Receives each complete response on a client connection.
    pub response_ready: Option<ResponseFn>,
    /// Output buffer drained.
    pub write_complete: Option<EventFn>,
    /// Frames on a WebSocket without a listener.
    pub websocket: Option<FrameFn>,
    /// Peer hung up.
    pub eof: Option<EventFn>,
}

impl Delegate {
    pub fn on_request<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut Connection, &Transfer, &mut Transfer) -> anyhow::Result<()> + 'static,
    {
        self.request_ready = Some(Box::new(f));
        self
    }

    pub fn on_response<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut Connection, &Transfer) -> anyhow::Result<()> + 'static,
    {
        self.response_ready = Some(Box::new(f));
        self
    }

    pub fn on_write_complete<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut Connection) -> anyhow::Result<()> + 'static,
    {
        self.write_complete = Some(Box::new(f));
        self
    }

    pub fn on_websocket<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut Connection, u8, &[u8]) -> anyhow::Result<()> + 'static,
    {
        self.websocket = Some(Box::new(f));
        self
    }

    pub fn on_eof<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut Connection) -> anyhow::Result<()> + 'static,
    {
        self.eof = Some(Box::new(f));
        self
    }

    /// A response callback makes the connection a client.
    fn role(&self) -> Role {
        if self.request_ready.is_none() && self.response_ready.is_some() {
            Role::Client
        } else {
            Role::Server
        }
    }
}

/// Runs a delegate callback that takes the connection itself. The slot is
/// emptied for the duration of the call and restored afterwards, unless the
/// callback installed a replacement.
macro_rules! call_delegate {
    ($conn:ident . $slot:ident, |$cb:ident| $call:expr) => {
        match $conn.delegate.$slot.take() {
            Some(mut $cb) => {
                let result = $call;
                if $conn.delegate.$slot.is_none() {
                    $conn.delegate.$slot = Some($cb);
                }
                Some(result)
            }
            None => None,
        }
    };
}

pub struct Connection {
    role: Role,
    state: State,
    stream: Option<Box<dyn Stream>>,
    delegate: Delegate,
    rbuf: BytesMut,
    wbuf: BytesMut,
    /// The message being decoded, then the last one decoded.
    xfer: Option<Transfer>,
    body_remaining: usize,
    chunked: bool,
    /// A request was encoded on this client connection and its response has
    /// not arrived.
    awaiting_response: bool,
    remote: Option<(String, u16)>,
    ws_listener: Weak<Listener>,
    in_context: bool,
}

impl Connection {
    /// An unconnected connection; see [`Connection::connect`].
    pub fn new(delegate: Delegate) -> Self {
        Self {
            role: delegate.role(),
            state: State::Idle,
            stream: None,
            delegate,
            rbuf: BytesMut::new(),
            wbuf: BytesMut::new(),
            xfer: None,
            body_remaining: 0,
            chunked: false,
            awaiting_response: false,
            remote: None,
            ws_listener: Weak::new(),
            in_context: false,
        }
    }

    /// Takes ownership of a stream. It should already be non-blocking.
    pub fn new_handoff<S: Stream + 'static>(delegate: Delegate, stream: S) -> Self {
        Self::new_boxed(delegate, Box::new(stream))
    }

    /// Like [`Connection::new_handoff`] for a stream that is already boxed.
    pub fn new_boxed(delegate: Delegate, stream: Box<dyn Stream>) -> Self {
        let mut conn = Self::new(delegate);
        conn.stream = Some(stream);
        conn
    }

    /// Works on a duplicate of `fd`; the caller's descriptor stays open.
    pub fn new_borrow(delegate: Delegate, fd: BorrowedFd<'_>) -> Result<Self> {
        let owned = fd.try_clone_to_owned()?;
        Ok(Self::new_handoff(delegate, File::from(owned)))
    }

    /// A client connection with `request` already queued for output.
    pub fn new_client(delegate: Delegate, request: &Transfer) -> Result<Self> {
        if request.role() != Role::Client {
            return Err(Error::InvalidArgument("client connection needs a request"));
        }
        let mut conn = Self::new(delegate);
        conn.role = Role::Client;
        conn.encode_transfer(request)?;
        Ok(conn)
    }

    /// Builds a request for `url`, queues it and connects to the URL's host.
    pub fn new_request(
        delegate: Delegate,
        method: Method,
        url: &str,
        content_type: Option<&str>,
        body: Option<&[u8]>,
    ) -> Result<Self> {
        let url = split_url(url)?;
        let request = Transfer::new_request(method, &url.path, content_type, body)?;
        let mut conn = Self::new_client(delegate, &request)?;
        conn.connect(&url.host, if url.port == 0 { 80 } else { url.port })?;
        Ok(conn)
    }

    pub fn new_tcp_client(delegate: Delegate, host: &str, port: u16) -> Result<Self> {
        let mut conn = Self::new(delegate);
        conn.role = Role::Client;
        conn.connect(host, port)?;
        Ok(conn)
    }

    /// Opens a TCP connection. The connect itself blocks; the stream is
    /// non-blocking afterwards.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        if self.stream.is_some() {
            return Err(Error::InvalidArgument("connection already has a descriptor"));
        }
        if host.is_empty() {
            return Err(Error::InvalidArgument("empty host"));
        }
        let stream = TcpStream::connect((host, port))?;
        stream.set_nonblocking(true)?;
        debug!(host, port, fd = stream.as_raw_fd(), "connected");
        self.stream = Some(Box::new(stream));
        self.remote = Some((host.to_string(), port));
        Ok(())
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn fd(&self) -> Option<RawFd> {
        self.stream.as_ref().map(|s| s.as_raw_fd())
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn io_status(&self) -> IoStatus {
        if self.stream.is_none() {
            IoStatus::Defunct
        } else if self.wants_write() {
            IoStatus::Write
        } else {
            IoStatus::Read
        }
    }

    pub fn wants_write(&self) -> bool {
        !self.wbuf.is_empty()
    }

    /// Between messages with no response outstanding.
    pub fn is_idle(&self) -> bool {
        self.state == State::Idle && !self.awaiting_response
    }

    pub fn remote(&self) -> Option<(&str, u16)> {
        self.remote.as_ref().map(|(host, port)| (host.as_str(), *port))
    }

    /// The message being decoded, or the last one completed.
    pub fn transfer(&self) -> Option<&Transfer> {
        self.xfer.as_ref()
    }

    pub fn delegate_mut(&mut self) -> &mut Delegate {
        &mut self.delegate
    }

    pub fn in_context(&self) -> bool {
        self.in_context
    }

    pub(crate) fn set_in_context(&mut self, in_context: bool) {
        self.in_context = in_context;
    }

    /// Output waiting to be written.
    pub fn pending_output(&self) -> &[u8] {
        &self.wbuf
    }

    /// Closes the descriptor, if owned, and forgets it.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            debug!(fd = stream.as_raw_fd(), "closing connection");
        }
    }

    /// Queues a message for output.
    pub fn encode_transfer(&mut self, xfer: &Transfer) -> Result<()> {
        writer::encode_transfer(&mut self.wbuf, xfer)?;
        if self.role == Role::Client {
            self.awaiting_response = true;
        }
        Ok(())
    }

    /// Queues one WebSocket frame.
    pub fn send_websocket(&mut self, opcode: u8, payload: &[u8]) -> Result<()> {
        if !matches!(self.state, State::WebSocket | State::WebSocketInitiate) {
            return Err(Error::InvalidArgument("connection is not a websocket"));
        }
        if self.stream.is_none() {
            return Err(Error::Closed);
        }
        websocket::encode_frame(&mut self.wbuf, opcode, payload)
    }

    /// Queues the client upgrade request.
    pub fn initiate_websocket(&mut self) -> Result<()> {
        if self.stream.is_none() {
            return Err(Error::Closed);
        }
        if matches!(self.state, State::WebSocket | State::WebSocketInitiate) {
            return Err(Error::InvalidArgument("websocket already initiated"));
        }
        self.wbuf.extend_from_slice(websocket::CLIENT_HANDSHAKE);
        self.state = State::WebSocketInitiate;
        Ok(())
    }

    /// Writes as much queued output as the socket takes in one call.
    pub fn write(&mut self) -> Result<()> {
        if self.wbuf.is_empty() {
            return Ok(());
        }
        let stream = self.stream.as_mut().ok_or(Error::Closed)?;
        let written = match stream.write(&self.wbuf) {
            Ok(0) => return Err(Error::Closed),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        self.wbuf.advance(written);
        if self.wbuf.is_empty() {
            if let Some(result) = call_delegate!(self.write_complete, |cb| cb(self)) {
                result.map_err(Error::Handler)?;
            }
        }
        Ok(())
    }

    /// Reads once and processes every complete unit of input.
    ///
    /// `WouldBlock` comes back as an error so callers can clear readiness.
    /// A hang-up closes the descriptor; it is reported as
    /// [`ReadStatus::Closed`] when the connection was between messages or
    /// something was listening for the close, and as [`Error::Closed`]
    /// otherwise.
    pub fn read(&mut self, router: Option<&dyn Router>) -> Result<ReadStatus> {
        let stream = self.stream.as_mut().ok_or(Error::Closed)?;
        if self.rbuf.capacity() == self.rbuf.len() {
            self.rbuf.reserve(READ_CHUNK);
        }
        let start = self.rbuf.len();
        self.rbuf.resize(self.rbuf.capacity(), 0);
        let eof = match stream.read(&mut self.rbuf[start..]) {
            Ok(0) => {
                self.rbuf.truncate(start);
                true
            }
            Ok(n) => {
                self.rbuf.truncate(start + n);
                false
            }
            Err(e) => {
                self.rbuf.truncate(start);
                match e.kind() {
                    io::ErrorKind::WouldBlock => return Err(e.into()),
                    io::ErrorKind::Interrupted => return Ok(ReadStatus::Open),
                    _ => {
                        debug!(error = %e, "read failed");
                        true
                    }
                }
            }
        };

        if eof {
            let listening = self.delegate.eof.is_some() || self.state == State::WebSocket;
            self.hang_up()?;
            self.drain_input(router)?;
            if self.state == State::Idle || listening {
                return Ok(ReadStatus::Closed);
            }
            return Err(Error::Closed);
        }

        self.drain_input(router)?;
        Ok(ReadStatus::Open)
    }

    fn hang_up(&mut self) -> Result<()> {
        if let Some(result) = call_delegate!(self.eof, |cb| cb(self)) {
            result.map_err(Error::Handler)?;
        } else if self.state == State::WebSocket {
            self.deliver_frame(websocket::OPCODE_CLOSE, &[])?;
        }
        self.close();
        Ok(())
    }

    fn drain_input(&mut self, router: Option<&dyn Router>) -> Result<()> {
        let mut input = std::mem::take(&mut self.rbuf);
        let result = loop {
            if input.is_empty() {
                break Ok(());
            }
            match self.advance(&mut input, router) {
                Ok(0) => break Ok(()),
                Ok(n) if n <= input.len() => input.advance(n),
                Ok(_) => break Err(Error::Protocol("consumed past end of input")),
                Err(e) => break Err(e),
            }
        };
        if let Err(e) = &result {
            warn!(error = %e, state = ?self.state, "error parsing HTTP input");
            input.clear();
        }
        self.rbuf = input;
        result
    }

    /// Consumes one unit from the front of `src`. Zero means more input is
    /// needed.
    fn advance(&mut self, src: &mut [u8], router: Option<&dyn Router>) -> Result<usize> {
        match self.state {
            State::Idle | State::Preamble => {
                let blank = src.iter().take_while(|&&b| b <= 0x20).count();
                if blank > 0 {
                    return Ok(blank);
                }
                self.state = State::Preamble;
                let Some(len) = Self::measure_line(src)? else {
                    return Ok(0);
                };
                self.receive_preamble(&src[..len])?;
                Ok(len)
            }
            State::Header => {
                let Some(len) = Self::measure_line(src)? else {
                    return Ok(0);
                };
                self.receive_header(&src[..len], router)?;
                Ok(len)
            }
            State::Body => self.receive_body(src, router),
            State::WebSocket => self.receive_websocket(src),
            State::WebSocketInitiate => self.receive_websocket_ack(src),
        }
    }

    fn measure_line(src: &[u8]) -> Result<Option<usize>> {
        match parser::measure_line(src) {
            Some(len) => Ok(Some(len)),
            None if src.len() > MAX_LINE => Err(ParseError::LineTooLong.into()),
            None => Ok(None),
        }
    }

    fn receive_preamble(&mut self, line: &[u8]) -> Result<()> {
        let text = std::str::from_utf8(line).map_err(|_| ParseError::InvalidRequest)?;
        let mut xfer = Transfer::new(self.role.opposite());
        if let Err(e) = xfer.set_preamble(text) {
            warn!(preamble = %text.trim_end(), "error parsing HTTP preamble");
            return Err(e);
        }
        self.xfer = Some(xfer);
        self.state = State::Header;
        Ok(())
    }

    fn receive_header(&mut self, line: &[u8], router: Option<&dyn Router>) -> Result<()> {
        let text = std::str::from_utf8(line).map_err(|_| ParseError::InvalidHeader)?;
        match parser::parse_header_line(text)? {
            None => self.end_of_headers(router),
            Some((key, value)) => {
                let xfer = self
                    .xfer
                    .as_mut()
                    .ok_or(Error::Protocol("header before preamble"))?;
                xfer.add_header(key, value)
                    .map_err(|_| ParseError::InvalidHeader)?;
                Ok(())
            }
        }
    }

    fn end_of_headers(&mut self, router: Option<&dyn Router>) -> Result<()> {
        let xfer = self
            .xfer
            .as_ref()
            .ok_or(Error::Protocol("headers without preamble"))?;
        let length = xfer.header_int("Content-Length", -1);
        if length > 0 {
            self.body_remaining = usize::try_from(length).map_err(|_| ParseError::InvalidHeader)?;
            self.chunked = false;
            self.state = State::Body;
            return Ok(());
        }
        if xfer
            .header("Transfer-Encoding")
            .is_some_and(|te| te.eq_ignore_ascii_case("chunked"))
        {
            self.body_remaining = 0;
            self.chunked = true;
            self.state = State::Body;
            return Ok(());
        }
        self.respond(router)
    }

    fn receive_body(&mut self, src: &[u8], router: Option<&dyn Router>) -> Result<usize> {
        if self.body_remaining > 0 {
            let n = self.body_remaining.min(src.len());
            let xfer = self
                .xfer
                .as_mut()
                .ok_or(Error::Protocol("body without preamble"))?;
            xfer.body_mut().extend_from_slice(&src[..n]);
            self.body_remaining -= n;
            if self.body_remaining == 0 && !self.chunked {
                self.respond(router)?;
            }
            return Ok(n);
        }
        if !self.chunked {
            return Err(Error::Protocol("body state without framing"));
        }
        let Some(len) = parser::measure_line(src) else {
            if src.len() > MAX_CHUNK_LINE {
                return Err(ParseError::InvalidChunk.into());
            }
            return Ok(0);
        };
        match parser::parse_chunk_size(&src[..len])? {
            None => {}
            Some(0) => self.respond(router)?,
            Some(size) => self.body_remaining = size,
        }
        Ok(len)
    }

    /// A message is complete.
    fn respond(&mut self, router: Option<&dyn Router>) -> Result<()> {
        self.state = State::Idle;
        match self.role {
            Role::Client => self.deliver_response(),
            Role::Server => self.serve_request(router),
        }
    }

    fn deliver_response(&mut self) -> Result<()> {
        self.awaiting_response = false;
        let Some(response) = self.xfer.take() else {
            return Ok(());
        };
        let result = call_delegate!(self.response_ready, |cb| cb(self, &response));
        self.xfer = Some(response);
        if let Some(result) = result {
            result.map_err(Error::Handler)?;
        }
        Ok(())
    }

    fn serve_request(&mut self, router: Option<&dyn Router>) -> Result<()> {
        let Some(request) = self.xfer.take() else {
            return self.emergency_response();
        };
        let built = self.build_response(&request, router).and_then(|(response, listener)| {
            writer::encode_transfer(&mut self.wbuf, &response)?;
            Ok((response, listener))
        });
        let (response, listener) = match built {
            Ok(built) => built,
            Err(e) => {
                warn!(error = %e, "failed to produce a response");
                self.xfer = Some(request);
                return self.emergency_response();
            }
        };
        log_transaction(&request, Some(&response));

        let mut connected = Ok(());
        if self.state == State::WebSocket {
            if let Some(listener) = listener {
                if let Handler::WebSocket {
                    on_connect: Some(on_connect),
                    ..
                } = listener.handler()
                {
                    connected = on_connect(self, &request);
                }
            }
        }
        self.xfer = Some(request);
        connected.map_err(Error::Handler)
    }

    fn build_response(
        &mut self,
        request: &Transfer,
        router: Option<&dyn Router>,
    ) -> Result<(Transfer, Option<Rc<Listener>>)> {
        let mut response = Transfer::new(Role::Server);
        let mut matched = None;

        let served = call_delegate!(self.request_ready, |cb| cb(self, request, &mut response));
        if let Some(result) = served {
            if let Err(e) = result {
                warn!(error = %e, path = request.path().unwrap_or("?"), "request handler failed");
                response.set_listener_failure()?;
            }
        } else {
            match router.and_then(|r| r.find_listener(request)) {
                None => response.set_not_found()?,
                Some(listener) => {
                    match listener.handler() {
                        Handler::Request(handle) => {
                            if let Err(e) = handle(request, &mut response) {
                                warn!(error = %e, path = request.path().unwrap_or("?"), "listener failed");
                                response.set_listener_failure()?;
                            }
                        }
                        Handler::WebSocket { .. } => {
                            if let Err(e) = self.accept_websocket(request, &mut response, &listener) {
                                warn!(error = %e, "websocket handshake failed");
                                response.set_websocket_failure()?;
                            }
                        }
                    }
                    matched = Some(listener);
                }
            }
        }

        response.sanitize(request)?;
        Ok((response, matched))
    }

    fn accept_websocket(
        &mut self,
        request: &Transfer,
        response: &mut Transfer,
        listener: &Rc<Listener>,
    ) -> Result<()> {
        websocket::handshake(request, response)?;
        self.state = State::WebSocket;
        self.ws_listener = Rc::downgrade(listener);
        Ok(())
    }

    /// Replaces any queued output with the canned 500. Cannot fail.
    fn emergency_response(&mut self) -> Result<()> {
        if let Some(request) = &self.xfer {
            log_transaction(request, None);
        }
        self.wbuf.clear();
        self.wbuf.extend_from_slice(EMERGENCY_RESPONSE);
        Ok(())
    }

    fn receive_websocket(&mut self, src: &mut [u8]) -> Result<usize> {
        let Some(frame) = websocket::decode_frame(src)? else {
            return Ok(0);
        };
        self.deliver_frame(frame.opcode, &src[frame.payload.clone()])?;
        Ok(frame.consumed)
    }

    fn deliver_frame(&mut self, opcode: u8, payload: &[u8]) -> Result<()> {
        if let Some(listener) = self.ws_listener.upgrade() {
            if let Handler::WebSocket {
                on_message: Some(on_message),
                ..
            } = listener.handler()
            {
                return on_message(self, opcode, payload).map_err(Error::Handler);
            }
        }
        if let Some(result) = call_delegate!(self.websocket, |cb| cb(self, opcode, payload)) {
            result.map_err(Error::Handler)?;
        }
        Ok(())
    }

    fn receive_websocket_ack(&mut self, src: &[u8]) -> Result<usize> {
        let Some(len) = parser::find_headers_end(src) else {
            if src.len() > MAX_LINE {
                return Err(ParseError::LineTooLong.into());
            }
            return Ok(0);
        };
        let status = parser::status_code(&src[..len])?;
        if status != StatusCode::SwitchingProtocols.as_u16() {
            warn!(status, "websocket upgrade refused");
            return Err(Error::Protocol("websocket upgrade refused"));
        }
        self.state = State::WebSocket;
        Ok(len)
    }
}

/// One line per server transaction.
fn log_transaction(request: &Transfer, response: Option<&Transfer>) {
    let status = response
        .and_then(Transfer::status)
        .unwrap_or(500);
    let method = request.method().filter(|m| !m.is_empty()).unwrap_or("?");
    let path = request.path().filter(|p| !p.is_empty()).unwrap_or("?");
    let body_len = response.map_or(0, |r| r.body().len());
    info!(status, method, path, body_len, "transaction");
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("fd", &self.fd())
            .field("pending_output", &self.wbuf.len())
            .field("remote", &self.remote)
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
