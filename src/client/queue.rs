//! Serialized requests to a single host
//!
//! One persistent connection carries at most one request at a time; the
//! rest wait in a FIFO. A second, independent connection can be upgraded
//! to WebSocket for push-style traffic from the same host.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::http::connection::{Connection, Delegate, FrameFn, ReadStatus};
use crate::http::request::Method;
use crate::http::transfer::{Role, Transfer};
use crate::http::websocket::OPCODE_CLOSE;
use crate::poll::{EventHandler, Interest, Poller, TimerId};

/// Identifies a queued request. Never zero.
pub type Reqid = u32;

pub type SuccessFn<U> = Box<dyn FnOnce(U, &Transfer)>;
pub type ErrorFn<U> = Box<dyn FnOnce(U, Option<&Transfer>)>;

struct Pending<U> {
    reqid: Reqid,
    request: Transfer,
    userdata: U,
    on_success: SuccessFn<U>,
    on_error: ErrorFn<U>,
}

impl<U> Pending<U> {
    fn succeed(self, response: &Transfer) {
        (self.on_success)(self.userdata, response)
    }

    fn fail(self, response: Option<&Transfer>) {
        (self.on_error)(self.userdata, response)
    }
}

enum Entry<U> {
    Active(Pending<U>),
    /// Cancelled while other requests were queued on both sides of it.
    Defunct,
}

/// A queue of requests to one `host:port`.
///
/// Each request gets a success or an error callback exactly once, unless it
/// is cancelled first, in which case its userdata is handed back instead.
pub struct ClientQueue<U = ()> {
    poller: Box<dyn Poller>,
    host: String,
    port: u16,

    conn: Option<Connection>,
    conn_fd: Option<RawFd>,
    conn_writable: bool,
    /// Responses parsed during the last read, in arrival order.
    responses: Rc<RefCell<VecDeque<Transfer>>>,

    entries: VecDeque<Entry<U>>,
    next_reqid: Reqid,
    pending: Option<Reqid>,

    websocket: Option<Connection>,
    websocket_fd: Option<RawFd>,
    websocket_writable: bool,
    on_frame: Option<Rc<RefCell<FrameFn>>>,
}

impl<U> ClientQueue<U> {
    /// Creates an empty queue. Nothing connects until the first request.
    pub fn new(host: &str, port: u16, poller: Box<dyn Poller>) -> Result<Self> {
        if host.is_empty() {
            return Err(Error::InvalidArgument("empty host"));
        }
        if port == 0 {
            return Err(Error::InvalidArgument("port out of range"));
        }
        Ok(Self {
            poller,
            host: host.to_string(),
            port,
            conn: None,
            conn_fd: None,
            conn_writable: false,
            responses: Rc::new(RefCell::new(VecDeque::new())),
            entries: VecDeque::new(),
            next_reqid: 1,
            pending: None,
            websocket: None,
            websocket_fd: None,
            websocket_writable: false,
            on_frame: None,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The request currently on the wire.
    pub fn pending(&self) -> Option<Reqid> {
        self.pending
    }

    /// Queued reqids in order; cancelled slots in the middle show as `None`.
    pub fn entries(&self) -> Vec<Option<Reqid>> {
        self.entries
            .iter()
            .map(|entry| match entry {
                Entry::Active(p) => Some(p.reqid),
                Entry::Defunct => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn connection_fd(&self) -> Option<RawFd> {
        self.conn_fd
    }

    pub fn websocket_fd(&self) -> Option<RawFd> {
        self.websocket_fd
    }

    /// Queues `request` and sends it once everything ahead of it has been
    /// answered.
    pub fn request<S, E>(&mut self, request: Transfer, userdata: U, on_success: S, on_error: E) -> Result<Reqid>
    where
        S: FnOnce(U, &Transfer) + 'static,
        E: FnOnce(U, Option<&Transfer>) + 'static,
    {
        if request.role() != Role::Client || request.preamble().is_empty() {
            return Err(Error::InvalidArgument("queue accepts complete requests only"));
        }
        if self.next_reqid == Reqid::MAX {
            self.reset_reqids();
        }
        self.require_connection()?;

        let reqid = self.next_reqid;
        self.next_reqid += 1;
        self.entries.push_back(Entry::Active(Pending {
            reqid,
            request,
            userdata,
            on_success: Box::new(on_success),
            on_error: Box::new(on_error),
        }));

        if let Err(e) = self.send_next() {
            if let Some(Entry::Active(p)) = self.entries.back() {
                if p.reqid == reqid {
                    self.entries.pop_back();
                }
            }
            return Err(e);
        }
        Ok(reqid)
    }

    pub fn get<S, E>(&mut self, path: &str, userdata: U, on_success: S, on_error: E) -> Result<Reqid>
    where
        S: FnOnce(U, &Transfer) + 'static,
        E: FnOnce(U, Option<&Transfer>) + 'static,
    {
        let request = build_request(Method::GET, path, None, None)?;
        self.request(request, userdata, on_success, on_error)
    }

    pub fn post<S, E>(
        &mut self,
        path: &str,
        body: &[u8],
        content_type: Option<&str>,
        userdata: U,
        on_success: S,
        on_error: E,
    ) -> Result<Reqid>
    where
        S: FnOnce(U, &Transfer) + 'static,
        E: FnOnce(U, Option<&Transfer>) + 'static,
    {
        let request = build_request(Method::POST, path, Some(body), content_type)?;
        self.request(request, userdata, on_success, on_error)
    }

    pub fn put<S, E>(
        &mut self,
        path: &str,
        body: &[u8],
        content_type: Option<&str>,
        userdata: U,
        on_success: S,
        on_error: E,
    ) -> Result<Reqid>
    where
        S: FnOnce(U, &Transfer) + 'static,
        E: FnOnce(U, Option<&Transfer>) + 'static,
    {
        let request = build_request(Method::PUT, path, Some(body), content_type)?;
        self.request(request, userdata, on_success, on_error)
    }

    pub fn delete<S, E>(&mut self, path: &str, userdata: U, on_success: S, on_error: E) -> Result<Reqid>
    where
        S: FnOnce(U, &Transfer) + 'static,
        E: FnOnce(U, Option<&Transfer>) + 'static,
    {
        let request = build_request(Method::DELETE, path, None, None)?;
        self.request(request, userdata, on_success, on_error)
    }

    /// Withdraws a request and returns its userdata. Neither callback runs.
    ///
    /// A request already on the wire is withdrawn too; its response will be
    /// discarded when it arrives.
    pub fn cancel(&mut self, reqid: Reqid) -> Option<U> {
        let index = self
            .entries
            .iter()
            .position(|entry| matches!(entry, Entry::Active(p) if p.reqid == reqid))?;
        let entry = if index == 0 {
            self.entries.pop_front()
        } else if index + 1 == self.entries.len() {
            self.entries.pop_back()
        } else {
            self.entries
                .get_mut(index)
                .map(|slot| std::mem::replace(slot, Entry::Defunct))
        };
        match entry {
            Some(Entry::Active(p)) => Some(p.userdata),
            _ => None,
        }
    }

    /// Opens the WebSocket connection; `on_frame` receives every frame,
    /// including a synthesized close when the server hangs up.
    pub fn websocket_connect<F>(&mut self, on_frame: F) -> Result<()>
    where
        F: FnMut(&mut Connection, u8, &[u8]) -> anyhow::Result<()> + 'static,
    {
        let on_frame: FrameFn = Box::new(on_frame);
        self.on_frame = Some(Rc::new(RefCell::new(on_frame)));
        self.open_websocket()
    }

    /// Queues a frame, reconnecting first if the WebSocket has gone away.
    pub fn websocket_send(&mut self, opcode: u8, payload: &[u8]) -> Result<()> {
        if !self.websocket.as_ref().is_some_and(Connection::is_open) {
            if self.on_frame.is_none() {
                return Err(Error::InvalidArgument("websocket was never connected"));
            }
            self.open_websocket()?;
        }
        let conn = self.websocket.as_mut().ok_or(Error::Closed)?;
        conn.send_websocket(opcode, payload)?;
        self.sync_interest();
        Ok(())
    }

    fn require_connection(&mut self) -> Result<()> {
        if self.conn.as_ref().is_some_and(Connection::is_open) {
            return Ok(());
        }
        self.drop_connection();

        let inbox = Rc::clone(&self.responses);
        let delegate = Delegate::default().on_response(move |_, response| {
            inbox.borrow_mut().push_back(response.clone());
            Ok(())
        });
        let conn = Connection::new_tcp_client(delegate, &self.host, self.port)
            .inspect_err(|e| {
                tracing::warn!(host = %self.host, port = self.port, error = %e, "failed to connect");
            })?;
        let fd = conn.fd().ok_or(Error::Closed)?;
        self.poller.add(fd, Interest::Stream);
        tracing::info!(host = %self.host, port = self.port, fd, "connected");

        self.conn = Some(conn);
        self.conn_fd = Some(fd);
        self.conn_writable = false;
        Ok(())
    }

    fn drop_connection(&mut self) {
        if let Some(fd) = self.conn_fd.take() {
            self.poller.remove(fd);
        }
        self.conn = None;
        self.conn_writable = false;
    }

    /// Puts the head of the queue on the wire if nothing is in flight.
    fn send_next(&mut self) -> Result<()> {
        while self.pending.is_none() {
            let reqid = match self.entries.front() {
                None => break,
                Some(Entry::Defunct) => {
                    self.entries.pop_front();
                    continue;
                }
                Some(Entry::Active(p)) => p.reqid,
            };
            self.require_connection()?;
            let encoded = match (self.conn.as_mut(), self.entries.front()) {
                (Some(conn), Some(Entry::Active(p))) => conn.encode_transfer(&p.request),
                _ => Err(Error::Closed),
            };
            match encoded {
                Ok(()) => {
                    self.pending = Some(reqid);
                    self.sync_interest();
                }
                Err(e) => {
                    tracing::warn!(reqid, error = %e, "failed to encode request");
                    if let Some(Entry::Active(p)) = self.entries.pop_front() {
                        p.fail(None);
                    }
                }
            }
        }
        Ok(())
    }

    fn process_responses(&mut self) {
        loop {
            let Some(response) = self.responses.borrow_mut().pop_front() else {
                break;
            };
            self.handle_response(&response);
        }
    }

    fn handle_response(&mut self, response: &Transfer) {
        while matches!(self.entries.front(), Some(Entry::Defunct)) {
            self.entries.pop_front();
        }
        let head = match self.entries.front() {
            Some(Entry::Active(p)) => Some(p.reqid),
            _ => None,
        };
        if head.is_none() || head != self.pending {
            tracing::warn!(
                pending = ?self.pending,
                head = ?head,
                status = ?response.status(),
                "discarding response with no matching request"
            );
        } else if let Some(Entry::Active(p)) = self.entries.pop_front() {
            self.pending = None;
            p.succeed(response);
        }
        self.pending = None;
        if let Err(e) = self.send_next() {
            self.fail_all(&e);
        }
    }

    /// The request connection is gone. The request in flight can never be
    /// answered; everything behind it is retried on a new connection.
    fn connection_lost(&mut self) {
        tracing::warn!(host = %self.host, port = self.port, fd = ?self.conn_fd, "lost connection");
        self.drop_connection();
        if let Some(reqid) = self.pending.take() {
            if let Some(Entry::Active(p)) = self.entries.front() {
                if p.reqid == reqid {
                    if let Some(Entry::Active(p)) = self.entries.pop_front() {
                        p.fail(None);
                    }
                }
            }
        }
        if let Err(e) = self.send_next() {
            self.fail_all(&e);
        }
    }

    fn fail_all(&mut self, cause: &Error) {
        let count = self.entries.len();
        if count > 0 {
            tracing::warn!(count, error = %cause, "failing queued requests");
        }
        self.pending = None;
        for entry in std::mem::take(&mut self.entries) {
            if let Entry::Active(p) = entry {
                p.fail(None);
            }
        }
    }

    /// The reqid space ran out: everything outstanding is failed and the
    /// connection dropped so no late response can match a new request.
    fn reset_reqids(&mut self) {
        let cancelled = self
            .entries
            .iter()
            .filter(|entry| matches!(entry, Entry::Active(_)))
            .count();
        tracing::warn!(cancelled, "request id space exhausted, cancelling pending requests");
        if self.pending.take().is_some() {
            self.drop_connection();
        }
        for entry in std::mem::take(&mut self.entries) {
            if let Entry::Active(p) = entry {
                p.fail(None);
            }
        }
        self.next_reqid = 1;
    }

    fn open_websocket(&mut self) -> Result<()> {
        self.drop_websocket();
        let on_frame = self
            .on_frame
            .clone()
            .ok_or(Error::InvalidArgument("no websocket callback"))?;
        let delegate = Delegate::default().on_websocket(move |conn, opcode, payload| {
            if opcode == OPCODE_CLOSE {
                conn.close();
            }
            let mut on_frame = on_frame.borrow_mut();
            (*on_frame)(conn, opcode, payload)
        });
        let mut conn = Connection::new_tcp_client(delegate, &self.host, self.port)?;
        conn.initiate_websocket()?;
        let fd = conn.fd().ok_or(Error::Closed)?;
        self.poller.add(fd, Interest::Stream);
        self.poller.set_writable(fd, true);
        tracing::info!(host = %self.host, port = self.port, fd, "websocket connecting");

        self.websocket = Some(conn);
        self.websocket_fd = Some(fd);
        self.websocket_writable = true;
        Ok(())
    }

    fn drop_websocket(&mut self) {
        if let Some(fd) = self.websocket_fd.take() {
            self.poller.remove(fd);
        }
        self.websocket = None;
        self.websocket_writable = false;
    }

    fn sync_interest(&mut self) {
        if let (Some(conn), Some(fd)) = (&self.conn, self.conn_fd) {
            let wants = conn.wants_write();
            if wants != self.conn_writable {
                self.conn_writable = wants;
                self.poller.set_writable(fd, wants);
            }
        }
        if let (Some(conn), Some(fd)) = (&self.websocket, self.websocket_fd) {
            let wants = conn.wants_write();
            if wants != self.websocket_writable {
                self.websocket_writable = wants;
                self.poller.set_writable(fd, wants);
            }
        }
    }

    fn conn_readable(&mut self) -> io::Result<()> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(io::ErrorKind::WouldBlock.into());
        };
        let result = conn.read(None);
        self.process_responses();
        match result {
            Ok(ReadStatus::Open) => self.sync_interest(),
            Ok(ReadStatus::Closed) => self.connection_lost(),
            Err(e) if e.is_would_block() => return Err(io::ErrorKind::WouldBlock.into()),
            Err(e) => {
                tracing::debug!(error = %e, "request connection failed");
                self.connection_lost();
            }
        }
        Ok(())
    }

    fn conn_writable(&mut self) -> io::Result<()> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(io::ErrorKind::WouldBlock.into());
        };
        match conn.write() {
            Ok(()) => self.sync_interest(),
            Err(e) if e.is_would_block() => return Err(io::ErrorKind::WouldBlock.into()),
            Err(e) => {
                tracing::debug!(error = %e, "request connection failed");
                self.connection_lost();
            }
        }
        Ok(())
    }

    fn websocket_io(&mut self, reading: bool) -> io::Result<()> {
        let Some(conn) = self.websocket.as_mut() else {
            return Err(io::ErrorKind::WouldBlock.into());
        };
        let result = if reading { conn.read(None).map(|_| ()) } else { conn.write() };
        let open = conn.is_open();
        match result {
            Err(e) if e.is_would_block() => return Err(io::ErrorKind::WouldBlock.into()),
            Err(e) => {
                tracing::warn!(error = %e, "websocket connection failed");
                self.drop_websocket();
            }
            Ok(()) if !open => self.drop_websocket(),
            Ok(()) => self.sync_interest(),
        }
        Ok(())
    }
}

fn build_request(method: Method, path: &str, body: Option<&[u8]>, content_type: Option<&str>) -> Result<Transfer> {
    let mut request = Transfer::new(Role::Client);
    request.set_request_line(method, path, "")?;
    if let Some(content_type) = content_type.filter(|ct| !ct.is_empty()) {
        request.add_header("Content-Type", content_type)?;
    }
    if let Some(body) = body {
        request.set_body(body);
    }
    Ok(request)
}

impl<U> EventHandler for ClientQueue<U> {
    fn readable(&mut self, fd: RawFd) -> io::Result<()> {
        if self.conn_fd == Some(fd) {
            self.conn_readable()
        } else if self.websocket_fd == Some(fd) {
            self.websocket_io(true)
        } else {
            Err(io::ErrorKind::WouldBlock.into())
        }
    }

    fn writable(&mut self, fd: RawFd) -> io::Result<()> {
        if self.conn_fd == Some(fd) {
            self.conn_writable()
        } else if self.websocket_fd == Some(fd) {
            self.websocket_io(false)
        } else {
            Err(io::ErrorKind::WouldBlock.into())
        }
    }

    fn error(&mut self, fd: RawFd) {
        if self.conn_fd == Some(fd) {
            self.connection_lost();
        } else if self.websocket_fd == Some(fd) {
            self.drop_websocket();
        }
    }

    fn timeout(&mut self, _id: TimerId) {}
}

impl<U> Drop for ClientQueue<U> {
    fn drop(&mut self) {
        self.drop_websocket();
        self.drop_connection();
        self.pending = None;
        for entry in std::mem::take(&mut self.entries) {
            if let Entry::Active(p) = entry {
                p.fail(None);
            }
        }
    }
}
