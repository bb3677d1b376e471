//! The registry tying listening sockets, live connections and listeners to
//! one poller.

use std::io;
use std::net::TcpListener;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixListener;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::http::connection::{Connection, Delegate, ReadStatus, State, Stream};
use crate::http::request::Method;
use crate::http::transfer::{Role, Transfer};
use crate::http::url::split_url;
use crate::poll::{EventHandler, Interest, Poller, TimerId};
use crate::server::listener::{Listener, Router};

/// A socket accepting connections for a [`Context`].
#[derive(Debug)]
pub enum ListenSocket {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl ListenSocket {
    fn fd(&self) -> RawFd {
        match self {
            ListenSocket::Tcp(l) => l.as_raw_fd(),
            ListenSocket::Unix(l) => l.as_raw_fd(),
        }
    }

    fn set_nonblocking(&self) -> io::Result<()> {
        match self {
            ListenSocket::Tcp(l) => l.set_nonblocking(true),
            ListenSocket::Unix(l) => l.set_nonblocking(true),
        }
    }

    fn accept(&self) -> io::Result<Box<dyn Stream>> {
        match self {
            ListenSocket::Tcp(l) => {
                let (stream, _) = l.accept()?;
                stream.set_nonblocking(true)?;
                Ok(Box::new(stream))
            }
            ListenSocket::Unix(l) => {
                let (stream, _) = l.accept()?;
                stream.set_nonblocking(true)?;
                Ok(Box::new(stream))
            }
        }
    }
}

impl From<TcpListener> for ListenSocket {
    fn from(listener: TcpListener) -> Self {
        ListenSocket::Tcp(listener)
    }
}

impl From<UnixListener> for ListenSocket {
    fn from(listener: UnixListener) -> Self {
        ListenSocket::Unix(listener)
    }
}

struct Slot {
    fd: RawFd,
    /// Last write interest handed to the poller.
    writable: bool,
    conn: Connection,
}

/// Server and client connections sharing one poller.
///
/// Listeners are consulted in registration order; the first match serves
/// the request. Client connections opened by [`Context::request`] are kept
/// for reuse and swept once idle.
pub struct Context {
    poller: Box<dyn Poller>,
    servers: Vec<ListenSocket>,
    slots: Vec<Slot>,
    listeners: Vec<Rc<Listener>>,
    idle_interval: Duration,
    idle_timer: Option<TimerId>,
}

impl Context {
    pub fn new(mut poller: Box<dyn Poller>, idle_interval: Duration) -> Self {
        let idle_timer = Some(poller.set_timeout(idle_interval));
        Self {
            poller,
            servers: Vec::new(),
            slots: Vec::new(),
            listeners: Vec::new(),
            idle_interval,
            idle_timer,
        }
    }

    /// Binds and listens on a TCP address.
    pub fn serve_tcp(&mut self, host: &str, port: u16) -> Result<RawFd> {
        let listener = TcpListener::bind((host, port))?;
        info!(host, port, "listening");
        self.serve(listener)
    }

    /// Binds and listens on a Unix socket path.
    pub fn serve_unix(&mut self, path: impl AsRef<Path>) -> Result<RawFd> {
        let listener = UnixListener::bind(path.as_ref())?;
        info!(path = %path.as_ref().display(), "listening");
        self.serve(listener)
    }

    /// Accepts connections from an already listening socket.
    pub fn serve(&mut self, socket: impl Into<ListenSocket>) -> Result<RawFd> {
        let socket = socket.into();
        socket.set_nonblocking()?;
        let fd = socket.fd();
        self.poller.add(fd, Interest::Accept);
        self.servers.push(socket);
        Ok(fd)
    }

    /// Stops accepting on `fd` and closes it.
    pub fn unserve(&mut self, fd: RawFd) -> bool {
        let Some(index) = self.servers.iter().position(|s| s.fd() == fd) else {
            return false;
        };
        self.poller.remove(fd);
        self.servers.remove(index);
        true
    }

    pub fn add_listener(&mut self, listener: Rc<Listener>) {
        self.listeners.push(listener);
    }

    pub fn remove_listener(&mut self, listener: &Rc<Listener>) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| !Rc::ptr_eq(l, listener));
        self.listeners.len() != before
    }

    /// Routes requests under `path`, optionally for one method only.
    pub fn listen<F>(&mut self, method: Option<Method>, path: &str, handler: F) -> Rc<Listener>
    where
        F: Fn(&Transfer, &mut Transfer) -> anyhow::Result<()> + 'static,
    {
        let mut listener = Listener::request(handler).with_prefix(path);
        if let Some(method) = method {
            listener.add_method(method);
        }
        let listener = Rc::new(listener);
        self.add_listener(Rc::clone(&listener));
        listener
    }

    /// Upgrades `GET` requests under `path` to WebSocket.
    pub fn listen_websocket<C, M>(&mut self, path: &str, on_connect: C, on_message: M) -> Rc<Listener>
    where
        C: Fn(&mut Connection, &Transfer) -> anyhow::Result<()> + 'static,
        M: Fn(&mut Connection, u8, &[u8]) -> anyhow::Result<()> + 'static,
    {
        let listener = Rc::new(
            Listener::websocket()
                .with_prefix(path)
                .on_connect(on_connect)
                .on_message(on_message),
        );
        self.add_listener(Rc::clone(&listener));
        listener
    }

    pub fn find_listener_for_request(&self, request: &Transfer) -> Option<Rc<Listener>> {
        self.listeners.find_listener(request)
    }

    /// Takes ownership of a connected [`Connection`] and starts watching it.
    pub fn add_connection(&mut self, mut conn: Connection) -> Result<RawFd> {
        let fd = conn
            .fd()
            .ok_or(Error::InvalidArgument("connection has no descriptor"))?;
        if self.position(fd).is_some() {
            return Err(Error::InvalidArgument("descriptor already registered"));
        }
        self.poller.add(fd, Interest::Stream);
        let writable = conn.wants_write();
        if writable {
            self.poller.set_writable(fd, true);
        }
        conn.set_in_context(true);
        self.slots.push(Slot { fd, writable, conn });
        Ok(fd)
    }

    /// Stops watching `fd`, closes it and drops its connection.
    pub fn remove_connection(&mut self, fd: RawFd) -> bool {
        match self.position(fd) {
            Some(index) => {
                self.remove_at(index);
                true
            }
            None => false,
        }
    }

    pub fn connection(&self, fd: RawFd) -> Option<&Connection> {
        self.position(fd).map(|i| &self.slots[i].conn)
    }

    /// Runs `f` on one connection, then updates its write interest.
    pub fn with_connection<R>(&mut self, fd: RawFd, f: impl FnOnce(&mut Connection) -> R) -> Option<R> {
        let index = self.position(fd)?;
        let result = f(&mut self.slots[index].conn);
        self.sync_interest(index);
        Some(result)
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.slots.iter().map(|slot| &slot.conn)
    }

    pub fn connection_count(&self) -> usize {
        self.slots.len()
    }

    /// Sends a request, reusing an idle client connection to the same host
    /// and port when there is one.
    pub fn request<F>(
        &mut self,
        method: Method,
        url: &str,
        content_type: Option<&str>,
        body: Option<&[u8]>,
        on_response: F,
    ) -> Result<RawFd>
    where
        F: FnMut(&mut Connection, &Transfer) -> anyhow::Result<()> + 'static,
    {
        let url = split_url(url)?;
        let port = if url.port == 0 { 80 } else { url.port };
        let request = Transfer::new_request(method, &url.path, content_type, body)?;

        if let Some(index) = self.find_idle_client(&url.host, port) {
            let slot = &mut self.slots[index];
            let fd = slot.fd;
            slot.conn.delegate_mut().response_ready = Some(Box::new(on_response));
            if let Err(e) = slot.conn.encode_transfer(&request) {
                self.remove_at(index);
                return Err(e);
            }
            debug!(fd, host = %url.host, port, "reusing client connection");
            self.sync_interest(index);
            return Ok(fd);
        }

        let mut conn = Connection::new_client(Delegate::default().on_response(on_response), &request)?;
        conn.connect(&url.host, port)?;
        self.add_connection(conn)
    }

    /// Calls `f` for every WebSocket connection, newest first, stopping at
    /// the first failure.
    pub fn for_each_websocket<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&mut Connection) -> anyhow::Result<()>,
    {
        let mut result = Ok(());
        for slot in self.slots.iter_mut().rev() {
            if slot.conn.state() != State::WebSocket {
                continue;
            }
            if let Err(e) = f(&mut slot.conn) {
                result = Err(Error::Handler(e));
                break;
            }
        }
        self.sync_all();
        result
    }

    /// Removes client connections with nothing in flight, and any connection
    /// that has lost its descriptor, then schedules the next sweep.
    pub fn drop_idle_clients(&mut self) -> usize {
        let mut dropped = 0;
        let mut index = self.slots.len();
        while index > 0 {
            index -= 1;
            let conn = &self.slots[index].conn;
            if conn.is_open() && (conn.role() == Role::Server || !conn.is_idle()) {
                continue;
            }
            self.remove_at(index);
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "dropped idle connections");
        }
        if let Some(id) = self.idle_timer.take() {
            self.poller.cancel_timeout(id);
        }
        self.idle_timer = Some(self.poller.set_timeout(self.idle_interval));
        dropped
    }

    fn position(&self, fd: RawFd) -> Option<usize> {
        self.slots.iter().position(|slot| slot.fd == fd)
    }

    fn find_idle_client(&self, host: &str, port: u16) -> Option<usize> {
        self.slots.iter().rposition(|slot| {
            let conn = &slot.conn;
            conn.role() == Role::Client
                && conn.is_open()
                && conn.is_idle()
                && conn.remote() == Some((host, port))
        })
    }

    fn remove_at(&mut self, index: usize) {
        let mut slot = self.slots.remove(index);
        self.poller.remove(slot.fd);
        slot.conn.set_in_context(false);
        slot.conn.close();
        debug!(fd = slot.fd, "connection removed");
    }

    /// Brings the poller's write interest in line with the connection, or
    /// drops the connection if a callback closed it.
    fn sync_interest(&mut self, index: usize) {
        if !self.slots[index].conn.is_open() {
            self.remove_at(index);
            return;
        }
        let slot = &mut self.slots[index];
        let wants = slot.conn.wants_write();
        if wants != slot.writable {
            slot.writable = wants;
            self.poller.set_writable(slot.fd, wants);
        }
    }

    fn sync_all(&mut self) {
        for index in (0..self.slots.len()).rev() {
            self.sync_interest(index);
        }
    }

    fn accept_all(&mut self, fd: RawFd) -> io::Result<()> {
        let Some(server) = self.servers.iter().find(|s| s.fd() == fd) else {
            return Err(io::ErrorKind::WouldBlock.into());
        };
        let mut accepted = Vec::new();
        let stopped = loop {
            match server.accept() {
                Ok(stream) => accepted.push(stream),
                Err(e) => break e,
            }
        };
        for stream in accepted {
            let conn = Connection::new_boxed(Delegate::default(), stream);
            match self.add_connection(conn) {
                Ok(client) => debug!(fd, client, "accepted connection"),
                Err(e) => warn!(fd, error = %e, "failed to register accepted connection"),
            }
        }
        Err(stopped)
    }
}

impl EventHandler for Context {
    fn acceptable(&mut self, fd: RawFd) -> io::Result<()> {
        self.accept_all(fd)
    }

    fn readable(&mut self, fd: RawFd) -> io::Result<()> {
        let Some(index) = self.position(fd) else {
            return Err(io::ErrorKind::WouldBlock.into());
        };
        let router: &dyn Router = &self.listeners;
        match self.slots[index].conn.read(Some(router)) {
            Ok(ReadStatus::Open) => self.sync_interest(index),
            Ok(ReadStatus::Closed) => self.remove_at(index),
            Err(e) if e.is_would_block() => return Err(io::ErrorKind::WouldBlock.into()),
            Err(e) => {
                debug!(fd, error = %e, "dropping connection after read");
                self.remove_at(index);
            }
        }
        Ok(())
    }

    fn writable(&mut self, fd: RawFd) -> io::Result<()> {
        let Some(index) = self.position(fd) else {
            return Err(io::ErrorKind::WouldBlock.into());
        };
        match self.slots[index].conn.write() {
            Ok(()) => self.sync_interest(index),
            Err(e) if e.is_would_block() => return Err(io::ErrorKind::WouldBlock.into()),
            Err(e) => {
                debug!(fd, error = %e, "dropping connection after write");
                self.remove_at(index);
            }
        }
        Ok(())
    }

    fn error(&mut self, fd: RawFd) {
        if !self.remove_connection(fd) {
            self.unserve(fd);
        }
    }

    fn timeout(&mut self, id: TimerId) {
        if self.idle_timer == Some(id) {
            self.idle_timer = None;
            self.drop_idle_clients();
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        for slot in &mut self.slots {
            self.poller.remove(slot.fd);
            slot.conn.set_in_context(false);
        }
        for server in &self.servers {
            self.poller.remove(server.fd());
        }
        if let Some(id) = self.idle_timer.take() {
            self.poller.cancel_timeout(id);
        }
    }
}
