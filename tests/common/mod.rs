#![allow(dead_code)]

use std::cell::RefCell;
use std::io::{Read, Write};
use std::os::fd::RawFd;
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::time::Duration;

use courier::poll::{Interest, Poller, TimerId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Add(RawFd, Interest),
    Writable(RawFd, bool),
    Remove(RawFd),
    Timeout(TimerId, Duration),
    Cancel(TimerId),
}

/// A poller that only records what it was asked to do.
#[derive(Clone, Default)]
pub struct RecordingPoller {
    pub calls: Rc<RefCell<Vec<Call>>>,
    next_timer: Rc<RefCell<TimerId>>,
}

impl RecordingPoller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.borrow_mut())
    }

    pub fn watched(&self, fd: RawFd) -> bool {
        let mut watched = false;
        for call in self.calls.borrow().iter() {
            match call {
                Call::Add(f, _) if *f == fd => watched = true,
                Call::Remove(f) if *f == fd => watched = false,
                _ => {}
            }
        }
        watched
    }

    pub fn writable(&self, fd: RawFd) -> bool {
        self.calls
            .borrow()
            .iter()
            .rev()
            .find_map(|call| match call {
                Call::Writable(f, on) if *f == fd => Some(*on),
                Call::Add(f, _) if *f == fd => Some(false),
                _ => None,
            })
            .unwrap_or(false)
    }
}

impl Poller for RecordingPoller {
    fn add(&mut self, fd: RawFd, interest: Interest) {
        self.calls.borrow_mut().push(Call::Add(fd, interest));
    }

    fn set_writable(&mut self, fd: RawFd, writable: bool) {
        self.calls.borrow_mut().push(Call::Writable(fd, writable));
    }

    fn remove(&mut self, fd: RawFd) {
        self.calls.borrow_mut().push(Call::Remove(fd));
    }

    fn set_timeout(&mut self, delay: Duration) -> TimerId {
        let id = {
            let mut next = self.next_timer.borrow_mut();
            *next += 1;
            *next
        };
        self.calls.borrow_mut().push(Call::Timeout(id, delay));
        id
    }

    fn cancel_timeout(&mut self, id: TimerId) {
        self.calls.borrow_mut().push(Call::Cancel(id));
    }
}

/// A connected pair; the engine gets the first end, non-blocking.
pub fn socket_pair() -> (UnixStream, UnixStream) {
    let (ours, theirs) = UnixStream::pair().unwrap();
    ours.set_nonblocking(true).unwrap();
    theirs
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    (ours, theirs)
}

pub fn send(peer: &mut UnixStream, bytes: &[u8]) {
    peer.write_all(bytes).unwrap();
}

/// Reads whatever is available on a blocking peer, waiting for at least
/// `min` bytes.
pub fn recv_at_least(peer: &mut UnixStream, min: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    while out.len() < min {
        let n = peer.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    out
}

pub fn masked_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
    let mask = [0x11, 0x22, 0x33, 0x44];
    assert!(payload.len() < 126);
    let mut frame = vec![0x80 | opcode, 0x80 | payload.len() as u8];
    frame.extend_from_slice(&mask);
    frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i & 3]));
    frame
}
