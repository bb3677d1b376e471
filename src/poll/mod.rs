//! Readiness plumbing between the engine and an event loop.
//!
//! The engine only ever talks to a [`Poller`]: it registers descriptors,
//! toggles write interest and schedules timers. The event loop calls back
//! into an [`EventHandler`] when something is ready. [`driver::Driver`] is
//! the tokio implementation of both sides.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

pub mod driver;

pub type TimerId = u64;

/// What a registered descriptor is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interest {
    /// A listening socket; readiness means a connection can be accepted.
    Accept,
    /// A connected stream.
    Stream,
}

pub trait Poller {
    /// Starts watching `fd` for readability.
    fn add(&mut self, fd: RawFd, interest: Interest);

    /// Turns write readiness notifications on or off.
    fn set_writable(&mut self, fd: RawFd, writable: bool);

    /// Stops watching `fd`. Unknown descriptors are ignored.
    fn remove(&mut self, fd: RawFd);

    /// Schedules a one-shot timeout.
    fn set_timeout(&mut self, delay: Duration) -> TimerId;

    fn cancel_timeout(&mut self, id: TimerId);
}

/// Callbacks from the event loop.
///
/// Returning `io::ErrorKind::WouldBlock` tells the loop the descriptor has
/// been drained and readiness can be cleared.
pub trait EventHandler {
    fn acceptable(&mut self, fd: RawFd) -> io::Result<()> {
        let _ = fd;
        Err(io::ErrorKind::WouldBlock.into())
    }

    fn readable(&mut self, fd: RawFd) -> io::Result<()>;

    fn writable(&mut self, fd: RawFd) -> io::Result<()>;

    fn error(&mut self, fd: RawFd);

    fn timeout(&mut self, id: TimerId);
}
