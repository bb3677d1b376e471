//! Single-threaded event loop on tokio.
//!
//! Each registered descriptor gets a local task that waits on
//! [`AsyncFd`] readiness and calls the handler. Timers are local tasks that
//! sleep. The handler talks back through [`DriverPoller`]. Registrations
//! and timers are queued and applied by [`Driver::run`], so nothing is
//! re-entered while a callback is running. Write interest goes straight to
//! the descriptor's task so it is already off when the handler returns.
//!
//! # Example
//!
//! ```ignore
//! let driver = Driver::new();
//! let mut context = Context::new(Box::new(driver.poller()), Duration::from_secs(10));
//! context.serve_tcp("127.0.0.1", 8080)?;
//!
//! let local = tokio::task::LocalSet::new();
//! local.run_until(driver.run(Rc::new(RefCell::new(context)))).await?;
//! ```

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::rc::{Rc, Weak};
use std::time::Duration;

use tokio::io::unix::AsyncFd;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{EventHandler, Interest, Poller, TimerId};

enum Command {
    Add(RawFd, Interest, watch::Receiver<bool>),
    Remove(RawFd),
    Timeout(TimerId, Duration),
    Cancel(TimerId),
}

#[derive(Default)]
struct Shared {
    commands: RefCell<Vec<Command>>,
    notify: Notify,
    last_timer: Cell<TimerId>,
    /// Write interest per registered descriptor.
    writers: RefCell<HashMap<RawFd, watch::Sender<bool>>>,
}

impl Shared {
    fn push(&self, command: Command) {
        self.commands.borrow_mut().push(command);
        self.notify.notify_one();
    }
}

/// The [`Poller`] handed to the engine.
#[derive(Clone)]
pub struct DriverPoller {
    shared: Rc<Shared>,
}

impl Poller for DriverPoller {
    fn add(&mut self, fd: RawFd, interest: Interest) {
        let (writer, wants_write) = watch::channel(false);
        self.shared.writers.borrow_mut().insert(fd, writer);
        self.shared.push(Command::Add(fd, interest, wants_write));
    }

    fn set_writable(&mut self, fd: RawFd, writable: bool) {
        if let Some(writer) = self.shared.writers.borrow().get(&fd) {
            writer.send_if_modified(|current| {
                let changed = *current != writable;
                *current = writable;
                changed
            });
        }
    }

    fn remove(&mut self, fd: RawFd) {
        self.shared.writers.borrow_mut().remove(&fd);
        self.shared.push(Command::Remove(fd));
    }

    fn set_timeout(&mut self, delay: Duration) -> TimerId {
        let id = self.shared.last_timer.get() + 1;
        self.shared.last_timer.set(id);
        self.shared.push(Command::Timeout(id, delay));
        id
    }

    fn cancel_timeout(&mut self, id: TimerId) {
        self.shared.push(Command::Cancel(id));
    }
}

/// Borrowed descriptor for [`AsyncFd`]; the engine owns the real one.
struct Descriptor(RawFd);

impl AsRawFd for Descriptor {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

#[derive(Default)]
pub struct Driver {
    shared: Rc<Shared>,
}

impl Driver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn poller(&self) -> DriverPoller {
        DriverPoller {
            shared: Rc::clone(&self.shared),
        }
    }

    /// Dispatches events to `handler` forever.
    ///
    /// Must be polled inside a [`tokio::task::LocalSet`].
    pub async fn run<H>(self, handler: Rc<RefCell<H>>) -> io::Result<()>
    where
        H: EventHandler + 'static,
    {
        let mut watches: HashMap<RawFd, JoinHandle<()>> = HashMap::new();
        let mut timers: HashMap<TimerId, JoinHandle<()>> = HashMap::new();

        loop {
            let commands = std::mem::take(&mut *self.shared.commands.borrow_mut());
            if commands.is_empty() {
                self.shared.notify.notified().await;
                continue;
            }
            timers.retain(|_, task| !task.is_finished());

            for command in commands {
                match command {
                    Command::Add(fd, interest, wants_write) => {
                        if let Some(old) = watches.remove(&fd) {
                            old.abort();
                        }
                        let task = tokio::task::spawn_local(watch_fd(
                            fd,
                            interest,
                            wants_write,
                            Rc::downgrade(&handler),
                        ));
                        watches.insert(fd, task);
                        debug!(fd, ?interest, "watching descriptor");
                    }
                    Command::Remove(fd) => {
                        if let Some(task) = watches.remove(&fd) {
                            task.abort();
                            debug!(fd, "released descriptor");
                        }
                    }
                    Command::Timeout(id, delay) => {
                        let handler = Rc::downgrade(&handler);
                        let task = tokio::task::spawn_local(async move {
                            tokio::time::sleep(delay).await;
                            if let Some(handler) = handler.upgrade() {
                                handler.borrow_mut().timeout(id);
                            }
                        });
                        timers.insert(id, task);
                    }
                    Command::Cancel(id) => {
                        if let Some(task) = timers.remove(&id) {
                            task.abort();
                        }
                    }
                }
            }
        }
    }
}

async fn watch_fd<H: EventHandler>(
    fd: RawFd,
    interest: Interest,
    mut wants_write: watch::Receiver<bool>,
    handler: Weak<RefCell<H>>,
) {
    let async_fd = match AsyncFd::with_interest(
        Descriptor(fd),
        tokio::io::Interest::READABLE | tokio::io::Interest::WRITABLE,
    ) {
        Ok(async_fd) => async_fd,
        Err(e) => {
            warn!(fd, error = %e, "failed to register descriptor");
            return;
        }
    };

    loop {
        let writing = *wants_write.borrow_and_update();
        tokio::select! {
            ready = async_fd.readable() => {
                let mut guard = match ready {
                    Ok(guard) => guard,
                    Err(e) => {
                        warn!(fd, error = %e, "readiness failed");
                        report_error(&handler, fd);
                        return;
                    }
                };
                let Some(handler) = handler.upgrade() else {
                    return;
                };
                let outcome = guard.try_io(|_| {
                    let mut handler = handler.borrow_mut();
                    match interest {
                        Interest::Accept => handler.acceptable(fd),
                        Interest::Stream => handler.readable(fd),
                    }
                });
                if let Ok(Err(e)) = outcome {
                    debug!(fd, error = %e, "read handler failed");
                    guard.clear_ready();
                }
            }
            ready = async_fd.writable(), if writing => {
                let mut guard = match ready {
                    Ok(guard) => guard,
                    Err(e) => {
                        warn!(fd, error = %e, "readiness failed");
                        report_error(&handler, fd);
                        return;
                    }
                };
                let Some(handler) = handler.upgrade() else {
                    return;
                };
                let outcome = guard.try_io(|_| handler.borrow_mut().writable(fd));
                if let Ok(Err(e)) = outcome {
                    debug!(fd, error = %e, "write handler failed");
                    guard.clear_ready();
                }
            }
            changed = wants_write.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
        // Let the driver apply queued registrations before polling again.
        tokio::task::yield_now().await;
    }
}

fn report_error<H: EventHandler>(handler: &Weak<RefCell<H>>, fd: RawFd) {
    if let Some(handler) = handler.upgrade() {
        handler.borrow_mut().error(fd);
    }
}
