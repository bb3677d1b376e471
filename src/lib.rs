//! Courier - a small event-driven HTTP/1.1 engine
//!
//! Non-blocking connections that parse requests and responses, route
//! requests to listeners, upgrade to WebSocket, and queue client requests to
//! a single host. The engine is driven through the [`poll::Poller`] and
//! [`poll::EventHandler`] traits; [`poll::driver`] runs it on tokio.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod poll;
pub mod server;

pub use error::{Error, ParseError, Result};
