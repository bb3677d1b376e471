//! Serving side: routing rules, the connection registry and a static file
//! handler for the binary.

pub mod context;
pub mod files;
pub mod listener;

pub use context::Context;
pub use listener::Listener;
