//! Client side helpers built on [`Connection`](crate::http::connection::Connection).

pub mod queue;

pub use queue::{ClientQueue, Reqid};
