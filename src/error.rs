//! Error types shared by the protocol engine.

use std::io;

use thiserror::Error;

/// Failures while decoding bytes from the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed request or status line")]
    InvalidRequest,
    #[error("malformed header line")]
    InvalidHeader,
    #[error("malformed chunk framing")]
    InvalidChunk,
    #[error("line too long")]
    LineTooLong,
    #[error("fragmented websocket frames are not supported")]
    UnsupportedFrame,
    #[error("websocket payload length exceeds 24 bits")]
    FrameTooLarge,
    #[error("malformed URL")]
    InvalidUrl,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("protocol error: {0}")]
    Protocol(&'static str),
    #[error("connection closed")]
    Closed,
    #[error("handler failed: {0:#}")]
    Handler(anyhow::Error),
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

impl Error {
    /// True when a non-blocking call had nothing to do yet.
    pub fn is_would_block(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::WouldBlock)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
