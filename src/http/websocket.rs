//! WebSocket handshake and single-frame codec.
//!
//! Only unfragmented frames are understood. Outgoing frames are never
//! masked, including those sent by the client side.

use std::ops::Range;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::{BufMut, BytesMut};
use sha1::{Digest, Sha1};

use crate::error::{Error, ParseError, Result};
use crate::http::response::StatusCode;
use crate::http::transfer::Transfer;

pub const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

pub const OPCODE_CONTINUATION: u8 = 0;
pub const OPCODE_TEXT: u8 = 1;
pub const OPCODE_BINARY: u8 = 2;
pub const OPCODE_CLOSE: u8 = 8;
pub const OPCODE_PING: u8 = 9;
pub const OPCODE_PONG: u8 = 10;

/// Payloads are capped at 24 bits in both directions.
pub const MAX_PAYLOAD: usize = 0x00ff_ffff;

/// Upgrade request sent by the client side of the engine.
pub(crate) const CLIENT_HANDSHAKE: &[u8] = b"GET /websocket HTTP/1.1\r\n\
Connection: Upgrade\r\n\
Upgrade: websocket\r\n\
Sec-WebSocket-Key: 12345\r\n\
\r\n";

/// A frame decoded in place. `payload` indexes into the decoded buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: u8,
    pub payload: Range<usize>,
    /// Total bytes of header, mask and payload.
    pub consumed: usize,
}

/// `Sec-WebSocket-Accept` for a client key.
///
/// # Example
///
/// ```
/// # use courier::http::websocket::accept_key;
/// assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(GUID.as_bytes());
    STANDARD.encode(sha1.finalize())
}

/// Validates an upgrade request and turns `response` into the 101 reply.
pub fn handshake(request: &Transfer, response: &mut Transfer) -> Result<()> {
    if !request
        .header("Upgrade")
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
    {
        return Err(Error::Protocol("missing Upgrade: websocket"));
    }
    let key = request
        .header("Sec-WebSocket-Key")
        .filter(|k| !k.is_empty())
        .ok_or(Error::Protocol("missing Sec-WebSocket-Key"))?;

    response.set_status_line("", StatusCode::SwitchingProtocols.as_u16(), "Upgrade to WebSocket")?;
    response.set_header("Sec-WebSocket-Accept", &accept_key(key))?;
    response.set_header("Upgrade", "WebSocket")?;
    response.set_header("Connection", "Upgrade")?;
    Ok(())
}

/// Decodes one frame from the front of `src`, unmasking its payload in
/// place. `Ok(None)` means the frame is not complete yet.
pub fn decode_frame(src: &mut [u8]) -> Result<Option<Frame>, ParseError> {
    if src.len() < 2 {
        return Ok(None);
    }
    if src[0] & 0x80 == 0 {
        return Err(ParseError::UnsupportedFrame);
    }
    let opcode = src[0] & 0x0f;
    let masked = src[1] & 0x80 != 0;
    let mut len = usize::from(src[1] & 0x7f);
    let mut pos = 2;

    if len == 126 {
        if src.len() < 4 {
            return Ok(None);
        }
        len = usize::from(u16::from_be_bytes([src[2], src[3]]));
        pos = 4;
    } else if len == 127 {
        if src.len() < 10 {
            return Ok(None);
        }
        if src[2..7].iter().any(|&b| b != 0) {
            return Err(ParseError::FrameTooLarge);
        }
        len = usize::from(src[7]) << 16 | usize::from(src[8]) << 8 | usize::from(src[9]);
        pos = 10;
    }

    let mut mask = None;
    if masked {
        if src.len() < pos + 4 {
            return Ok(None);
        }
        mask = Some([src[pos], src[pos + 1], src[pos + 2], src[pos + 3]]);
        pos += 4;
    }

    if src.len() - pos < len {
        return Ok(None);
    }
    let payload = pos..pos + len;
    if let Some(mask) = mask {
        for (i, b) in src[payload.clone()].iter_mut().enumerate() {
            *b ^= mask[i & 3];
        }
    }
    Ok(Some(Frame {
        opcode,
        payload,
        consumed: pos + len,
    }))
}

/// Appends one unmasked, final frame to `dst`.
pub fn encode_frame(dst: &mut BytesMut, opcode: u8, payload: &[u8]) -> Result<()> {
    if opcode > 0x0f {
        return Err(Error::InvalidArgument("websocket opcode out of range"));
    }
    if payload.len() > MAX_PAYLOAD {
        return Err(ParseError::FrameTooLarge.into());
    }
    dst.reserve(payload.len() + 10);
    dst.put_u8(0x80 | opcode);
    match payload.len() {
        len if len < 126 => dst.put_u8(len as u8),
        len if len <= 0xffff => {
            dst.put_u8(126);
            dst.put_u16(len as u16);
        }
        len => {
            dst.put_u8(127);
            dst.put_u32(0);
            dst.put_u32(len as u32);
        }
    }
    dst.put_slice(payload);
    Ok(())
}
