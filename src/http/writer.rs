use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::http::transfer::{Role, Transfer};

/// Whether the encoder adds its own `Content-Length` and writes the body.
fn frames_body(xfer: &Transfer) -> bool {
    match xfer.role() {
        // 1xx responses end at the blank line.
        Role::Server => !xfer.status().is_some_and(|status| (100..200).contains(&status)),
        Role::Client => {
            !xfer.body().is_empty() || xfer.parse_method().is_some_and(|m| m.expects_body())
        }
    }
}

fn is_framing_header(key: &str) -> bool {
    key.eq_ignore_ascii_case("Content-Length") || key.eq_ignore_ascii_case("Transfer-Encoding")
}

/// Appends the wire form of `xfer` to `dst`.
///
/// Bodies are always sent with an explicit `Content-Length`, never chunked.
pub fn encode_transfer(dst: &mut BytesMut, xfer: &Transfer) -> Result<()> {
    if xfer.preamble().is_empty() {
        return Err(Error::InvalidArgument("transfer has no preamble"));
    }
    let framed = frames_body(xfer);

    dst.put_slice(xfer.preamble().as_bytes());
    dst.put_slice(b"\r\n");

    for (key, value) in xfer.headers() {
        if framed && is_framing_header(key) {
            continue;
        }
        dst.put_slice(key.as_bytes());
        dst.put_slice(b": ");
        dst.put_slice(value.as_bytes());
        dst.put_slice(b"\r\n");
    }

    if framed {
        dst.put_slice(format!("Content-Length: {}\r\n", xfer.body().len()).as_bytes());
    }

    // Header/body separator
    dst.put_slice(b"\r\n");

    if framed {
        dst.put_slice(xfer.body());
    }
    Ok(())
}
