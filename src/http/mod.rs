//! HTTP/1.1 protocol implementation.
//!
//! # Architecture
//!
//! - **`transfer`**: one request or response; preamble, headers, body and query helpers
//! - **`request`** / **`response`**: methods, request building, status lines and canned replies
//! - **`parser`**: line, header, chunk and status decoding over byte slices
//! - **`writer`**: serializes a transfer with `Content-Length` framing
//! - **`connection`**: the per-socket state machine
//! - **`websocket`**: handshake and frame codec
//! - **`mime`**: Content-Type guessing
//! - **`url`**: splitting absolute and relative URLs
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │    Idle     │ ← between messages; blank lines skipped
//!        └──────┬──────┘
//!               │ first non-blank byte
//!               ▼
//!        ┌─────────────┐
//!        │  Preamble   │ ← request or status line
//!        └──────┬──────┘
//!               ▼
//!        ┌─────────────┐
//!        │   Header    │ ← until the blank line
//!        └──────┬──────┘
//!               │ Content-Length > 0 or chunked
//!               ▼
//!        ┌─────────────┐
//!        │    Body     │
//!        └──────┬──────┘
//!               │ message complete
//!               ├─ request  → route, encode response → Idle
//!               ├─ upgrade  → WebSocket
//!               └─ response → deliver to the delegate → Idle
//!
//!   client upgrade: initiate_websocket → WebSocketInitiate ─ 101 → WebSocket
//! ```

pub mod connection;
pub mod mime;
pub mod parser;
pub mod request;
pub mod response;
pub mod transfer;
pub mod url;
pub mod websocket;
pub mod writer;
