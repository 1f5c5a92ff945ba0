//! Control channel protocol types and wire encoding.
//!
//! Wire format:
//!
//! ```text
//! [u32 LE: payload_len + 1] [u8: frame_type] [payload_bytes]
//! ```
//!
//! Frame types:
//! - `0x20` `Request`: JSON-encoded [`Request`] (client → daemon)
//! - `0x21` `Response`: JSON-encoded [`Response`] (daemon → client)
//!
//! ## Socket lifecycle
//!
//! 1. Client sends `Socket`; daemon replies `Socket { sock }` with a
//!    descriptor scoped to this control connection.
//! 2. Listening side: `Bind` is answered by `Ok`. `Listen` is answered by
//!    `Listening` with the listener's event stream attached via SCM_RIGHTS.
//! 3. `Accept` is answered at once by `Ok`. When a peer connects, the
//!    daemon writes `Accepted { sock, peer }` to the listener's event
//!    stream, with the connection's data stream FD attached. The control
//!    channel is never blocked waiting for a peer.
//! 4. Dialing side: `Connect` returns `Connected` with the data stream FD
//!    attached the same way. Connections to a listening address queue
//!    until accepted.
//! 5. `Close` releases a descriptor. Closing a listener closes the
//!    daemon's end of its event stream, which ends any pending accept.
//!    Any failing request is answered with `Error { errno }`.
//!
//! Every frame on an event stream is a `Response`. Addresses travel as the
//! 7-byte binary record (see [`crate::addr`]).

use serde::{Deserialize, Serialize};

use crate::backend::{Protocol, SocketType};
use crate::constants::{ADDR_LEN, MAX_FRAME_SIZE};
use crate::error::{Error, Result};

// ─── Frame type constants ──────────────────────────────────────────────────

/// Frame type byte constants for the control protocol.
pub mod frame_type {
    /// JSON-encoded [`super::Request`] (client → daemon).
    pub const REQUEST: u8 = 0x20;
    /// JSON-encoded [`super::Response`] (daemon → client).
    pub const RESPONSE: u8 = 0x21;
}

// ─── Control message enums ─────────────────────────────────────────────────

/// Requests sent from client to daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Liveness check; answered with `Pong`.
    Ping,

    /// Create a socket.
    Socket {
        /// Layer 3 protocol.
        proto: Protocol,
        /// Socket type.
        kind: SocketType,
    },

    /// Bind a socket to a local station address.
    Bind {
        /// Socket descriptor.
        sock: i32,
        /// Local address record.
        addr: [u8; ADDR_LEN],
    },

    /// Mark a bound socket as listening.
    Listen {
        /// Socket descriptor.
        sock: i32,
    },

    /// Connect a socket to a remote station.
    Connect {
        /// Socket descriptor.
        sock: i32,
        /// Remote address record.
        addr: [u8; ADDR_LEN],
    },

    /// Ask for the next incoming connection on a listening socket. The
    /// connection arrives later on the listener's event stream.
    Accept {
        /// Listening socket descriptor.
        sock: i32,
    },

    /// Release a socket.
    Close {
        /// Socket descriptor.
        sock: i32,
    },
}

impl Request {
    /// Short verb name, used in errors and logs.
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Socket { .. } => "socket",
            Self::Bind { .. } => "bind",
            Self::Listen { .. } => "listen",
            Self::Connect { .. } => "connect",
            Self::Accept { .. } => "accept",
            Self::Close { .. } => "close",
        }
    }
}

/// Responses sent from daemon to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    /// Answer to `Ping`.
    Pong,

    /// A socket was created.
    Socket {
        /// New socket descriptor.
        sock: i32,
    },

    /// Generic success (`Bind`, `Accept`, `Close`).
    Ok,

    /// `Listen` succeeded; the listener's event stream FD is attached.
    Listening,

    /// `Connect` succeeded; the data stream FD is attached.
    Connected,

    /// A peer connected to a listener. Sent on the listener's event
    /// stream with the data stream FD attached.
    Accepted {
        /// Descriptor of the new connected socket.
        sock: i32,
        /// Address record of the remote station.
        peer: [u8; ADDR_LEN],
    },

    /// The request failed.
    Error {
        /// POSIX errno describing the failure.
        errno: i32,
    },
}

impl Response {
    /// Returns `true` for responses that carry a descriptor via SCM_RIGHTS.
    pub fn carries_fd(&self) -> bool {
        matches!(self, Self::Listening | Self::Connected | Self::Accepted { .. })
    }
}

// ─── Frame encoding helpers ────────────────────────────────────────────────

fn encode_json<T: Serialize>(ft: u8, msg: &T) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(msg)
        .map_err(|e| Error::Protocol(format!("cannot encode control message: {e}")))?;
    Ok(encode_raw(ft, &payload))
}

/// Encode a client → daemon request frame.
pub fn encode_request(req: &Request) -> Result<Vec<u8>> {
    encode_json(frame_type::REQUEST, req)
}

/// Encode a daemon → client response frame.
pub fn encode_response(resp: &Response) -> Result<Vec<u8>> {
    encode_json(frame_type::RESPONSE, resp)
}

fn encode_raw(ft: u8, payload: &[u8]) -> Vec<u8> {
    let length = (payload.len() + 1) as u32; // +1 for the type byte
    let mut buf = Vec::with_capacity(4 + 1 + payload.len());
    buf.extend_from_slice(&length.to_le_bytes());
    buf.push(ft);
    buf.extend_from_slice(payload);
    buf
}

// ─── Frame decoder ─────────────────────────────────────────────────────────

/// A decoded control protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Client → daemon.
    Request(Request),
    /// Daemon → client.
    Response(Response),
}

/// Incremental frame decoder.
///
/// Bytes are accumulated until at least one complete frame is available.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Create a new decoder with an empty buffer.
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Feed bytes and extract all complete frames.
    ///
    /// Incomplete data is retained for the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Frame>> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();

        loop {
            if self.buf.len() < 4 {
                break;
            }
            let length = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
            if length == 0 {
                return Err(Error::Protocol("zero-length frame".into()));
            }
            if length > MAX_FRAME_SIZE {
                return Err(Error::Protocol(format!("frame too large: {length} bytes")));
            }
            let total = 4 + length as usize;
            if self.buf.len() < total {
                break;
            }

            let frame = decode_frame(self.buf[4], &self.buf[5..total])?;
            frames.push(frame);
            self.buf.drain(..total);
        }

        Ok(frames)
    }

    /// Returns `true` if part of a frame is buffered.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }
}

fn decode_frame(ft: u8, payload: &[u8]) -> Result<Frame> {
    match ft {
        frame_type::REQUEST => serde_json::from_slice(payload)
            .map(Frame::Request)
            .map_err(|e| Error::Protocol(format!("invalid request JSON: {e}"))),
        frame_type::RESPONSE => serde_json::from_slice(payload)
            .map(Frame::Response)
            .map_err(|e| Error::Protocol(format!("invalid response JSON: {e}"))),
        _ => Err(Error::Protocol(format!("unknown frame type: 0x{ft:02x}"))),
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────
