//! Daemon backends.
//!
//! [`Backend`] is the seam between the public types ([`Client`],
//! [`Listener`], [`Conn`]) and whatever carries their requests to pattyd:
//!
//! - `LibPatty` calls the C client library (`libpatty`) that ships with
//!   the daemon. Built with the `libpatty` feature; this is what
//!   [`Client::open`] uses when it is enabled.
//! - [`ControlChannel`](crate::control::ControlChannel) speaks a framed
//!   control protocol over a UNIX socket, the protocol of `MockDaemon`.
//!
//! Every method may be called from several threads at once. A blocked
//! [`accept`](Backend::accept) must not stall unrelated requests, except
//! where a backend documents otherwise.
//!
//! [`Client`]: crate::Client
//! [`Client::open`]: crate::Client::open
//! [`Listener`]: crate::Listener
//! [`Conn`]: crate::Conn

use std::fmt;
use std::os::unix::io::OwnedFd;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::addr::Addr;
use crate::error::Result;

// ─── Socket parameters ─────────────────────────────────────────────────────

/// Layer 3 protocol carried by a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// No layer 3 protocol (AX.25 PID `0xF0`).
    None,
}

/// Socket semantics requested from the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketType {
    /// Connected-mode byte stream.
    Stream,
}

// ─── Socket descriptor ─────────────────────────────────────────────────────

/// Handle of one daemon-side socket, scoped to the backend that created it.
///
/// Not `Copy` or `Clone`: [`Backend::close`] consumes it, so a descriptor
/// is closed at most once.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct SocketDescriptor(i32);

impl SocketDescriptor {
    pub(crate) fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// The daemon's integer handle.
    pub fn raw(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for SocketDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sock#{}", self.0)
    }
}

/// Result of a successful [`Backend::accept`].
#[derive(Debug)]
pub struct Accepted {
    /// Daemon descriptor of the new connected socket.
    pub socket: SocketDescriptor,
    /// Address of the station that connected.
    pub peer: Addr,
    /// Data stream of the connection.
    pub stream: OwnedFd,
}

// ─── Backend trait ─────────────────────────────────────────────────────────

/// Socket operations on one open daemon connection.
///
/// Errors follow one mapping across backends: daemon errnos become
/// [`Error::DaemonError`](crate::Error::DaemonError), except that
/// `connect` reports [`Error::ConnectFailure`](crate::Error::ConnectFailure)
/// and `accept` reports [`Error::AcceptFailure`](crate::Error::AcceptFailure).
/// Any call after [`shutdown`](Self::shutdown) fails with
/// [`Error::UseAfterClose`](crate::Error::UseAfterClose).
pub trait Backend: fmt::Debug + Send + Sync {
    /// Socket path the daemon was reached on.
    fn path(&self) -> &Path;

    /// Returns `true` once [`shutdown`](Self::shutdown) has run.
    fn is_closed(&self) -> bool;

    /// Release the daemon connection. The daemon reclaims every socket
    /// still open on it.
    fn shutdown(&self) -> Result<()>;

    /// Check that the daemon is alive.
    fn ping(&self) -> Result<()>;

    /// Create a daemon socket.
    fn socket(&self, proto: Protocol, kind: SocketType) -> Result<SocketDescriptor>;

    /// Bind `sock` to the local station `addr`.
    fn bind(&self, sock: &SocketDescriptor, addr: &Addr) -> Result<()>;

    /// Mark a bound socket as listening.
    fn listen(&self, sock: &SocketDescriptor) -> Result<()>;

    /// Connect `sock` to `addr` and return the data stream.
    fn connect(&self, sock: &SocketDescriptor, addr: &Addr) -> Result<OwnedFd>;

    /// Wait for the next peer on the listening socket `sock`.
    fn accept(&self, sock: &SocketDescriptor) -> Result<Accepted>;

    /// Release a daemon socket.
    fn close(&self, sock: SocketDescriptor) -> Result<()>;
}
