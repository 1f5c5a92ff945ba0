//! Framed control channel backend.
//!
//! # Architecture
//!
//! ```text
//! Client ──Request (0x20)──────────────────────────► daemon
//!        ◄──Response (0x21) [+ SCM_RIGHTS stream FD]──
//!
//! Listener ◄──Accepted (0x21) + data stream FD── event stream (per listener)
//! ```
//!
//! One [`ControlChannel`] wraps the `UnixStream` a client holds to the
//! daemon. Every request is a full round trip performed under one mutex:
//! write the request frame, then `recvmsg` until the response frame is
//! complete. Requests from different threads therefore never interleave on
//! the wire, and no request waits on the network.
//!
//! `Listen` hands back an event stream for the new listener. `Accept` is
//! acknowledged at once and the connection itself arrives on that stream,
//! so a waiting [`accept`](Backend::accept) holds only its listener's
//! stream. Closing the listener, or the whole channel, ends the wait.
//!
//! The [`Backend`] methods map daemon errnos onto [`Error`](crate::Error)
//! variants.

pub mod protocol;
pub mod scm;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io::{self, Write};
use std::os::unix::io::OwnedFd;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::addr::Addr;
use crate::backend::{Accepted, Backend, Protocol, SocketDescriptor, SocketType};
use crate::constants::{CONTROL_READ_CHUNK, MAX_SOCK_PATH};
use crate::error::{Error, Result};

use protocol::{encode_request, Frame, FrameDecoder, Request, Response};

// ─── Framed stream ─────────────────────────────────────────────────────────

/// A UNIX stream carrying response frames, with decoded frames and received
/// descriptors queued until asked for.
struct FramedStream {
    stream: UnixStream,
    decoder: FrameDecoder,
    frames: VecDeque<Frame>,
    fds: VecDeque<OwnedFd>,
}

impl FramedStream {
    fn new(stream: UnixStream) -> Self {
        Self {
            stream,
            decoder: FrameDecoder::new(),
            frames: VecDeque::new(),
            fds: VecDeque::new(),
        }
    }

    /// Next response frame, reading until one is complete. A response
    /// that carries a descriptor takes the oldest one received.
    fn next_response(&mut self, verb: &str) -> Result<(Response, Option<OwnedFd>)> {
        loop {
            if let Some(frame) = self.frames.pop_front() {
                let resp = match frame {
                    Frame::Response(resp) => resp,
                    Frame::Request(req) => {
                        return Err(Error::Protocol(format!("daemon sent a request: {}", req.verb())))
                    }
                };
                let fd = if resp.carries_fd() {
                    let fd = self.fds.pop_front().ok_or_else(|| {
                        Error::Protocol(format!("{verb} response arrived without a stream descriptor"))
                    })?;
                    Some(fd)
                } else {
                    None
                };
                return Ok((resp, fd));
            }

            let (data, received) = scm::recv_with_fds(&self.stream, CONTROL_READ_CHUNK)?;
            if data.is_empty() && received.is_empty() {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "daemon closed the stream",
                )));
            }
            self.fds.extend(received);
            let frames = self.decoder.feed(&data)?;
            self.frames.extend(frames);
        }
    }
}

// ─── Channel ───────────────────────────────────────────────────────────────

type EventStream = Arc<Mutex<FramedStream>>;

/// The open control connection to the daemon.
///
/// Shared by a [`Client`](crate::Client) and every listener and connection
/// it creates. Closed exactly once by [`shutdown`](Backend::shutdown); any
/// request afterwards fails with [`Error::UseAfterClose`].
pub struct ControlChannel {
    path: PathBuf,
    state: Mutex<Option<FramedStream>>,
    // Event streams of this channel's listeners, by descriptor.
    events: Mutex<HashMap<i32, EventStream>>,
}

impl fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlChannel")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl ControlChannel {
    /// Connect to the daemon's control socket at `path`.
    ///
    /// Fails with [`Error::ConnectFailure`] if the path is too long for a
    /// UNIX socket address or nothing is listening there.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let target = path.display().to_string();

        let path_len = path.as_os_str().len();
        if path_len >= MAX_SOCK_PATH {
            return Err(Error::ConnectFailure {
                target,
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("socket path too long ({path_len} >= {MAX_SOCK_PATH})"),
                ),
            });
        }

        let stream = UnixStream::connect(path)
            .map_err(|source| Error::ConnectFailure { target, source })?;
        log::debug!("[patty] control channel open: {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(Some(FramedStream::new(stream))),
            events: Mutex::new(HashMap::new()),
        })
    }

    /// Perform one request/response round trip.
    ///
    /// Returns the response and, for `Listening`/`Connected`, the
    /// descriptor that arrived with it.
    pub fn call(&self, req: &Request) -> Result<(Response, Option<OwnedFd>)> {
        let frame = encode_request(req)?;

        let mut guard = self.lock()?;
        let state = guard.as_mut().ok_or(Error::UseAfterClose("client"))?;

        log::debug!("[patty] -> {req:?}");
        state.stream.write_all(&frame)?;
        let (resp, fd) = state.next_response(req.verb())?;
        if !state.frames.is_empty() {
            return Err(Error::Protocol("unsolicited frame from daemon".into()));
        }
        if !state.fds.is_empty() {
            log::warn!("[patty] dropping {} unexpected descriptor(s)", state.fds.len());
            state.fds.clear();
        }
        drop(guard);

        log::debug!("[patty] <- {resp:?}");
        Ok((resp, fd))
    }

    // ── Internal ─────────────────────────────────────────────────────────────

    fn expect_ok(&self, op: &'static str, req: &Request) -> Result<()> {
        match self.call(req)?.0 {
            Response::Ok => Ok(()),
            Response::Error { errno } => Err(Error::DaemonError { op, errno }),
            other => Err(unexpected(op, &other)),
        }
    }

    /// Wait for the `Accepted` frame on a listener's event stream.
    fn next_accepted(&self, events: &EventStream) -> Result<Accepted> {
        let next = events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_response("accept");

        match next.map_err(accept_failure)? {
            (Response::Accepted { sock, peer }, Some(stream)) => {
                let socket = SocketDescriptor::from_raw(sock);
                match Addr::from_bytes(peer) {
                    Ok(peer) => Ok(Accepted { socket, peer, stream }),
                    Err(e) => {
                        if let Err(close_err) = self.close(socket) {
                            log::warn!("[patty] close after bad peer address: {close_err}");
                        }
                        Err(e)
                    }
                }
            }
            (Response::Error { errno }, _) => {
                Err(Error::AcceptFailure(io::Error::from_raw_os_error(errno)))
            }
            (other, _) => Err(accept_failure(unexpected("accept", &other))),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<FramedStream>>> {
        self.state
            .lock()
            .map_err(|_poisoned| Error::Protocol("control channel lock poisoned".into()))
    }

    fn events(&self) -> MutexGuard<'_, HashMap<i32, EventStream>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Backend for ControlChannel {
    fn path(&self) -> &Path {
        &self.path
    }

    fn is_closed(&self) -> bool {
        self.lock().map_or(true, |guard| guard.is_none())
    }

    /// A second call fails with [`Error::UseAfterClose`].
    fn shutdown(&self) -> Result<()> {
        let state = self.lock()?.take().ok_or(Error::UseAfterClose("client"))?;
        drop(state);
        // Pending accepts hold their own reference and see the daemon hang up.
        self.events().clear();
        log::debug!("[patty] control channel closed: {}", self.path.display());
        Ok(())
    }

    fn ping(&self) -> Result<()> {
        match self.call(&Request::Ping)?.0 {
            Response::Pong => Ok(()),
            other => Err(unexpected("ping", &other)),
        }
    }

    fn socket(&self, proto: Protocol, kind: SocketType) -> Result<SocketDescriptor> {
        match self.call(&Request::Socket { proto, kind })?.0 {
            Response::Socket { sock } => Ok(SocketDescriptor::from_raw(sock)),
            Response::Error { errno } => Err(Error::DaemonError { op: "socket", errno }),
            other => Err(unexpected("socket", &other)),
        }
    }

    fn bind(&self, sock: &SocketDescriptor, addr: &Addr) -> Result<()> {
        let req = Request::Bind {
            sock: sock.raw(),
            addr: addr.to_bytes(),
        };
        self.expect_ok("bind", &req)
    }

    fn listen(&self, sock: &SocketDescriptor) -> Result<()> {
        match self.call(&Request::Listen { sock: sock.raw() })? {
            (Response::Listening, Some(events)) => {
                let events = FramedStream::new(UnixStream::from(events));
                self.events()
                    .insert(sock.raw(), Arc::new(Mutex::new(events)));
                Ok(())
            }
            (Response::Error { errno }, _) => Err(Error::DaemonError { op: "listen", errno }),
            (other, _) => Err(unexpected("listen", &other)),
        }
    }

    /// A refusal or link timeout reported by the daemon is a
    /// [`Error::ConnectFailure`].
    fn connect(&self, sock: &SocketDescriptor, addr: &Addr) -> Result<OwnedFd> {
        let req = Request::Connect {
            sock: sock.raw(),
            addr: addr.to_bytes(),
        };
        match self.call(&req)? {
            (Response::Connected, Some(stream)) => Ok(stream),
            (Response::Error { errno }, _) => Err(Error::ConnectFailure {
                target: addr.to_string(),
                source: io::Error::from_raw_os_error(errno),
            }),
            (other, _) => Err(unexpected("connect", &other)),
        }
    }

    /// Blocks until a station connects, holding only the listener's event
    /// stream. Daemon, channel and event stream failures are reported as
    /// [`Error::AcceptFailure`]; a closed channel is still
    /// [`Error::UseAfterClose`].
    fn accept(&self, sock: &SocketDescriptor) -> Result<Accepted> {
        let events = self.events().get(&sock.raw()).map(Arc::clone);

        match self.call(&Request::Accept { sock: sock.raw() }).map_err(accept_failure)? {
            (Response::Ok, _) => {}
            (Response::Error { errno }, _) => {
                return Err(Error::AcceptFailure(io::Error::from_raw_os_error(errno)))
            }
            (other, _) => return Err(accept_failure(unexpected("accept", &other))),
        }

        let events = events.ok_or_else(|| {
            Error::AcceptFailure(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{sock} has no event stream"),
            ))
        })?;
        self.next_accepted(&events)
    }

    fn close(&self, sock: SocketDescriptor) -> Result<()> {
        self.events().remove(&sock.raw());
        self.expect_ok("close", &Request::Close { sock: sock.raw() })
    }
}

fn unexpected(op: &str, resp: &Response) -> Error {
    Error::Protocol(format!("unexpected {op} response: {resp:?}"))
}

fn accept_failure(err: Error) -> Error {
    match err {
        Error::Io(e) => Error::AcceptFailure(e),
        Error::Protocol(msg) => Error::AcceptFailure(io::Error::new(io::ErrorKind::InvalidData, msg)),
        other => other,
    }
}
