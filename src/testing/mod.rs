//! In-process stand-in for pattyd.
//!
//! [`MockDaemon`] speaks the framed control protocol of
//! [`ControlChannel`] on a UNIX socket so the client can be exercised end
//! to end without radio hardware. Connected stations are simulated with
//! socketpairs: `Connect` to a listening address queues one end for that
//! listener and returns the other end to the dialer. Each `Accept` is
//! acknowledged at once; a waiter thread hands the next queued end to the
//! listener's event stream.
//!
//! Errno behaviour:
//!
//! | Situation                                  | errno          |
//! |--------------------------------------------|----------------|
//! | `Connect` to an address nobody listens on  | `ECONNREFUSED` |
//! | `Bind` to an address already bound         | `EADDRINUSE`   |
//! | `Bind` on an already bound socket          | `EINVAL`       |
//! | `Listen` on an unbound socket              | `EDESTADDRREQ` |
//! | `Listen` on a listening socket             | `EINVAL`       |
//! | `Accept` on a non-listening socket         | `EINVAL`       |
//! | Unknown or foreign socket descriptor       | `EBADF`        |
//!
//! Sockets still open when a control connection drops are reclaimed.
//!
//! Compiled for this crate's tests and behind the `testing` feature.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use crate::addr::Addr;
use crate::client::Client;
use crate::control::protocol::{encode_response, Frame, FrameDecoder, Request, Response};
use crate::control::scm::send_with_fd;
use crate::control::ControlChannel;
use crate::error::Result;

/// Station address the mock reports for dialers whose socket is unbound.
pub const DEFAULT_STATION: &str = "N0CALL";

/// A peer waiting to be accepted: its address and the listener's end of
/// the data stream.
struct Pending {
    peer: Addr,
    stream: UnixStream,
}

struct SockEntry {
    owner: u64,
    bound: Option<Addr>,
    incoming: Option<Arc<Mutex<Receiver<Pending>>>>,
    // Daemon end of a listener's event stream.
    events: Option<UnixStream>,
}

#[derive(Default)]
struct DaemonState {
    next_sock: i32,
    sockets: HashMap<i32, SockEntry>,
    listeners: HashMap<Addr, Sender<Pending>>,
}

impl DaemonState {
    fn alloc(&mut self, owner: u64, bound: Option<Addr>) -> i32 {
        self.next_sock += 1;
        let sock = self.next_sock;
        self.sockets.insert(
            sock,
            SockEntry {
                owner,
                bound,
                incoming: None,
                events: None,
            },
        );
        sock
    }

    fn owned(&mut self, owner: u64, sock: i32) -> Option<&mut SockEntry> {
        self.sockets.get_mut(&sock).filter(|e| e.owner == owner)
    }

    fn release(&mut self, sock: i32) {
        let Some(entry) = self.sockets.remove(&sock) else {
            return;
        };
        if entry.incoming.is_some() {
            if let Some(addr) = entry.bound {
                // Dropping the sender wakes waiters blocked on this listener
                self.listeners.remove(&addr);
            }
        }
        if let Some(events) = entry.events {
            if let Err(e) = events.shutdown(Shutdown::Both) {
                log::debug!("[mock-daemon] shut down events of sock {sock}: {e}");
            }
        }
    }
}

struct Shared {
    station: Addr,
    stopping: AtomicBool,
    requests: AtomicUsize,
    next_conn: AtomicU64,
    state: Mutex<DaemonState>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, DaemonState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A running mock daemon. Stops when dropped.
pub struct MockDaemon {
    path: PathBuf,
    shared: Arc<Shared>,
    acceptor: Option<thread::JoinHandle<()>>,
}

impl std::fmt::Debug for MockDaemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDaemon")
            .field("path", &self.path)
            .field("station", &self.shared.station)
            .finish_non_exhaustive()
    }
}

impl MockDaemon {
    /// Start a daemon listening on `path`, reporting dialers as
    /// [`DEFAULT_STATION`].
    pub fn start(path: impl AsRef<Path>) -> io::Result<Self> {
        let station = Addr::parse(DEFAULT_STATION)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        Self::with_station(path, station)
    }

    /// Start a daemon that reports unbound dialers as `station`.
    pub fn with_station(path: impl AsRef<Path>, station: Addr) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let listener = UnixListener::bind(&path)?;
        let shared = Arc::new(Shared {
            station,
            stopping: AtomicBool::new(false),
            requests: AtomicUsize::new(0),
            next_conn: AtomicU64::new(0),
            state: Mutex::new(DaemonState::default()),
        });

        let acceptor_shared = Arc::clone(&shared);
        let acceptor = thread::Builder::new()
            .name("mock-daemon".into())
            .spawn(move || accept_loop(&listener, &acceptor_shared))?;

        log::debug!("[mock-daemon] listening on {}", path.display());
        Ok(Self {
            path,
            shared,
            acceptor: Some(acceptor),
        })
    }

    /// Control socket path.
    pub fn socket_path(&self) -> &Path {
        &self.path
    }

    /// Address reported for dialers with unbound sockets.
    pub fn station(&self) -> Addr {
        self.shared.station
    }

    /// Total number of requests received on all control connections.
    pub fn request_count(&self) -> usize {
        self.shared.requests.load(Ordering::SeqCst)
    }

    /// Number of daemon sockets currently open.
    pub fn open_sockets(&self) -> usize {
        self.shared.state().sockets.len()
    }

    /// Open a [`Client`] speaking this daemon's control protocol.
    pub fn client(&self) -> Result<Client> {
        Ok(Client::with_backend(ControlChannel::open(&self.path)?))
    }
}

impl Drop for MockDaemon {
    fn drop(&mut self) {
        self.shared.stopping.store(true, Ordering::SeqCst);
        // Wake the acceptor so it sees the stop flag
        if let Err(e) = UnixStream::connect(&self.path) {
            log::debug!("[mock-daemon] wake on shutdown: {e}");
        }
        if let Some(acceptor) = self.acceptor.take() {
            if acceptor.join().is_err() {
                log::warn!("[mock-daemon] acceptor thread panicked");
            }
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            log::debug!("[mock-daemon] remove {}: {e}", self.path.display());
        }
    }
}

fn accept_loop(listener: &UnixListener, shared: &Arc<Shared>) {
    for stream in listener.incoming() {
        if shared.stopping.load(Ordering::SeqCst) {
            break;
        }
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                log::warn!("[mock-daemon] accept: {e}");
                continue;
            }
        };
        let conn_id = shared.next_conn.fetch_add(1, Ordering::SeqCst);
        let conn_shared = Arc::clone(shared);
        let spawned = thread::Builder::new()
            .name(format!("mock-daemon-{conn_id}"))
            .spawn(move || handle_connection(stream, conn_id, &conn_shared));
        if let Err(e) = spawned {
            log::warn!("[mock-daemon] spawn handler: {e}");
        }
    }
}

fn handle_connection(mut stream: UnixStream, conn_id: u64, shared: &Arc<Shared>) {
    log::debug!("[mock-daemon] client {conn_id} connected");
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 4096];

    'conn: loop {
        let n = match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let frames = match decoder.feed(&buf[..n]) {
            Ok(f) => f,
            Err(e) => {
                log::warn!("[mock-daemon] frame decode error: {e}");
                break;
            }
        };
        for frame in frames {
            let Frame::Request(req) = frame else {
                log::debug!("[mock-daemon] ignoring unexpected frame direction");
                continue;
            };
            shared.requests.fetch_add(1, Ordering::SeqCst);
            let (resp, fd) = handle_request(&req, conn_id, shared);
            if let Err(e) = reply(&mut stream, &resp, fd.as_ref()) {
                log::debug!("[mock-daemon] reply to client {conn_id}: {e}");
                break 'conn;
            }
        }
    }

    // Reclaim everything the client left open.
    let mut state = shared.state();
    let leaked: Vec<i32> = state
        .sockets
        .iter()
        .filter(|(_, e)| e.owner == conn_id)
        .map(|(&sock, _)| sock)
        .collect();
    for sock in &leaked {
        state.release(*sock);
    }
    log::debug!(
        "[mock-daemon] client {conn_id} disconnected, reclaimed {} socket(s)",
        leaked.len()
    );
}

fn reply(stream: &mut UnixStream, resp: &Response, fd: Option<&UnixStream>) -> io::Result<()> {
    let bytes = encode_response(resp).map_err(io::Error::from)?;
    match fd {
        Some(fd) => send_with_fd(stream, &bytes, fd),
        None => stream.write_all(&bytes),
    }
}

fn handle_request(
    req: &Request,
    conn: u64,
    shared: &Arc<Shared>,
) -> (Response, Option<UnixStream>) {
    let err = |errno| (Response::Error { errno }, None);

    match *req {
        Request::Ping => (Response::Pong, None),

        Request::Socket { .. } => {
            let sock = shared.state().alloc(conn, None);
            (Response::Socket { sock }, None)
        }

        Request::Bind { sock, addr } => {
            let Ok(addr) = Addr::from_bytes(addr) else {
                return err(libc::EINVAL);
            };
            let mut state = shared.state();
            if state.sockets.values().any(|e| e.bound == Some(addr)) {
                return err(libc::EADDRINUSE);
            }
            match state.owned(conn, sock) {
                None => err(libc::EBADF),
                Some(entry) if entry.bound.is_some() => err(libc::EINVAL),
                Some(entry) => {
                    entry.bound = Some(addr);
                    (Response::Ok, None)
                }
            }
        }

        Request::Listen { sock } => {
            let mut state = shared.state();
            let addr = match state.owned(conn, sock) {
                None => return err(libc::EBADF),
                Some(SockEntry { bound: None, .. }) => return err(libc::EDESTADDRREQ),
                Some(entry) if entry.incoming.is_some() => return err(libc::EINVAL),
                Some(entry) => entry.bound,
            };
            let (ours, theirs) = match UnixStream::pair() {
                Ok(pair) => pair,
                Err(e) => return err(e.raw_os_error().unwrap_or(libc::EIO)),
            };
            let (tx, rx) = mpsc::channel();
            if let Some(entry) = state.owned(conn, sock) {
                entry.incoming = Some(Arc::new(Mutex::new(rx)));
                entry.events = Some(ours);
            }
            if let Some(addr) = addr {
                state.listeners.insert(addr, tx);
            }
            (Response::Listening, Some(theirs))
        }

        Request::Connect { sock, addr } => {
            let Ok(remote) = Addr::from_bytes(addr) else {
                return err(libc::EINVAL);
            };
            let mut state = shared.state();
            let peer = match state.owned(conn, sock) {
                None => return err(libc::EBADF),
                Some(entry) => entry.bound.unwrap_or(shared.station),
            };
            let Some(tx) = state.listeners.get(&remote) else {
                return err(libc::ECONNREFUSED);
            };
            let (ours, theirs) = match UnixStream::pair() {
                Ok(pair) => pair,
                Err(e) => return err(e.raw_os_error().unwrap_or(libc::EIO)),
            };
            if tx.send(Pending { peer, stream: theirs }).is_err() {
                return err(libc::ECONNREFUSED);
            }
            log::debug!("[mock-daemon] {peer} connected to {remote}");
            (Response::Connected, Some(ours))
        }

        Request::Accept { sock } => {
            let (incoming, events) = {
                let mut state = shared.state();
                match state.owned(conn, sock) {
                    None => return err(libc::EBADF),
                    Some(SockEntry {
                        incoming: Some(rx),
                        events: Some(events),
                        ..
                    }) => (Arc::clone(rx), events.try_clone()),
                    Some(_) => return err(libc::EINVAL),
                }
            };
            let events = match events {
                Ok(events) => events,
                Err(e) => return err(e.raw_os_error().unwrap_or(libc::EIO)),
            };

            let waiter_shared = Arc::clone(shared);
            let spawned = thread::Builder::new()
                .name(format!("mock-daemon-accept-{sock}"))
                .spawn(move || deliver_next(&incoming, events, sock, conn, &waiter_shared));
            match spawned {
                Ok(_) => (Response::Ok, None),
                Err(e) => err(e.raw_os_error().unwrap_or(libc::EAGAIN)),
            }
        }

        Request::Close { sock } => {
            let mut state = shared.state();
            if state.owned(conn, sock).is_none() {
                return err(libc::EBADF);
            }
            state.release(sock);
            (Response::Ok, None)
        }
    }
}

/// Hand the next queued peer of listener `sock` to its event stream.
///
/// Returns without delivering once the listener is released.
fn deliver_next(
    incoming: &Mutex<Receiver<Pending>>,
    mut events: UnixStream,
    sock: i32,
    conn: u64,
    shared: &Shared,
) {
    let pending = incoming.lock().unwrap_or_else(PoisonError::into_inner).recv();
    let Ok(pending) = pending else {
        log::debug!("[mock-daemon] sock {sock} closed while accepting");
        return;
    };

    let new_sock = shared.state().alloc(conn, None);
    let resp = Response::Accepted {
        sock: new_sock,
        peer: pending.peer.to_bytes(),
    };
    if let Err(e) = reply(&mut events, &resp, Some(&pending.stream)) {
        log::debug!("[mock-daemon] deliver to sock {sock}: {e}");
        shared.state().release(new_sock);
        return;
    }
    log::debug!("[mock-daemon] {} accepted on sock {sock} as {new_sock}", pending.peer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, Protocol, SocketType};
    use crate::Error;

    #[test]
    fn test_ping_counts_requests() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = MockDaemon::start(dir.path().join("d.sock")).unwrap();
        let chan = ControlChannel::open(daemon.socket_path()).unwrap();
        chan.ping().unwrap();
        chan.ping().unwrap();
        assert_eq!(daemon.request_count(), 2);
    }

    #[test]
    fn test_duplicate_bind_is_addr_in_use() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = MockDaemon::start(dir.path().join("d.sock")).unwrap();
        let chan = ControlChannel::open(daemon.socket_path()).unwrap();
        let addr = Addr::parse("K3XEC-10").unwrap();

        let a = chan.socket(Protocol::None, SocketType::Stream).unwrap();
        chan.bind(&a, &addr).unwrap();
        let b = chan.socket(Protocol::None, SocketType::Stream).unwrap();
        let err = chan.bind(&b, &addr).unwrap_err();
        assert_eq!(err.errno(), Some(libc::EADDRINUSE));
    }

    #[test]
    fn test_foreign_descriptor_is_ebadf() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = MockDaemon::start(dir.path().join("d.sock")).unwrap();
        let owner = ControlChannel::open(daemon.socket_path()).unwrap();
        let other = ControlChannel::open(daemon.socket_path()).unwrap();

        let sock = owner.socket(Protocol::None, SocketType::Stream).unwrap();
        let err = other.listen(&sock).unwrap_err();
        assert!(matches!(err, Error::DaemonError { op: "listen", errno } if errno == libc::EBADF));
    }

    #[test]
    fn test_disconnect_reclaims_sockets() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = MockDaemon::start(dir.path().join("d.sock")).unwrap();
        let chan = ControlChannel::open(daemon.socket_path()).unwrap();
        let _a = chan.socket(Protocol::None, SocketType::Stream).unwrap();
        let _b = chan.socket(Protocol::None, SocketType::Stream).unwrap();
        assert_eq!(daemon.open_sockets(), 2);

        chan.shutdown().unwrap();
        // The handler reclaims asynchronously after seeing EOF
        let watcher = ControlChannel::open(daemon.socket_path()).unwrap();
        for _ in 0..100 {
            if daemon.open_sockets() == 0 {
                break;
            }
            watcher.ping().unwrap();
            thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(daemon.open_sockets(), 0);
    }

    #[test]
    fn test_listen_twice_is_einval() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = MockDaemon::start(dir.path().join("d.sock")).unwrap();
        let chan = ControlChannel::open(daemon.socket_path()).unwrap();
        let sock = chan.socket(Protocol::None, SocketType::Stream).unwrap();
        chan.bind(&sock, &Addr::parse("K3XEC-12").unwrap()).unwrap();
        chan.listen(&sock).unwrap();
        let err = chan.listen(&sock).unwrap_err();
        assert_eq!(err.errno(), Some(libc::EINVAL));
    }

    #[test]
    fn test_accept_is_acknowledged_before_a_peer_arrives() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = MockDaemon::start(dir.path().join("d.sock")).unwrap();
        let chan = ControlChannel::open(daemon.socket_path()).unwrap();
        let sock = chan.socket(Protocol::None, SocketType::Stream).unwrap();
        chan.bind(&sock, &Addr::parse("K3XEC-13").unwrap()).unwrap();
        chan.listen(&sock).unwrap();

        let (resp, fd) = chan.call(&Request::Accept { sock: sock.raw() }).unwrap();
        assert_eq!(resp, Response::Ok);
        assert!(fd.is_none());
        // The channel is free while the daemon waits for a peer
        chan.ping().unwrap();
    }
}
