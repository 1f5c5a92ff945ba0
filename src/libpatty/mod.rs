//! Backend over the C client library shipped with pattyd.
//!
//! Built with the `libpatty` feature and linked with `-lpatty`. This is the
//! backend [`Client::open`](crate::Client::open) uses when the feature is
//! enabled, and the one that talks to a real daemon.
//!
//! In libpatty a socket's local descriptor is also its data stream. A
//! [`Conn`](crate::Conn) gets a duplicate of it, so `patty_client_close`
//! remains the only call that closes the original.
//!
//! libpatty clients are not thread safe, so every call runs under one
//! mutex. `patty_client_accept` reads the listener's descriptor inside that
//! call: while a listener waits, other operations through the same
//! [`LibPatty`] wait behind it. Use a second client to dial or close while
//! another thread is blocked in accept.

mod sys;

use std::ffi::{CStr, CString};
use std::fmt;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{BorrowedFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard};

use libc::c_int;

use crate::addr::Addr;
use crate::backend::{Accepted, Backend, Protocol, SocketDescriptor, SocketType};
use crate::constants::{ADDR_LEN, CALLSIGN_LEN};
use crate::error::{Error, Result};

/// Room for `CALLSIGN-SSID` plus NUL.
const NTOP_BUF_LEN: usize = 64;

struct Handle(NonNull<sys::patty_client>);

// SAFETY: a patty_client is heap state plus a socket descriptor, with no
// thread affinity. LibPatty only touches it while holding its mutex.
unsafe impl Send for Handle {}

/// An open libpatty client.
pub struct LibPatty {
    path: PathBuf,
    client: Mutex<Option<Handle>>,
}

impl fmt::Debug for LibPatty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibPatty")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl LibPatty {
    /// Connect to pattyd through `patty_client_new`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let target = path.display().to_string();

        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|e| {
            Error::ConnectFailure {
                target: target.clone(),
                source: io::Error::new(io::ErrorKind::InvalidInput, e),
            }
        })?;

        // SAFETY: c_path is a NUL-terminated string that outlives the call.
        let raw = unsafe { sys::patty_client_new(c_path.as_ptr()) };
        let handle = NonNull::new(raw).ok_or_else(|| Error::ConnectFailure {
            target,
            source: io::Error::last_os_error(),
        })?;
        log::debug!("[patty] libpatty client open: {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            client: Mutex::new(Some(Handle(handle))),
        })
    }

    /// Run `f` on the live client handle. A negative return becomes the
    /// errno captured right after the call.
    fn call(&self, f: impl FnOnce(*mut sys::patty_client) -> c_int) -> Result<io::Result<c_int>> {
        let guard = self.lock()?;
        let handle = guard.as_ref().ok_or(Error::UseAfterClose("client"))?;
        let ret = f(handle.0.as_ptr());
        if ret < 0 {
            return Ok(Err(io::Error::last_os_error()));
        }
        Ok(Ok(ret))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Handle>>> {
        self.client
            .lock()
            .map_err(|_poisoned| Error::Protocol("libpatty client lock poisoned".into()))
    }
}

impl Backend for LibPatty {
    fn path(&self) -> &Path {
        &self.path
    }

    fn is_closed(&self) -> bool {
        self.lock().map_or(true, |guard| guard.is_none())
    }

    fn shutdown(&self) -> Result<()> {
        let handle = self.lock()?.take().ok_or(Error::UseAfterClose("client"))?;
        // SAFETY: the handle came from patty_client_new and was just taken
        // out of the mutex, so nothing else can reach it.
        unsafe { sys::patty_client_destroy(handle.0.as_ptr()) };
        log::debug!("[patty] libpatty client closed: {}", self.path.display());
        Ok(())
    }

    fn ping(&self) -> Result<()> {
        let mut pong: c_int = 0;
        // SAFETY: client is live under the lock; pong outlives the call.
        self.call(|client| unsafe { sys::patty_client_ping(client, &mut pong) })?
            .map(drop)
            .map_err(|e| daemon_error("ping", &e))
    }

    fn socket(&self, proto: Protocol, kind: SocketType) -> Result<SocketDescriptor> {
        let (proto, kind) = (proto_code(proto), kind_code(kind));
        // SAFETY: client is live under the lock.
        self.call(|client| unsafe { sys::patty_client_socket(client, proto, kind) })?
            .map(SocketDescriptor::from_raw)
            .map_err(|e| daemon_error("socket", &e))
    }

    fn bind(&self, sock: &SocketDescriptor, addr: &Addr) -> Result<()> {
        let mut record = to_record(addr);
        // SAFETY: client is live under the lock; record outlives the call.
        self.call(|client| unsafe { sys::patty_client_bind(client, sock.raw(), &mut record) })?
            .map(drop)
            .map_err(|e| daemon_error("bind", &e))
    }

    fn listen(&self, sock: &SocketDescriptor) -> Result<()> {
        // SAFETY: client is live under the lock.
        self.call(|client| unsafe { sys::patty_client_listen(client, sock.raw()) })?
            .map(drop)
            .map_err(|e| daemon_error("listen", &e))
    }

    fn connect(&self, sock: &SocketDescriptor, addr: &Addr) -> Result<OwnedFd> {
        let mut record = to_record(addr);
        // SAFETY: client is live under the lock; record outlives the call.
        self.call(|client| unsafe { sys::patty_client_connect(client, sock.raw(), &mut record) })?
            .map_err(|source| Error::ConnectFailure {
                target: addr.to_string(),
                source,
            })?;
        Ok(data_stream(sock.raw())?)
    }

    /// Holds this client's lock until a station connects.
    fn accept(&self, sock: &SocketDescriptor) -> Result<Accepted> {
        let mut record = sys::patty_ax25_addr::default();
        // SAFETY: client is live under the lock; record outlives the call.
        let fd = self
            .call(|client| unsafe { sys::patty_client_accept(client, sock.raw(), &mut record) })?
            .map_err(Error::AcceptFailure)?;
        let socket = SocketDescriptor::from_raw(fd);

        let accepted = Addr::from_bytes(from_record(&record))
            .and_then(|peer| Ok((peer, data_stream(fd).map_err(Error::AcceptFailure)?)));
        match accepted {
            Ok((peer, stream)) => Ok(Accepted { socket, peer, stream }),
            Err(e) => {
                if let Err(close_err) = self.close(socket) {
                    log::warn!("[patty] close after failed accept: {close_err}");
                }
                Err(e)
            }
        }
    }

    fn close(&self, sock: SocketDescriptor) -> Result<()> {
        // SAFETY: client is live under the lock.
        self.call(|client| unsafe { sys::patty_client_close(client, sock.raw()) })?
            .map(drop)
            .map_err(|e| daemon_error("close", &e))
    }
}

impl Drop for LibPatty {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        if let Err(e) = self.shutdown() {
            log::warn!("[patty] destroy on drop: {e}");
        }
    }
}

// ─── Address records ───────────────────────────────────────────────────────

fn to_record(addr: &Addr) -> sys::patty_ax25_addr {
    record_from_bytes(addr.to_bytes())
}

fn record_from_bytes(bytes: [u8; ADDR_LEN]) -> sys::patty_ax25_addr {
    let mut callsign = [0u8; CALLSIGN_LEN];
    callsign.copy_from_slice(&bytes[..CALLSIGN_LEN]);
    sys::patty_ax25_addr {
        callsign,
        ssid: bytes[CALLSIGN_LEN],
    }
}

fn from_record(record: &sys::patty_ax25_addr) -> [u8; ADDR_LEN] {
    let mut bytes = [0u8; ADDR_LEN];
    bytes[..CALLSIGN_LEN].copy_from_slice(&record.callsign);
    bytes[CALLSIGN_LEN] = record.ssid;
    bytes
}

/// Parse `CALLSIGN[-SSID]` with `patty_ax25_pton`, returning the record.
pub fn pton(text: &str) -> Result<[u8; ADDR_LEN]> {
    let invalid = |reason| Error::InvalidAddress {
        input: text.to_string(),
        reason,
    };
    let c_text = CString::new(text).map_err(|_nul| invalid("address contains NUL"))?;
    let mut record = sys::patty_ax25_addr::default();
    // SAFETY: c_text is NUL-terminated and record is a valid out pointer,
    // both alive for the call.
    let ret = unsafe { sys::patty_ax25_pton(c_text.as_ptr(), &mut record) };
    if ret < 0 {
        return Err(invalid("rejected by patty_ax25_pton"));
    }
    Ok(from_record(&record))
}

/// Render a record with `patty_ax25_ntop`.
pub fn ntop(record: [u8; ADDR_LEN]) -> Result<String> {
    let fail = |reason| Error::FormatFailure {
        record: record.to_vec(),
        reason,
    };
    let addr = record_from_bytes(record);
    let mut buf: [libc::c_char; NTOP_BUF_LEN] = [0; NTOP_BUF_LEN];
    // SAFETY: buf is writable for its full length, which is the length
    // passed; addr is a valid record for the call.
    let ret = unsafe { sys::patty_ax25_ntop(&addr, buf.as_mut_ptr(), buf.len()) };
    if ret < 0 {
        return Err(fail("rejected by patty_ax25_ntop"));
    }
    let bytes: Vec<u8> = buf.iter().map(|c| u8::from_ne_bytes(c.to_ne_bytes())).collect();
    let text = CStr::from_bytes_until_nul(&bytes)
        .map_err(|_missing| fail("patty_ax25_ntop output is not terminated"))?;
    text.to_str()
        .map(str::to_owned)
        .map_err(|_utf8| fail("patty_ax25_ntop produced non-UTF-8 text"))
}

// ─── Helpers ───────────────────────────────────────────────────────────────

fn proto_code(proto: Protocol) -> c_int {
    match proto {
        Protocol::None => sys::PATTY_AX25_PROTO_NONE,
    }
}

fn kind_code(kind: SocketType) -> c_int {
    match kind {
        SocketType::Stream => sys::PATTY_AX25_SOCK_STREAM,
    }
}

fn daemon_error(op: &'static str, err: &io::Error) -> Error {
    Error::DaemonError {
        op,
        errno: err.raw_os_error().unwrap_or(libc::EIO),
    }
}

/// Duplicate libpatty's socket descriptor for use as a data stream.
fn data_stream(fd: c_int) -> io::Result<OwnedFd> {
    // SAFETY: fd was just returned by libpatty and stays open until
    // patty_client_close; the borrow ends before this function returns.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    borrowed.try_clone_to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pton_agrees_with_addr_parse() {
        for text in ["N0CALL", "N0CALL-6", "K3XEC-10", "W1AW-15", "A"] {
            let ours = Addr::parse(text).unwrap();
            let theirs = Addr::from_bytes(pton(text).unwrap()).unwrap();
            assert_eq!(theirs, ours, "{text}");
        }
    }

    #[test]
    fn test_ntop_agrees_with_display() {
        for text in ["N0CALL", "N0CALL-6", "K3XEC-10", "W1AW-15"] {
            let addr = Addr::parse(text).unwrap();
            assert_eq!(ntop(addr.to_bytes()).unwrap(), addr.to_string());
        }
    }

    #[test]
    fn test_record_layout_matches_addr() {
        assert_eq!(std::mem::size_of::<sys::patty_ax25_addr>(), ADDR_LEN);
        let addr = Addr::parse("K3XEC-10").unwrap();
        assert_eq!(from_record(&to_record(&addr)), addr.to_bytes());
    }

    #[test]
    fn test_open_missing_socket_is_connect_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = LibPatty::open(dir.path().join("absent.sock")).unwrap_err();
        assert!(matches!(err, Error::ConnectFailure { .. }), "{err:?}");
    }
}
