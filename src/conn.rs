//! AX.25 stream connections.
//!
//! A [`Conn`] pairs two distinct resources:
//!
//! - the daemon-side socket descriptor, released through the client's
//!   [`Backend`];
//! - the data stream descriptor, which carries the connection's bytes.
//!
//! Reads and writes go straight to the data stream and never touch the
//! backend. [`Conn::close`] releases both, each exactly once.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::io::OwnedFd;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::addr::Addr;
use crate::backend::{Backend, SocketDescriptor};
use crate::error::{Error, Result};

/// A connected AX.25 byte stream.
///
/// Implements [`Read`] and [`Write`] for both `Conn` and `&Conn`, so one
/// thread can read while another writes.
pub struct Conn {
    local: Option<Addr>,
    remote: Addr,
    socket: Mutex<Option<SocketDescriptor>>,
    // Readers clone the Arc so close() never waits for a blocked read.
    stream: Mutex<Option<Arc<File>>>,
    backend: Arc<dyn Backend>,
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Conn {
    pub(crate) fn new(
        backend: Arc<dyn Backend>,
        socket: SocketDescriptor,
        stream: OwnedFd,
        local: Option<Addr>,
        remote: Addr,
    ) -> Self {
        Self {
            local,
            remote,
            socket: Mutex::new(Some(socket)),
            stream: Mutex::new(Some(Arc::new(File::from(stream)))),
            backend,
        }
    }

    /// Local station address.
    ///
    /// `None` for dialed connections: the daemon does not report which
    /// callsign it used for an outgoing connect. Accepted connections
    /// report the listener's bound address.
    pub fn local_addr(&self) -> Option<Addr> {
        self.local
    }

    /// Address of the remote station.
    pub fn remote_addr(&self) -> Addr {
        self.remote
    }

    /// Returns `true` once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        lock(&self.stream).is_none()
    }

    /// Close the connection.
    ///
    /// Closes the daemon socket, then releases the data
    /// stream. The stream is released even when the daemon call fails. A
    /// second call fails with [`Error::UseAfterClose`].
    pub fn close(&self) -> Result<()> {
        let socket = lock(&self.socket)
            .take()
            .ok_or(Error::UseAfterClose("connection"))?;
        let stream = lock(&self.stream).take();

        log::debug!("[patty] closing connection to {} ({socket})", self.remote);
        let result = self.backend.close(socket);
        drop(stream);
        result
    }

    /// Deadlines are not supported.
    pub fn set_deadline(&self, _deadline: Option<Instant>) -> Result<()> {
        Err(Error::NotImplemented("set_deadline"))
    }

    /// Read deadlines are not supported.
    pub fn set_read_deadline(&self, _deadline: Option<Instant>) -> Result<()> {
        Err(Error::NotImplemented("set_read_deadline"))
    }

    /// Write deadlines are not supported.
    pub fn set_write_deadline(&self, _deadline: Option<Instant>) -> Result<()> {
        Err(Error::NotImplemented("set_write_deadline"))
    }

    fn stream(&self) -> io::Result<Arc<File>> {
        lock(&self.stream)
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| Error::UseAfterClose("connection").into())
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Read for &Conn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let file = self.stream()?;
        (&*file).read(buf)
    }
}

impl Write for &Conn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let file = self.stream()?;
        (&*file).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let file = self.stream()?;
        (&*file).flush()
    }
}

impl Read for Conn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (&*self).read(buf)
    }
}

impl Write for Conn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&*self).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (&*self).flush()
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        match self.close() {
            Ok(()) => {}
            Err(e) if e.is_use_after_close() => {
                log::debug!("[patty] connection to {} dropped after client close", self.remote);
            }
            Err(e) => log::warn!("[patty] close on drop for {}: {e}", self.remote),
        }
    }
}
