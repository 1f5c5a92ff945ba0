//! Listening AX.25 sockets.

use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use crate::addr::Addr;
use crate::backend::{Backend, SocketDescriptor};
use crate::conn::Conn;
use crate::error::{Error, Result};

/// A socket bound to a local station address and accepting connections.
///
/// [`accept`](Self::accept) can be called repeatedly until
/// [`close`](Self::close). Closing the listener does not affect
/// connections it already produced.
pub struct Listener {
    addr: Addr,
    // Taken by close(); accept() only reads the raw handle.
    socket: Mutex<Option<SocketDescriptor>>,
    backend: Arc<dyn Backend>,
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("addr", &self.addr)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Listener {
    pub(crate) fn new(backend: Arc<dyn Backend>, socket: SocketDescriptor, addr: Addr) -> Self {
        Self {
            addr,
            socket: Mutex::new(Some(socket)),
            backend,
        }
    }

    /// The bound local address.
    pub fn addr(&self) -> Addr {
        self.addr
    }

    /// Returns `true` once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Wait for the next incoming connection.
    ///
    /// Blocks without timeout until a station connects. The listener stays
    /// usable meanwhile: [`close`](Self::close) from another thread ends
    /// the wait with [`Error::AcceptFailure`], and the client can dial or
    /// listen elsewhere. A closed listener fails immediately with
    /// [`Error::AcceptFailure`].
    pub fn accept(&self) -> Result<Conn> {
        let raw = self
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(SocketDescriptor::raw);
        let Some(raw) = raw else {
            return Err(Error::AcceptFailure(io::Error::new(
                io::ErrorKind::NotConnected,
                "listener is closed",
            )));
        };

        let accepted = self.backend.accept(&SocketDescriptor::from_raw(raw))?;

        log::debug!(
            "[patty] accepted {} on {} ({})",
            accepted.peer,
            self.addr,
            accepted.socket
        );
        Ok(Conn::new(
            Arc::clone(&self.backend),
            accepted.socket,
            accepted.stream,
            Some(self.addr),
            accepted.peer,
        ))
    }

    /// Iterator over incoming connections.
    ///
    /// Yields the result of each [`accept`](Self::accept) and ends once
    /// the listener is closed.
    pub fn incoming(&self) -> Incoming<'_> {
        Incoming { listener: self }
    }

    /// Stop listening and release the daemon socket.
    ///
    /// A second call fails with [`Error::UseAfterClose`].
    pub fn close(&self) -> Result<()> {
        let sock = self
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(Error::UseAfterClose("listener"))?;
        log::debug!("[patty] closing listener {} ({sock})", self.addr);
        self.backend.close(sock)
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        match self.close() {
            Ok(()) => {}
            Err(e) if e.is_use_after_close() => {
                log::debug!("[patty] listener {} dropped after client close", self.addr);
            }
            Err(e) => log::warn!("[patty] close on drop for listener {}: {e}", self.addr),
        }
    }
}

/// Iterator returned by [`Listener::incoming`].
#[derive(Debug)]
pub struct Incoming<'a> {
    listener: &'a Listener,
}

impl Iterator for Incoming<'_> {
    type Item = Result<Conn>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.listener.is_closed() {
            return None;
        }
        Some(self.listener.accept())
    }
}
