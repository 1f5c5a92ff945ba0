//! Client entry points: open, dial, listen, close.
//!
//! # Lifecycle
//!
//! ```text
//! Client::open(path) ──► LibPatty::open         (feature "libpatty")
//!                    └─► ControlChannel::open   (otherwise)
//!
//! dial("ax25", "N0CALL-1")   ──► Socket ─► Connect ─────────► Conn
//! listen("ax25", "K3XEC-10") ──► Socket ─► Bind ─► Listen ──► Listener
//!                                              Listener::accept ─► Conn
//!
//! Client::close() ──► backend released, daemon reclaims sockets
//! ```
//!
//! Failed dials and listens close the socket they created before
//! returning the error.

use std::path::Path;
use std::sync::Arc;

use crate::addr::Addr;
use crate::config::Config;
use crate::conn::Conn;
use crate::backend::{Backend, Protocol, SocketDescriptor, SocketType};
use crate::constants::NETWORK;
use crate::error::{Error, Result};
use crate::listener::Listener;

/// A connection to the pattyd daemon.
///
/// Listeners and connections created by a client share its backend.
/// Closing the client invalidates their daemon operations; their data
/// streams stay readable until closed.
///
/// A client may be shared between threads.
#[derive(Debug)]
pub struct Client {
    backend: Arc<dyn Backend>,
}

impl Client {
    /// Connect to the daemon's control socket at `path`.
    ///
    /// Goes through libpatty when built with the `libpatty` feature, and
    /// through the framed [`ControlChannel`](crate::ControlChannel)
    /// otherwise.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        #[cfg(feature = "libpatty")]
        let backend = crate::libpatty::LibPatty::open(path)?;
        #[cfg(not(feature = "libpatty"))]
        let backend = crate::control::ControlChannel::open(path)?;
        Ok(Self::with_backend(backend))
    }

    /// Wrap an already open backend.
    pub fn with_backend(backend: impl Backend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// Connect using the socket path from `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::open(&config.socket_path)
    }

    /// Release the daemon connection.
    ///
    /// A second call, or any later operation through this client, fails
    /// with [`Error::UseAfterClose`].
    pub fn close(&self) -> Result<()> {
        self.backend.shutdown()
    }

    /// Returns `true` once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.backend.is_closed()
    }

    /// Socket path this client was opened on.
    pub fn socket_path(&self) -> &Path {
        self.backend.path()
    }

    /// Raw socket operations on this client's backend.
    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Check that the daemon is alive.
    pub fn ping(&self) -> Result<()> {
        self.backend.ping()
    }

    /// Connect to a remote station.
    ///
    /// `network` must be `"ax25"`; `address` is `CALLSIGN[-SSID]`. The
    /// returned connection has no local address (see
    /// [`Conn::local_addr`]).
    pub fn dial(&self, network: &str, address: &str) -> Result<Conn> {
        let remote = resolve(network, address)?;

        let sock = self.backend.socket(Protocol::None, SocketType::Stream)?;
        match self.backend.connect(&sock, &remote) {
            Ok(stream) => {
                log::debug!("[patty] dialed {remote} ({sock})");
                Ok(Conn::new(Arc::clone(&self.backend), sock, stream, None, remote))
            }
            Err(e) => {
                self.discard(sock, "dial");
                Err(e)
            }
        }
    }

    /// Bind to a local station address and start listening.
    pub fn listen(&self, network: &str, address: &str) -> Result<Listener> {
        let local = resolve(network, address)?;

        let sock = self.backend.socket(Protocol::None, SocketType::Stream)?;
        let setup = self
            .backend
            .bind(&sock, &local)
            .and_then(|()| self.backend.listen(&sock));
        if let Err(e) = setup {
            self.discard(sock, "listen");
            return Err(e);
        }

        log::debug!("[patty] listening on {local} ({sock})");
        Ok(Listener::new(Arc::clone(&self.backend), sock, local))
    }

    /// Best-effort close of a socket whose setup failed.
    fn discard(&self, sock: SocketDescriptor, op: &str) {
        if let Err(e) = self.backend.close(sock) {
            log::warn!("[patty] {op}: closing failed socket: {e}");
        }
    }
}

fn resolve(network: &str, address: &str) -> Result<Addr> {
    if network != NETWORK {
        return Err(Error::UnsupportedNetwork(network.to_string()));
    }
    Addr::parse(address)
}
