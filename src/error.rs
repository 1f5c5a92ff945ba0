//! Error types for the patty client.
//!
//! Every daemon call result is checked and mapped onto one of these
//! variants; nothing is retried and nothing is dropped on the floor.
//! Daemon error codes are POSIX errno values and render through
//! [`std::io::Error::from_raw_os_error`].

use std::io;

use thiserror::Error;

/// Errors returned by the patty client.
#[derive(Error, Debug)]
pub enum Error {
    /// The daemon could not be reached, or the remote station refused or
    /// never answered a connection.
    #[error("connect to {target} failed: {source}")]
    ConnectFailure {
        /// Socket path of the daemon, or the callsign being dialed.
        target: String,
        /// Underlying cause.
        #[source]
        source: io::Error,
    },

    /// Malformed callsign/SSID text.
    #[error("invalid AX.25 address '{input}': {reason}")]
    InvalidAddress {
        /// Text that failed to parse.
        input: String,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// A network other than `ax25` was requested.
    #[error("unsupported network '{0}' (only 'ax25' is available)")]
    UnsupportedNetwork(String),

    /// The client, listener or connection has already been closed.
    #[error("{0} is already closed")]
    UseAfterClose(&'static str),

    /// The operation is not supported by this client.
    #[error("{0} is not implemented")]
    NotImplemented(&'static str),

    /// Accepting a connection failed on the daemon or while waiting for it.
    #[error("accept failed: {0}")]
    AcceptFailure(#[source] io::Error),

    /// The daemon rejected a request.
    #[error("daemon rejected {op}: {}", errno_text(.errno))]
    DaemonError {
        /// Request verb that failed.
        op: &'static str,
        /// Native errno reported by the daemon.
        errno: i32,
    },

    /// A binary address record cannot be rendered as text.
    #[error("cannot format AX.25 address {record:02x?}: {reason}")]
    FormatFailure {
        /// Raw record as received.
        record: Vec<u8>,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// The daemon sent a frame this client does not understand.
    #[error("control protocol error: {0}")]
    Protocol(String),

    /// I/O failure talking to the daemon.
    #[error("daemon I/O error: {0}")]
    Io(#[from] io::Error),

    /// The configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Returns the daemon errno carried by this error, if any.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::DaemonError { errno, .. } => Some(*errno),
            Self::ConnectFailure { source, .. } | Self::AcceptFailure(source) => {
                source.raw_os_error()
            }
            _ => None,
        }
    }

    /// Returns `true` if this error came from using a closed handle.
    pub fn is_use_after_close(&self) -> bool {
        matches!(self, Self::UseAfterClose(_))
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match &err {
            Error::Io(e) => e.kind(),
            Error::UseAfterClose(_) => io::ErrorKind::NotConnected,
            Error::NotImplemented(_) => io::ErrorKind::Unsupported,
            Error::InvalidAddress { .. } | Error::UnsupportedNetwork(_) => {
                io::ErrorKind::InvalidInput
            }
            Error::ConnectFailure { source, .. } => source.kind(),
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

fn errno_text(errno: &i32) -> io::Error {
    io::Error::from_raw_os_error(*errno)
}

/// Result type alias for patty operations.
pub type Result<T> = std::result::Result<T, Error>;
