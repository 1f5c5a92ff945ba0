//! patty - AX.25 sockets through the pattyd daemon.
//!
//! This crate exposes a running `pattyd` packet-radio daemon through
//! connection-oriented networking types: open a [`Client`], then
//! [`dial`](Client::dial) a station or [`listen`](Client::listen) for
//! callers. All AX.25 protocol work (framing, retransmission, link state)
//! happens in the daemon; this crate forwards socket requests to it and
//! hands back plain byte streams.
//!
//! Requests reach the daemon through a [`Backend`]. With the `libpatty`
//! feature, [`Client::open`] binds the C client library that ships with
//! pattyd (linked as `-lpatty`). Without it, `Client::open` speaks the
//! framed [`ControlChannel`] protocol, which `testing::MockDaemon`
//! implements for tests.
//!
//! ```no_run
//! use std::io::Write;
//!
//! let client = patty::Client::open("/var/run/patty/patty.sock")?;
//! let mut conn = client.dial("ax25", "K3XEC-10")?;
//! conn.write_all(b"hello\r")?;
//! conn.close()?;
//! # Ok::<(), patty::Error>(())
//! ```
//!
//! # Modules
//!
//! - [`addr`] - Callsign/SSID parsing and the 7-byte address record
//! - [`backend`] - The [`Backend`] trait and socket handle types
//! - `libpatty` - libpatty binding (feature `libpatty`)
//! - [`control`] - Framed control channel, wire protocol and fd passing
//! - [`client`], [`listener`], [`conn`] - Dial, listen/accept, streams
//! - [`config`] - Configuration loading
//! - [`commands`] - `ax25` CLI subcommands

// Library modules
pub mod addr;
pub mod backend;
pub mod client;
pub mod commands;
pub mod config;
pub mod conn;
pub mod constants;
pub mod control;
pub mod error;
pub mod listener;

#[cfg(feature = "libpatty")]
pub mod libpatty;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

#[cfg(test)]
mod e2e_test;

// Re-export commonly used types
pub use addr::Addr;
pub use client::Client;
pub use config::Config;
pub use conn::Conn;
pub use backend::{Accepted, Backend, Protocol, SocketDescriptor, SocketType};
pub use control::ControlChannel;
pub use error::{Error, Result};
#[cfg(feature = "libpatty")]
pub use libpatty::LibPatty;
pub use listener::{Incoming, Listener};
