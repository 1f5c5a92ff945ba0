//! `ax25 dial` and `ax25 listen`: pipe bytes between stdio and a station.
//!
//! ```bash
//! # Talk to a BBS
//! ax25 dial K3XEC-10
//!
//! # Print whatever the next caller sends, then exit
//! ax25 listen N0CALL-1 --once
//! ```

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};

use crate::client::Client;
use crate::constants::{NETWORK, PUMP_BUFFER_SIZE};

/// Copy `from` into `to` until end of stream, flushing after every chunk.
///
/// Returns the number of bytes copied.
pub fn pump(mut from: impl Read, mut to: impl Write) -> io::Result<u64> {
    let mut buf = [0u8; PUMP_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = match from.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        to.write_all(&buf[..n])?;
        to.flush()?;
        total += n as u64;
    }
}

/// Dial `address`, send `input` to it and copy what it sends to `output`.
///
/// Returns when the remote station closes the connection. The input pump
/// runs on a detached thread, since a terminal's stdin may never reach end
/// of file.
///
/// # Errors
///
/// Returns an error if the dial fails or the connection breaks.
pub fn dial<R, W>(client: &Client, address: &str, input: R, output: W) -> Result<()>
where
    R: Read + Send + 'static,
    W: Write,
{
    let conn = client
        .dial(NETWORK, address)
        .with_context(|| format!("dial {address}"))?;
    let conn = Arc::new(conn);
    log::info!("connected to {}", conn.remote_addr());

    let sender = Arc::clone(&conn);
    thread::Builder::new()
        .name("ax25-input".into())
        .spawn(move || match pump(input, &*sender) {
            Ok(n) => log::debug!("input finished after {n} bytes"),
            Err(e) => log::debug!("input pump stopped: {e}"),
        })
        .context("spawn input thread")?;

    let received = pump(&*conn, output).context("read from connection")?;
    log::info!("{} closed the connection after {received} bytes", conn.remote_addr());
    conn.close().context("close connection")?;
    Ok(())
}

/// Listen on `address` and copy each caller's bytes to `output`.
///
/// Connections are served one at a time. With `once`, returns after the
/// first caller hangs up.
///
/// # Errors
///
/// Returns an error if binding fails, an accept fails, or output cannot be
/// written.
pub fn listen<W: Write>(client: &Client, address: &str, once: bool, mut output: W) -> Result<()> {
    let listener = client
        .listen(NETWORK, address)
        .with_context(|| format!("listen on {address}"))?;
    log::info!("listening on {}", listener.addr());

    for conn in listener.incoming() {
        let conn = conn.context("accept")?;
        let peer = conn.remote_addr();
        log::info!("connection from {peer}");

        let received = pump(&conn, &mut output).context("read from connection")?;
        log::info!("{peer} hung up after {received} bytes");
        conn.close().context("close connection")?;

        if once {
            break;
        }
    }

    listener.close().context("close listener")?;
    Ok(())
}
