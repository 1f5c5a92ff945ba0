//! `ax25 parse`: validate an address and show its encoding.
//!
//! ```bash
//! $ ax25 parse n0call-6
//! N0CALL-6
//! 9c 60 86 82 98 98 0c
//! ```

use std::io::Write;

use anyhow::{Context, Result};

use crate::addr::Addr;

/// Parses `address` and writes its canonical form and binary record.
///
/// # Errors
///
/// Returns an error if the address is malformed or `out` cannot be
/// written.
pub fn run(address: &str, mut out: impl Write) -> Result<()> {
    let addr = Addr::parse(address)?;
    let text = addr.format()?;
    let hex: Vec<String> = addr.to_bytes().iter().map(|b| format!("{b:02x}")).collect();

    writeln!(out, "{text}").context("write canonical address")?;
    writeln!(out, "{}", hex.join(" ")).context("write address record")?;
    Ok(())
}
