//! AX.25 station addresses.
//!
//! An [`Addr`] is a callsign plus SSID, stored exactly as it travels on the
//! air and on the daemon's control channel:
//!
//! ```text
//! [callsign: 6 bytes, ASCII << 1, space padded] [ssid: 1 byte, ssid << 1]
//! ```
//!
//! The text form is `CALLSIGN` or `CALLSIGN-SSID` (for instance `N0CALL-6`).
//! An SSID of zero is rendered without the suffix, so `N0CALL-0` and
//! `N0CALL` parse to the same address and both print as `N0CALL`.

use std::fmt;
use std::str::FromStr;

use crate::constants::{
    ADDR_LEN, CALLSIGN_LEN, MAX_SSID, MAX_SSID_DIGITS, NETWORK, SSID_SEPARATOR,
};
use crate::error::{Error, Result};

/// Encoded padding byte (ASCII space shifted left by one).
const PAD: u8 = b' ' << 1;

/// An AX.25 callsign and SSID.
///
/// Built by [`Addr::parse`] or decoded from a daemon-supplied record with
/// [`Addr::from_bytes`]. Both paths validate, so every `Addr` can be
/// rendered as text.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Addr {
    callsign: [u8; CALLSIGN_LEN],
    ssid: u8,
}

impl Addr {
    /// Parses `CALLSIGN` or `CALLSIGN-SSID`.
    ///
    /// Lowercase letters are accepted and stored uppercase.
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = |reason| Error::InvalidAddress {
            input: text.to_string(),
            reason,
        };

        if text.is_empty() {
            return Err(invalid("empty address"));
        }

        let (call, ssid_text) = match text.split_once(SSID_SEPARATOR) {
            Some((call, ssid)) => (call, Some(ssid)),
            None => (text, None),
        };

        if call.is_empty() {
            return Err(invalid("missing callsign"));
        }
        if call.len() > CALLSIGN_LEN {
            return Err(invalid("callsign longer than 6 characters"));
        }
        if !call.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(invalid("callsign may only contain letters and digits"));
        }

        let ssid = match ssid_text {
            None => 0,
            Some("") => return Err(invalid("missing SSID after separator")),
            Some(s) if s.len() > MAX_SSID_DIGITS || !s.bytes().all(|b| b.is_ascii_digit()) => {
                return Err(invalid("SSID must be a number from 0 to 15"));
            }
            Some(s) => match s.parse::<u8>() {
                Ok(n) if n <= MAX_SSID => n,
                _ => return Err(invalid("SSID must be a number from 0 to 15")),
            },
        };

        let mut callsign = [PAD; CALLSIGN_LEN];
        for (slot, b) in callsign.iter_mut().zip(call.bytes()) {
            *slot = b.to_ascii_uppercase() << 1;
        }

        Ok(Self {
            callsign,
            ssid: ssid << 1,
        })
    }

    /// Decodes a binary address record received from the daemon.
    ///
    /// Fails with [`Error::FormatFailure`] if the record does not hold a
    /// printable callsign: empty, non-alphanumeric characters, padding in
    /// the middle, or a set extension bit.
    ///
    /// Only the four SSID bits of the last byte are kept. The reserved,
    /// command/response and end-of-address bits are dropped, so two records
    /// naming the same station compare equal.
    pub fn from_bytes(record: [u8; ADDR_LEN]) -> Result<Self> {
        let fail = |reason| Error::FormatFailure {
            record: record.to_vec(),
            reason,
        };

        let mut callsign = [0u8; CALLSIGN_LEN];
        callsign.copy_from_slice(&record[..CALLSIGN_LEN]);

        let mut seen_pad = false;
        for (i, &b) in callsign.iter().enumerate() {
            if b & 1 != 0 {
                return Err(fail("extension bit set inside callsign"));
            }
            let c = b >> 1;
            if c == b' ' {
                if i == 0 {
                    return Err(fail("empty callsign"));
                }
                seen_pad = true;
            } else if seen_pad {
                return Err(fail("padding inside callsign"));
            } else if !(c.is_ascii_uppercase() || c.is_ascii_digit()) {
                return Err(fail("callsign character is not a letter or digit"));
            }
        }

        Ok(Self {
            callsign,
            ssid: ((record[CALLSIGN_LEN] >> 1) & MAX_SSID) << 1,
        })
    }

    /// Returns the binary address record.
    pub fn to_bytes(&self) -> [u8; ADDR_LEN] {
        let mut record = [0u8; ADDR_LEN];
        record[..CALLSIGN_LEN].copy_from_slice(&self.callsign);
        record[CALLSIGN_LEN] = self.ssid;
        record
    }

    /// Renders the canonical text form.
    ///
    /// Never fails for an `Addr` built by this module; decode problems are
    /// reported earlier by [`Addr::from_bytes`].
    pub fn format(&self) -> Result<String> {
        Ok(self.to_string())
    }

    /// Network name of this address. Always `"ax25"`.
    pub fn network(&self) -> &'static str {
        NETWORK
    }

    /// Callsign without SSID, e.g. `N0CALL`.
    pub fn callsign(&self) -> String {
        self.callsign
            .iter()
            .map(|&b| char::from(b >> 1))
            .take_while(|&c| c != ' ')
            .collect()
    }

    /// Raw callsign bytes in on-air encoding.
    pub fn callsign_bytes(&self) -> &[u8; CALLSIGN_LEN] {
        &self.callsign
    }

    /// Decoded SSID (0–15).
    pub fn ssid(&self) -> u8 {
        (self.ssid >> 1) & MAX_SSID
    }

    /// SSID byte as written by [`to_bytes`](Self::to_bytes): `ssid << 1`
    /// with all control bits clear.
    pub fn ssid_byte(&self) -> u8 {
        self.ssid
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.callsign())?;
        match self.ssid() {
            0 => Ok(()),
            n => write!(f, "{SSID_SEPARATOR}{n}"),
        }
    }
}

impl fmt::Debug for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Addr({self})")
    }
}

impl FromStr for Addr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<[u8; ADDR_LEN]> for Addr {
    type Error = Error;

    fn try_from(record: [u8; ADDR_LEN]) -> Result<Self> {
        Self::from_bytes(record)
    }
}

impl From<Addr> for [u8; ADDR_LEN] {
    fn from(addr: Addr) -> Self {
        addr.to_bytes()
    }
}
