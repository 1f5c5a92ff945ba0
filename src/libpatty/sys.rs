//! Raw declarations from `<patty/ax25.h>` and `<patty/client.h>`.
//!
//! Every client call returns `-1` and sets `errno` on failure.
//! `patty_client_socket` and `patty_client_accept` return a local file
//! descriptor that is also the socket's data stream.

#![allow(non_camel_case_types, reason = "names mirror the C headers")]

use libc::{c_char, c_int, size_t};

use crate::constants::CALLSIGN_LEN;

/// `PATTY_AX25_PROTO_NONE`: no layer 3 protocol (PID `0xF0`).
pub const PATTY_AX25_PROTO_NONE: c_int = 0xf0;

/// `PATTY_AX25_SOCK_STREAM`: connected-mode socket.
pub const PATTY_AX25_SOCK_STREAM: c_int = 1;

/// Opaque client handle.
#[repr(C)]
pub struct patty_client {
    _private: [u8; 0],
}

/// On-air address record: shifted callsign bytes, then the SSID byte.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct patty_ax25_addr {
    /// Callsign, ASCII << 1, space padded.
    pub callsign: [u8; CALLSIGN_LEN],
    /// `ssid << 1` plus control bits.
    pub ssid: u8,
}

#[link(name = "patty")]
extern "C" {
    pub fn patty_client_new(path: *const c_char) -> *mut patty_client;
    pub fn patty_client_destroy(client: *mut patty_client);
    pub fn patty_client_ping(client: *mut patty_client, pong: *mut c_int) -> c_int;
    pub fn patty_client_socket(client: *mut patty_client, proto: c_int, kind: c_int) -> c_int;
    pub fn patty_client_bind(
        client: *mut patty_client,
        socket: c_int,
        addr: *mut patty_ax25_addr,
    ) -> c_int;
    pub fn patty_client_listen(client: *mut patty_client, socket: c_int) -> c_int;
    pub fn patty_client_accept(
        client: *mut patty_client,
        socket: c_int,
        peer: *mut patty_ax25_addr,
    ) -> c_int;
    pub fn patty_client_connect(
        client: *mut patty_client,
        socket: c_int,
        peer: *mut patty_ax25_addr,
    ) -> c_int;
    pub fn patty_client_close(client: *mut patty_client, socket: c_int) -> c_int;

    pub fn patty_ax25_pton(callsign: *const c_char, addr: *mut patty_ax25_addr) -> c_int;
    pub fn patty_ax25_ntop(addr: *const patty_ax25_addr, dest: *mut c_char, len: size_t) -> c_int;
}
