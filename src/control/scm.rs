//! File descriptor passing over the control channel (`SCM_RIGHTS`).
//!
//! The daemon attaches the data stream of a connected or accepted socket as
//! ancillary data to the response frame. The kernel installs a fresh
//! descriptor in the receiving process; the daemon keeps its own copy.

use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::net::UnixStream;

/// Room for a handful of descriptors per `recvmsg`.
const MAX_FDS_PER_MSG: usize = 4;

#[cfg(any(target_os = "linux", target_os = "android"))]
const RECV_FLAGS: libc::c_int = libc::MSG_CMSG_CLOEXEC;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const RECV_FLAGS: libc::c_int = 0;

/// `CMSG_*` take and return `c_uint`; descriptor payloads are a few bytes.
fn fd_payload_len(count: usize) -> libc::c_uint {
    let len = std::mem::size_of::<libc::c_int>() * count;
    libc::c_uint::try_from(len).unwrap_or(libc::c_uint::MAX)
}

fn fd_cmsg_space(count: usize) -> usize {
    // SAFETY: CMSG_SPACE is a pure size computation.
    unsafe { libc::CMSG_SPACE(fd_payload_len(count)) as usize }
}

// msg_controllen and cmsg_len are size_t on glibc and bionic, socklen_t on
// musl and the BSDs.
#[cfg(any(all(target_os = "linux", target_env = "gnu"), target_os = "android"))]
mod cmsg_len {
    pub(super) fn to_field(len: usize) -> libc::size_t {
        len
    }

    pub(super) fn header(payload: libc::c_uint) -> libc::size_t {
        // SAFETY: CMSG_LEN is a pure size computation.
        unsafe { libc::CMSG_LEN(payload) as libc::size_t }
    }

    pub(super) fn from_field(len: libc::size_t) -> usize {
        len
    }
}

#[cfg(not(any(all(target_os = "linux", target_env = "gnu"), target_os = "android")))]
mod cmsg_len {
    pub(super) fn to_field(len: usize) -> libc::socklen_t {
        libc::socklen_t::try_from(len).unwrap_or(libc::socklen_t::MAX)
    }

    pub(super) fn header(payload: libc::c_uint) -> libc::socklen_t {
        // SAFETY: CMSG_LEN is a pure size computation.
        unsafe { libc::CMSG_LEN(payload) }
    }

    pub(super) fn from_field(len: libc::socklen_t) -> usize {
        len as usize
    }
}

/// Receive up to `max_bytes` from `stream`, capturing any descriptors
/// passed as `SCM_RIGHTS` ancillary data.
///
/// An empty byte vector with no descriptors means the peer closed the
/// connection. Received descriptors are owned by the caller and close on
/// drop.
pub fn recv_with_fds(stream: &UnixStream, max_bytes: usize) -> io::Result<(Vec<u8>, Vec<OwnedFd>)> {
    let mut data_buf = vec![0u8; max_bytes];
    let mut cmsg_buf = vec![0u8; fd_cmsg_space(MAX_FDS_PER_MSG)];

    let mut iov = libc::iovec {
        iov_base: data_buf.as_mut_ptr().cast::<libc::c_void>(),
        iov_len: data_buf.len(),
    };

    // SAFETY: msghdr is a plain C struct; all-zero is a valid empty header.
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr().cast::<libc::c_void>();
    msg.msg_controllen = cmsg_len::to_field(cmsg_buf.len());

    let n = loop {
        // SAFETY: msg points at iov and cmsg_buf, both alive and sized as
        // advertised for the duration of the call.
        let n = unsafe { libc::recvmsg(stream.as_raw_fd(), &mut msg, RECV_FLAGS) };
        if n >= 0 {
            break n;
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    };
    data_buf.truncate(n as usize);

    let mut fds = Vec::new();
    // SAFETY: the kernel filled msg_control with well-formed cmsghdrs of
    // total length msg_controllen; CMSG_* walk them within that bound.
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let data = libc::CMSG_DATA(cmsg);
                let header = cmsg_len::from_field(cmsg_len::header(0));
                let fd_count = cmsg_len::from_field((*cmsg).cmsg_len).saturating_sub(header)
                    / std::mem::size_of::<libc::c_int>();
                for i in 0..fd_count {
                    let fd: libc::c_int = std::ptr::read_unaligned(
                        data.add(i * std::mem::size_of::<libc::c_int>())
                            .cast::<libc::c_int>(),
                    );
                    fds.push(OwnedFd::from_raw_fd(fd));
                }
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    if msg.msg_flags & libc::MSG_CTRUNC != 0 {
        log::warn!("[patty] ancillary data truncated, {} descriptor(s) kept", fds.len());
    }

    Ok((data_buf, fds))
}

/// Send all of `data` with `fd` attached via `sendmsg` + `SCM_RIGHTS`.
///
/// The descriptor rides on the first chunk; any remainder is written
/// without ancillary data.
#[cfg(any(test, feature = "testing"))]
pub fn send_with_fd(stream: &UnixStream, data: &[u8], fd: &impl AsRawFd) -> io::Result<()> {
    use std::io::Write;

    let mut cmsg_buf = vec![0u8; fd_cmsg_space(1)];

    let mut iov = libc::iovec {
        iov_base: data.as_ptr().cast_mut().cast::<libc::c_void>(),
        iov_len: data.len(),
    };

    // SAFETY: msghdr is a plain C struct; all-zero is a valid empty header.
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr().cast::<libc::c_void>();
    msg.msg_controllen = cmsg_len::to_field(cmsg_buf.len());

    // SAFETY: cmsg_buf holds CMSG_SPACE(one fd) bytes, so the first header
    // and its data slot are in bounds.
    unsafe {
        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        (*cmsg).cmsg_level = libc::SOL_SOCKET;
        (*cmsg).cmsg_type = libc::SCM_RIGHTS;
        (*cmsg).cmsg_len = cmsg_len::header(fd_payload_len(1));
        let data_ptr = libc::CMSG_DATA(cmsg).cast::<libc::c_int>();
        std::ptr::write_unaligned(data_ptr, fd.as_raw_fd());
    }

    let sent = loop {
        // SAFETY: msg references iov and cmsg_buf, both alive for the call.
        let n = unsafe { libc::sendmsg(stream.as_raw_fd(), &msg, 0) };
        if n >= 0 {
            break n as usize;
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    };

    if sent < data.len() {
        let mut rest = stream;
        rest.write_all(&data[sent..])?;
    }
    Ok(())
}
