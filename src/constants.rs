//! Library-wide constants for the patty client.
//!
//! Groups the fixed sizes of the AX.25 address record, the limits of the
//! control channel protocol, and the names of environment variables.
//!
//! # Categories
//!
//! - **Addressing**: AX.25 callsign and SSID limits
//! - **Control channel**: socket paths and frame limits
//! - **Environment**: variable names read by [`crate::config`] and the CLI

// ============================================================================
// Addressing
// ============================================================================

/// Network name reported by every [`crate::Addr`] and accepted by
/// `dial`/`listen`.
pub const NETWORK: &str = "ax25";

/// Number of callsign bytes in an AX.25 address record.
///
/// Shorter callsigns are padded with encoded spaces.
pub const CALLSIGN_LEN: usize = 6;

/// Size of the binary address record: callsign bytes plus one SSID byte.
pub const ADDR_LEN: usize = CALLSIGN_LEN + 1;

/// Highest SSID an AX.25 address can carry (four bits on the air).
pub const MAX_SSID: u8 = 15;

/// Maximum number of decimal digits accepted for an SSID.
pub const MAX_SSID_DIGITS: usize = 2;

/// Separator between callsign and SSID in the text form.
pub const SSID_SEPARATOR: char = '-';

// ============================================================================
// Control channel
// ============================================================================

/// Default location of the pattyd control socket.
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/patty/patty.sock";

/// Size of `sockaddr_un.sun_path`, including the terminating NUL.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub const MAX_SOCK_PATH: usize = 108;

/// Size of `sockaddr_un.sun_path`, including the terminating NUL.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub const MAX_SOCK_PATH: usize = 104;

/// Maximum control frame payload size (16 MB).
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Read buffer used when collecting one control channel response.
pub const CONTROL_READ_CHUNK: usize = 4096;

/// Buffer size for the CLI's stdin/stdout pumps.
pub const PUMP_BUFFER_SIZE: usize = 4096;

// ============================================================================
// Environment
// ============================================================================

/// Overrides the configured daemon socket path.
pub const SOCKET_PATH_ENV: &str = "PATTY_SOCKET";

/// Points at an explicit JSON configuration file.
pub const CONFIG_PATH_ENV: &str = "PATTY_CONFIG";

/// Log filter for the `ax25` binary (env_logger syntax).
pub const LOG_ENV: &str = "PATTY_LOG";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addr_record_layout() {
        assert_eq!(ADDR_LEN, 7);
        assert_eq!(CALLSIGN_LEN + 1, ADDR_LEN);
    }

    #[test]
    fn test_ssid_fits_four_bits() {
        assert_eq!(MAX_SSID, 0x0f);
        // Two decimal digits are enough for the largest SSID
        assert_eq!(MAX_SSID.to_string().len(), MAX_SSID_DIGITS);
    }

    #[test]
    fn test_default_socket_path_fits_kernel_limit() {
        assert!(DEFAULT_SOCKET_PATH.len() < MAX_SOCK_PATH);
    }

    #[test]
    fn test_sock_path_limit_matches_sockaddr_un() {
        // SAFETY: sockaddr_un is a plain C struct; all-zero is valid.
        let addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
        assert_eq!(addr.sun_path.len(), MAX_SOCK_PATH);
    }
}
