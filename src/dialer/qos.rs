//! Platform-specific DSCP marking.
//!
//! DSCP occupies the upper 6 bits of the IP TOS / traffic-class byte, so the
//! wire value is `dscp << 2`. Marking must land on the socket after creation
//! and before the connect handshake; packets sent earlier (including the SYN)
//! would otherwise go out unmarked.

use std::io;
use std::net::IpAddr;

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

use tracing::debug;

/// Convert a DSCP class to the TOS byte value.
pub fn dscp_to_tos(dscp: u8) -> u8 {
    dscp << 2
}

/// Convert a TOS byte value back to its DSCP class.
pub fn tos_to_dscp(tos: u8) -> u8 {
    tos >> 2
}

/// Apply a DSCP marking to a raw socket.
///
/// Returns `Ok(true)` if the marking was applied, `Ok(false)` if the platform
/// does not support per-socket marking (the caller proceeds unmarked), and
/// `Err` only for a genuine setsockopt failure on a supported platform.
#[cfg(unix)]
pub fn apply_qos_marking<S: AsRawFd>(socket: &S, dscp: u8, ipv6: bool) -> io::Result<bool> {
    let tos = i32::from(dscp_to_tos(dscp));
    let fd = socket.as_raw_fd();

    let ret = unsafe {
        if ipv6 {
            libc::setsockopt(
                fd,
                libc::IPPROTO_IPV6,
                libc::IPV6_TCLASS,
                std::ptr::addr_of!(tos).cast::<libc::c_void>(),
                std::mem::size_of::<i32>() as libc::socklen_t,
            )
        } else {
            libc::setsockopt(
                fd,
                libc::IPPROTO_IP,
                libc::IP_TOS,
                std::ptr::addr_of!(tos).cast::<libc::c_void>(),
                std::mem::size_of::<i32>() as libc::socklen_t,
            )
        }
    };

    if ret != 0 {
        return Err(io::Error::last_os_error());
    }

    debug!(dscp, tos, ipv6, "DSCP marking applied");
    Ok(true)
}

/// Per-socket DSCP marking is unsupported here (Windows needs the QoS API
/// and elevated privileges); connectivity takes priority over marking.
#[cfg(not(unix))]
pub fn apply_qos_marking<S>(_socket: &S, _dscp: u8, _ipv6: bool) -> io::Result<bool> {
    Ok(false)
}

/// Check whether a source address is currently assignable on this host by
/// attempting an ephemeral local bind. Cheap, uncached, and authoritative at
/// the moment it runs; interfaces can come and go between calls.
pub fn probe_source_bind(ip: IpAddr) -> io::Result<()> {
    std::net::UdpSocket::bind((ip, 0)).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dscp_tos_round_trip() {
        assert_eq!(dscp_to_tos(46), 184);
        assert_eq!(tos_to_dscp(184), 46);
        for dscp in 0..=63u8 {
            assert_eq!(tos_to_dscp(dscp_to_tos(dscp)), dscp);
        }
    }

    #[test]
    fn test_probe_source_bind_loopback() {
        assert!(probe_source_bind("127.0.0.1".parse().unwrap()).is_ok());
    }

    #[test]
    fn test_probe_source_bind_unassignable() {
        // TEST-NET-1 is never assigned to a local interface.
        assert!(probe_source_bind("192.0.2.1".parse().unwrap()).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_apply_marking_on_udp_socket() {
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let supported = apply_qos_marking(&socket, 46, false).unwrap();
        assert!(supported);
    }
}
