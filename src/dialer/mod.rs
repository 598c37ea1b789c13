//! Source-bound, DSCP-marked connection establishment.
//!
//! A [`BoundDialer`] is constructed from one [`PathSpec`] and forces every
//! connection it opens to egress through that path: the local endpoint is
//! bound to the path's source address and the DSCP marking is applied to the
//! socket between creation and the connect handshake.

mod qos;

pub use qos::{apply_qos_marking, dscp_to_tos, probe_source_bind, tos_to_dscp};

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use socket2::SockRef;
use tokio::net::{TcpSocket, TcpStream, UdpSocket};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::{PathSpec, MAX_DSCP};

/// Dialer tuning knobs, shared by all paths in a sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialerConfig {
    /// Connect handshake timeout.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Disable Nagle on measurement connections.
    #[serde(default = "default_nodelay")]
    pub tcp_nodelay: bool,

    /// Socket send buffer size; `None` keeps the OS default. Throughput
    /// probes on long fat paths want this raised above the default.
    #[serde(default)]
    pub send_buffer_size: Option<usize>,

    /// Socket receive buffer size; `None` keeps the OS default.
    #[serde(default)]
    pub recv_buffer_size: Option<usize>,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_nodelay() -> bool {
    true
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            tcp_nodelay: default_nodelay(),
            send_buffer_size: None,
            recv_buffer_size: None,
        }
    }
}

/// Connection factory bound to one egress path.
pub struct BoundDialer {
    path: String,
    source_ip: Option<IpAddr>,
    dscp: u8,
    config: DialerConfig,
    /// TOS byte actually applied on the most recent dial; 0 when unmarked.
    applied_tos: AtomicU8,
}

impl BoundDialer {
    /// Build a dialer for a path.
    ///
    /// Fails with [`Error::InvalidQosClass`] or [`Error::InvalidSourceAddress`]
    /// on malformed path fields. An unassignable (but well-formed) source
    /// address is only a warning here; interfaces change, and the bind on the
    /// actual dial is the authoritative check.
    pub fn new(spec: &PathSpec, config: DialerConfig) -> Result<Self> {
        if spec.dscp > MAX_DSCP {
            return Err(Error::InvalidQosClass(spec.dscp));
        }
        let source_ip = spec.source_ip()?;

        if let Some(ip) = source_ip {
            if let Err(e) = probe_source_bind(ip) {
                warn!(
                    path = %spec.name,
                    source = %ip,
                    error = %e,
                    "source address not currently assignable; dials will fail until it is"
                );
            }
        }

        Ok(Self {
            path: spec.name.clone(),
            source_ip,
            dscp: spec.dscp,
            config,
            applied_tos: AtomicU8::new(0),
        })
    }

    /// Path name this dialer serves.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Source address this dialer binds, if any.
    pub fn source_ip(&self) -> Option<IpAddr> {
        self.source_ip
    }

    /// DSCP class this dialer applies.
    pub fn dscp(&self) -> u8 {
        self.dscp
    }

    /// TOS byte applied on the most recent dial, if a marking landed.
    pub fn applied_marking(&self) -> Option<u8> {
        match self.applied_tos.load(Ordering::Relaxed) {
            0 => None,
            tos => Some(tos),
        }
    }

    /// The local address to bind for a target of the given family.
    fn local_addr_for(&self, remote: SocketAddr) -> Result<SocketAddr> {
        match self.source_ip {
            Some(ip) => {
                if ip.is_ipv4() != remote.is_ipv4() {
                    return Err(Error::SourceBind {
                        addr: SocketAddr::new(ip, 0),
                        reason: format!("address family does not match target {remote}"),
                    });
                }
                Ok(SocketAddr::new(ip, 0))
            }
            None => Ok(if remote.is_ipv4() {
                SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
            } else {
                SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0)
            }),
        }
    }

    /// Apply configured buffer sizes to a socket.
    fn configure_buffers<'s, S>(&self, socket: &'s S, remote: SocketAddr) -> Result<()>
    where
        SockRef<'s>: From<&'s S>,
    {
        let sock = SockRef::from(socket);
        if let Some(size) = self.config.send_buffer_size {
            sock.set_send_buffer_size(size).map_err(|e| Error::Dial {
                addr: remote,
                reason: format!("set send buffer: {e}"),
            })?;
        }
        if let Some(size) = self.config.recv_buffer_size {
            sock.set_recv_buffer_size(size).map_err(|e| Error::Dial {
                addr: remote,
                reason: format!("set recv buffer: {e}"),
            })?;
        }
        Ok(())
    }

    /// Apply the DSCP marking to a not-yet-connected socket.
    ///
    /// An unsupported platform downgrades to a warning and the dial proceeds
    /// unmarked; a setsockopt failure on a supported platform fails the dial.
    fn mark_socket<S>(&self, socket: &S, remote: SocketAddr) -> Result<()>
    where
        S: MaybeRawSocket,
    {
        if self.dscp == 0 {
            return Ok(());
        }

        match socket.try_apply_marking(self.dscp, remote.is_ipv6()) {
            Ok(true) => {
                self.applied_tos
                    .store(dscp_to_tos(self.dscp), Ordering::Relaxed);
                Ok(())
            }
            Ok(false) => {
                warn!(
                    path = %self.path,
                    dscp = self.dscp,
                    "DSCP marking unsupported on this platform, proceeding unmarked"
                );
                Ok(())
            }
            Err(e) => Err(Error::Dial {
                addr: remote,
                reason: format!("set DSCP {}: {e}", self.dscp),
            }),
        }
    }

    /// Open a TCP connection to `remote` through this path.
    pub async fn dial_tcp(&self, remote: SocketAddr) -> Result<TcpStream> {
        let socket = if remote.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(|e| Error::Dial {
            addr: remote,
            reason: format!("socket creation: {e}"),
        })?;

        self.configure_buffers(&socket, remote)?;

        let local = self.local_addr_for(remote)?;
        if self.source_ip.is_some() {
            socket.bind(local).map_err(|e| Error::SourceBind {
                addr: local,
                reason: e.to_string(),
            })?;
        }

        // Marking must precede connect so the handshake itself is marked.
        self.mark_socket(&socket, remote)?;

        let stream = tokio::time::timeout(self.config.connect_timeout, socket.connect(remote))
            .await
            .map_err(|_| Error::Dial {
                addr: remote,
                reason: format!("connect timeout after {:?}", self.config.connect_timeout),
            })?
            .map_err(|e| Error::Dial {
                addr: remote,
                reason: e.to_string(),
            })?;

        if self.config.tcp_nodelay {
            stream.set_nodelay(true).map_err(|e| Error::Dial {
                addr: remote,
                reason: format!("set nodelay: {e}"),
            })?;
        }

        debug!(path = %self.path, %remote, local = %local, dscp = self.dscp, "TCP dial complete");
        Ok(stream)
    }

    /// Open a connected UDP socket to `remote` through this path.
    pub async fn dial_udp(&self, remote: SocketAddr) -> Result<UdpSocket> {
        let local = self.local_addr_for(remote)?;

        let socket = UdpSocket::bind(local).await.map_err(|e| {
            if self.source_ip.is_some() {
                Error::SourceBind {
                    addr: local,
                    reason: e.to_string(),
                }
            } else {
                Error::Dial {
                    addr: remote,
                    reason: format!("local bind: {e}"),
                }
            }
        })?;

        self.configure_buffers(&socket, remote)?;
        self.mark_socket(&socket, remote)?;

        socket.connect(remote).await.map_err(|e| Error::Dial {
            addr: remote,
            reason: e.to_string(),
        })?;

        debug!(path = %self.path, %remote, local = %local, dscp = self.dscp, "UDP dial complete");
        Ok(socket)
    }
}

/// Marking hook over socket types that may or may not expose a raw handle.
trait MaybeRawSocket {
    fn try_apply_marking(&self, dscp: u8, ipv6: bool) -> std::io::Result<bool>;
}

impl MaybeRawSocket for TcpSocket {
    fn try_apply_marking(&self, dscp: u8, ipv6: bool) -> std::io::Result<bool> {
        apply_qos_marking(self, dscp, ipv6)
    }
}

impl MaybeRawSocket for UdpSocket {
    fn try_apply_marking(&self, dscp: u8, ipv6: bool) -> std::io::Result<bool> {
        apply_qos_marking(self, dscp, ipv6)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_new_rejects_invalid_qos_class() {
        let spec = PathSpec::new("wan1").with_dscp(64);
        assert!(matches!(
            BoundDialer::new(&spec, DialerConfig::default()),
            Err(Error::InvalidQosClass(64))
        ));
    }

    #[test]
    fn test_new_rejects_invalid_source_address() {
        let spec = PathSpec::new("wan1").with_source("not-an-ip");
        assert!(matches!(
            BoundDialer::new(&spec, DialerConfig::default()),
            Err(Error::InvalidSourceAddress(_))
        ));
    }

    #[test]
    fn test_new_allows_unassignable_source() {
        // Well-formed but not present locally: construction warns, succeeds.
        let spec = PathSpec::new("wan1").with_source("192.0.2.1");
        assert!(BoundDialer::new(&spec, DialerConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_dial_tcp_with_source_bind() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let remote = listener.local_addr().unwrap();

        let spec = PathSpec::new("lo").with_source("127.0.0.1");
        let dialer = BoundDialer::new(&spec, DialerConfig::default()).unwrap();

        let stream = dialer.dial_tcp(remote).await.unwrap();
        assert_eq!(stream.local_addr().unwrap().ip(), remote.ip());
    }

    #[tokio::test]
    async fn test_dial_tcp_unassignable_source_is_hard_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let remote = listener.local_addr().unwrap();

        let spec = PathSpec::new("dead").with_source("192.0.2.1");
        let dialer = BoundDialer::new(&spec, DialerConfig::default()).unwrap();

        assert!(matches!(
            dialer.dial_tcp(remote).await,
            Err(Error::SourceBind { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dial_records_applied_marking() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let remote = listener.local_addr().unwrap();

        let spec = PathSpec::new("ef").with_dscp(46);
        let dialer = BoundDialer::new(&spec, DialerConfig::default()).unwrap();
        let _stream = dialer.dial_tcp(remote).await.unwrap();

        let tos = dialer.applied_marking().expect("marking recorded");
        assert_eq!(tos_to_dscp(tos), 46);
    }

    #[tokio::test]
    async fn test_dial_without_marking_records_none() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let remote = listener.local_addr().unwrap();

        let spec = PathSpec::new("be");
        let dialer = BoundDialer::new(&spec, DialerConfig::default()).unwrap();
        let _stream = dialer.dial_tcp(remote).await.unwrap();

        assert_eq!(dialer.applied_marking(), None);
    }

    #[tokio::test]
    async fn test_dial_family_mismatch() {
        let spec = PathSpec::new("v4-source").with_source("127.0.0.1");
        let dialer = BoundDialer::new(&spec, DialerConfig::default()).unwrap();

        let remote: SocketAddr = "[::1]:9".parse().unwrap();
        assert!(matches!(
            dialer.dial_tcp(remote).await,
            Err(Error::SourceBind { .. })
        ));
    }
}
