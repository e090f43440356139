//! Portable address and socket property model.

use std::fmt::{self, Display};
use std::net::{IpAddr, SocketAddr, SocketAddrV4, SocketAddrV6};

/// Address family of a [`SocketAddress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Unspecified,
    Inet,
    Inet6,
    /// Name/port pair resolved by the proxy at open time.
    Proxy,
}

/// Socket address, either concrete or a proxy name to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketAddress {
    Inet(SocketAddrV4),
    Inet6(SocketAddrV6),
    Proxy { host: String, port: u16 },
}

impl SocketAddress {
    pub fn family(&self) -> AddressFamily {
        match self {
            Self::Inet(_) => AddressFamily::Inet,
            Self::Inet6(_) => AddressFamily::Inet6,
            Self::Proxy { .. } => AddressFamily::Proxy,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Self::Inet(addr) => addr.port(),
            Self::Inet6(addr) => addr.port(),
            Self::Proxy { port, .. } => *port,
        }
    }

    /// Concrete OS address, or [`None`] for the proxy variant.
    pub fn to_inet(&self) -> Option<SocketAddr> {
        match self {
            Self::Inet(addr) => Some(SocketAddr::V4(*addr)),
            Self::Inet6(addr) => Some(SocketAddr::V6(*addr)),
            Self::Proxy { .. } => None,
        }
    }
}

impl From<SocketAddr> for SocketAddress {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => Self::Inet(v4),
            SocketAddr::V6(v6) => Self::Inet6(v6),
        }
    }
}

impl Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inet(addr) => write!(f, "{}", addr),
            Self::Inet6(addr) => write!(f, "{}", addr),
            Self::Proxy { host, port } => write!(f, "{}:{}", host, port),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketType {
    Stream,
    Dgram,
    Raw,
    SeqPacket,
    Rdm,
}

impl SocketType {
    /// Whether this type carries a connection (as opposed to datagrams).
    pub fn connection_oriented(&self) -> bool {
        matches!(self, Self::Stream | Self::SeqPacket | Self::Rdm)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolType {
    Unspecified,
    Tcp,
    Udp,
    Icmp,
    Icmpv6,
}

/// Socket flag set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SocketFlags(u32);

impl SocketFlags {
    /// Listener socket; open binds instead of connecting.
    pub const PASSIVE: SocketFlags = SocketFlags(0x1);

    pub const fn empty() -> Self {
        SocketFlags(0)
    }

    pub fn contains(&self, other: SocketFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: SocketFlags) {
        self.0 |= other.0;
    }

    pub fn passive(&self) -> bool {
        self.contains(Self::PASSIVE)
    }
}

/// Portable message flags carried on send and receive operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageFlags(u32);

impl MessageFlags {
    pub const OOB: MessageFlags = MessageFlags(0x1);
    pub const PEEK: MessageFlags = MessageFlags(0x2);
    pub const DONTROUTE: MessageFlags = MessageFlags(0x4);
    pub const TRUNC: MessageFlags = MessageFlags(0x8);

    pub const fn empty() -> Self {
        MessageFlags(0)
    }

    pub fn contains(&self, other: MessageFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: MessageFlags) {
        self.0 |= other.0;
    }
}

/// Everything needed to create and open a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketProperties {
    pub family: AddressFamily,
    pub sock_type: SocketType,
    pub proto_type: ProtocolType,
    pub address: SocketAddress,
    pub flags: SocketFlags,
}

/// Portable socket option identifiers.
///
/// Translation to OS level/name pairs happens in the sys layer; a handful
/// of options change engine behavior and are handled by the socket itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketOption {
    Nonblocking,
    Available,
    Shutdown,
    Linger,
    Acceptconn,
    Error,
    ReuseAddr,
    KeepAlive,
    Broadcast,
    OobInline,
    SndBuf,
    RcvBuf,
    Ttl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOp {
    Read,
    Write,
    Both,
}

impl ShutdownOp {
    /// Decode the value passed through the option surface.
    pub fn from_value(value: u64) -> Option<Self> {
        match value {
            0 => Some(Self::Read),
            1 => Some(Self::Write),
            2 => Some(Self::Both),
            _ => None,
        }
    }
}

/// Multicast group membership request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastOption {
    pub address: IpAddr,
    pub interface_index: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_address_round_trip() {
        let os: SocketAddr = "127.0.0.1:8883".parse().unwrap();
        let addr = SocketAddress::from(os);

        assert_eq!(addr.family(), AddressFamily::Inet);
        assert_eq!(addr.port(), 8883);
        assert_eq!(addr.to_inet(), Some(os));
    }

    #[test]
    fn test_proxy_address_has_no_inet_form() {
        let addr = SocketAddress::Proxy {
            host: "gateway.local".to_owned(),
            port: 10101,
        };

        assert_eq!(addr.family(), AddressFamily::Proxy);
        assert_eq!(addr.to_inet(), None);
        assert_eq!(addr.to_string(), "gateway.local:10101");
    }

    #[test]
    fn test_flags() {
        let mut flags = SocketFlags::empty();
        assert!(!flags.passive());

        flags.insert(SocketFlags::PASSIVE);
        assert!(flags.passive());

        let _ = SocketAddress::Inet(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0));
    }
}
