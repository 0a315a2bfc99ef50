use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Instant;

/// Type of transport protocol a candidate or port speaks
#[derive(
    Default, Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum TransportProtocol {
    /// UDP
    #[default]
    #[serde(rename = "udp")]
    UDP,
    /// TCP
    #[serde(rename = "tcp")]
    TCP,
    /// TLS over TCP
    #[serde(rename = "ssltcp")]
    SSLTCP,
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::UDP => "udp",
            Self::TCP => "tcp",
            Self::SSLTCP => "ssltcp",
        };
        write!(f, "{s}")
    }
}

/// Transport Context with local address, peer address and protocol
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportContext {
    /// Local socket address, either IPv4 or IPv6
    pub local_addr: SocketAddr,
    /// Peer socket address, either IPv4 or IPv6
    pub peer_addr: SocketAddr,
    /// Type of transport protocol
    pub transport_protocol: TransportProtocol,
}

impl Default for TransportContext {
    fn default() -> Self {
        Self {
            local_addr: SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0),
            peer_addr: SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0),
            transport_protocol: TransportProtocol::UDP,
        }
    }
}

/// A generic transmit with [TransportContext]
#[derive(Debug, Clone)]
pub struct TransportMessage<T> {
    /// Received/Sent time
    pub now: Instant,
    /// A transport context with [local_addr](TransportContext::local_addr) and [peer_addr](TransportContext::peer_addr)
    pub transport: TransportContext,
    /// Message body with generic type
    pub message: T,
}

/// BytesMut type transmit with [TransportContext]
pub type TaggedBytesMut = TransportMessage<BytesMut>;
