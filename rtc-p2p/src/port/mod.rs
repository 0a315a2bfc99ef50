use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use shared::error::Result;
use shared::{TaggedBytesMut, TransportProtocol};
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use crate::candidate::Candidate;
use crate::connection::Connection;

/// STUN error code sent when a check carries an unknown username.
pub const STUN_ERROR_STALE_CREDENTIALS: u16 = 430;
pub const STUN_ERROR_REASON_STALE_CREDENTIALS: &str = "Stale Credentials";
/// STUN error code sent when a connection cannot be created for a check.
pub const STUN_ERROR_SERVER_ERROR: u16 = 500;
pub const STUN_ERROR_REASON_SERVER_ERROR: &str = "Server Error";

/// Identifies a [`Port`] for the lifetime of the channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PortId(pub u64);

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port#{}", self.0)
    }
}

/// ICE role of this agent.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IceRole {
    #[serde(rename = "controlling")]
    Controlling,
    #[serde(rename = "controlled")]
    Controlled,
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

impl fmt::Display for IceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Controlling => "controlling",
            Self::Controlled => "controlled",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// ICE dialect spoken by a port.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IceProtocolType {
    /// Legacy Google ICE, no nomination.
    #[serde(rename = "google")]
    Google,
    #[default]
    #[serde(rename = "rfc5245")]
    Rfc5245,
}

impl fmt::Display for IceProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Google => "google",
            Self::Rfc5245 => "rfc5245",
        };
        write!(f, "{s}")
    }
}

/// How the remote candidate of a new connection became known.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CandidateOrigin {
    /// Learned from a check that arrived on the same port.
    ThisPort,
    /// Learned from a check that arrived on another port.
    OtherPort,
    /// Signaled by the remote peer.
    Message,
}

/// Socket options replayed onto every port.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SocketOption {
    DontFragment,
    ReceiveBuffer,
    SendBuffer,
    NoDelay,
    Ipv6Only,
    Dscp,
}

impl fmt::Display for SocketOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::DontFragment => "dont-fragment",
            Self::ReceiveBuffer => "rcvbuf",
            Self::SendBuffer => "sndbuf",
            Self::NoDelay => "nodelay",
            Self::Ipv6Only => "ipv6-only",
            Self::Dscp => "dscp",
        };
        write!(f, "{s}")
    }
}

/// Last value set for every [`SocketOption`].
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct SocketOptions {
    options: BTreeMap<SocketOption, i32>,
}

impl SocketOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, option: SocketOption, value: i32) {
        self.options.insert(option, value);
    }

    pub fn get(&self, option: SocketOption) -> Option<i32> {
        self.options.get(&option).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SocketOption, i32)> + '_ {
        self.options.iter().map(|(option, value)| (*option, *value))
    }
}

/// An incoming binding request kept opaque so the port can answer it later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingRequest {
    pub transaction_id: [u8; 12],
    pub raw: BytesMut,
}

/// Signals a [`Port`] raises towards its owner.
#[derive(Debug)]
pub enum PortEvent {
    /// Local candidates were gathered.
    AddressReady(Vec<Candidate>),
    /// A check arrived from an address no connection covers.
    UnknownAddress {
        address: SocketAddr,
        protocol: TransportProtocol,
        request: BindingRequest,
        remote_username: String,
        port_muxed: bool,
    },
    /// The port is gone; connections already built on it keep running.
    Destroyed,
    /// A check indicated both sides claim the same role.
    RoleConflict,
}

/// A local socket that manufactures [`Connection`]s to remote candidates.
pub trait Port {
    fn id(&self) -> PortId;
    fn local_addr(&self) -> SocketAddr;
    /// Name of the network interface this port is bound to.
    fn network(&self) -> &str;
    fn generation(&self) -> u32;
    /// Local candidates gathered so far.
    fn candidates(&self) -> &[Candidate];

    /// Starts gathering local candidates; results arrive as [`PortEvent::AddressReady`].
    fn prepare_address(&mut self, now: Instant);
    fn supports_protocol(&self, protocol: TransportProtocol) -> bool;
    fn create_connection(
        &mut self,
        remote: &Candidate,
        origin: CandidateOrigin,
    ) -> Option<Box<dyn Connection>>;

    fn set_option(&mut self, option: SocketOption, value: i32) -> Result<()>;
    fn ice_protocol(&self) -> IceProtocolType;
    fn set_ice_protocol(&mut self, protocol: IceProtocolType);
    fn set_role(&mut self, role: IceRole);
    fn set_tiebreaker(&mut self, tiebreaker: u64);

    fn send_binding_response(&mut self, request: &BindingRequest, addr: SocketAddr);
    fn send_binding_error_response(
        &mut self,
        request: &BindingRequest,
        addr: SocketAddr,
        error_code: u16,
        reason: &str,
    );

    /// Handles a datagram no connection claimed.
    fn handle_read(&mut self, msg: TaggedBytesMut) -> Result<()>;
    fn poll_event(&mut self) -> Option<PortEvent>;
    fn poll_write(&mut self) -> Option<TaggedBytesMut> {
        None
    }
}
