
use crc::{CRC_32_ISCSI, Crc};
use serde::{Deserialize, Serialize};
use shared::TransportProtocol;
use shared::error::*;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::rand::generate_cand_id;

pub(crate) const DEFAULT_LOCAL_PREFERENCE: u16 = 65535;

/// Indicates that the candidate is used for RTP.
pub const COMPONENT_RTP: u16 = 1;
/// Indicates that the candidate is used for RTCP.
pub const COMPONENT_RTCP: u16 = 2;

/// Represents the type of candidate `CandidateType` enum.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandidateType {
    #[default]
    #[serde(rename = "unspecified")]
    Unspecified,
    #[serde(rename = "host")]
    Host,
    #[serde(rename = "srflx")]
    ServerReflexive,
    #[serde(rename = "prflx")]
    PeerReflexive,
    #[serde(rename = "relay")]
    Relay,
}

impl fmt::Display for CandidateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            CandidateType::Host => "host",
            CandidateType::ServerReflexive => "srflx",
            CandidateType::PeerReflexive => "prflx",
            CandidateType::Relay => "relay",
            CandidateType::Unspecified => "Unknown candidate type",
        };
        write!(f, "{s}")
    }
}

impl CandidateType {
    /// Returns the preference weight of a `CandidateType`.
    ///
    /// 4.1.2.2.  Guidelines for Choosing Type and Local Preferences
    /// The RECOMMENDED values are 126 for host candidates, 100
    /// for server reflexive candidates, 110 for peer reflexive candidates,
    /// and 0 for relayed candidates.
    #[must_use]
    pub const fn preference(self) -> u16 {
        match self {
            Self::Host => 126,
            Self::PeerReflexive => 110,
            Self::ServerReflexive => 100,
            Self::Relay | CandidateType::Unspecified => 0,
        }
    }
}

/// Computes an ICE candidate priority from its type, local preference and component.
pub fn compute_priority(candidate_type: CandidateType, local_preference: u16, component: u16) -> u32 {
    (1 << 24) * u32::from(candidate_type.preference())
        + (1 << 8) * u32::from(local_preference)
        + (256 - u32::from(component.min(256)))
}

/// The config required to create a new [`Candidate`].
///
/// A zero `priority` or an empty `foundation` are derived from the other fields.
#[derive(Debug, Clone)]
pub struct CandidateConfig {
    pub candidate_id: String,
    pub candidate_type: CandidateType,
    pub component: u16,
    pub protocol: TransportProtocol,
    pub address: SocketAddr,
    pub priority: u32,
    pub username: String,
    pub password: String,
    pub network_name: String,
    pub generation: u32,
    pub foundation: String,
    pub related_address: Option<SocketAddr>,
}

impl Default for CandidateConfig {
    fn default() -> Self {
        Self {
            candidate_id: String::new(),
            candidate_type: CandidateType::default(),
            component: COMPONENT_RTP,
            protocol: TransportProtocol::UDP,
            address: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            priority: 0,
            username: String::new(),
            password: String::new(),
            network_name: String::new(),
            generation: 0,
            foundation: String::new(),
            related_address: None,
        }
    }
}

impl CandidateConfig {
    /// Creates a new candidate, filling in id, priority and foundation when left empty.
    pub fn new_candidate(self) -> Result<Candidate> {
        if self.candidate_type == CandidateType::Unspecified {
            return Err(Error::ErrUnknownCandidateType);
        }
        if self.component == 0 {
            return Err(Error::ErrComponentZero);
        }

        let id = if self.candidate_id.is_empty() {
            generate_cand_id()
        } else {
            self.candidate_id
        };

        let priority = if self.priority == 0 {
            compute_priority(
                self.candidate_type,
                DEFAULT_LOCAL_PREFERENCE,
                self.component,
            )
        } else {
            self.priority
        };

        let foundation = if self.foundation.is_empty() {
            let mut buf = vec![];
            buf.extend_from_slice(self.candidate_type.to_string().as_bytes());
            buf.extend_from_slice(self.protocol.to_string().as_bytes());
            buf.extend_from_slice(self.address.ip().to_string().as_bytes());
            checksum_foundation(&buf)
        } else {
            self.foundation
        };

        Ok(Candidate {
            id,
            component: self.component,
            protocol: self.protocol,
            address: self.address,
            priority,
            username: self.username,
            password: self.password,
            candidate_type: self.candidate_type,
            network_name: self.network_name,
            generation: self.generation,
            foundation,
            related_address: self.related_address,
        })
    }
}

pub(crate) fn checksum_foundation(buf: &[u8]) -> String {
    let checksum = Crc::<u32>::new(&CRC_32_ISCSI).checksum(buf);
    format!("{checksum}")
}

/// One transport address at which an endpoint may be reachable.
///
/// Candidates are immutable once built; [`Candidate::with_address`] yields a modified copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub(crate) id: String,
    pub(crate) component: u16,
    pub(crate) protocol: TransportProtocol,
    pub(crate) address: SocketAddr,
    pub(crate) priority: u32,
    pub(crate) username: String,
    pub(crate) password: String,
    pub(crate) candidate_type: CandidateType,
    pub(crate) network_name: String,
    pub(crate) generation: u32,
    pub(crate) foundation: String,
    pub(crate) related_address: Option<SocketAddr>,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cand[{}:{}:{}:{}:{}:{}:{}]",
            self.id,
            self.component,
            self.candidate_type,
            self.protocol,
            self.address,
            self.username,
            self.generation,
        )?;
        if let Some(related_address) = &self.related_address {
            write!(f, " related {related_address}")?;
        }
        Ok(())
    }
}

impl Candidate {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn component(&self) -> u16 {
        self.component
    }

    pub fn protocol(&self) -> TransportProtocol {
        self.protocol
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    /// ICE username fragment of the agent that owns this candidate.
    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn candidate_type(&self) -> CandidateType {
        self.candidate_type
    }

    /// Name of the network interface the candidate was gathered on.
    pub fn network_name(&self) -> &str {
        &self.network_name
    }

    /// Gathering generation; bumped by every ICE restart.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn foundation(&self) -> &str {
        &self.foundation
    }

    pub fn related_address(&self) -> Option<SocketAddr> {
        self.related_address
    }

    /// Whether two candidates describe the same remote endpoint.
    ///
    /// The id, priority, network name and generation are bookkeeping and do not count.
    pub fn is_equivalent(&self, other: &Candidate) -> bool {
        self.component == other.component
            && self.protocol == other.protocol
            && self.address == other.address
            && self.username == other.username
            && self.password == other.password
            && self.candidate_type == other.candidate_type
            && self.foundation == other.foundation
    }

    /// Returns a copy of this candidate reachable at `address`.
    #[must_use]
    pub fn with_address(&self, address: SocketAddr) -> Candidate {
        Candidate {
            address,
            ..self.clone()
        }
    }
}
