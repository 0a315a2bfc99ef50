use shared::TransportProtocol;
use std::net::SocketAddr;

use super::*;
use crate::candidate::{
    CandidateConfig, CandidateType, DEFAULT_LOCAL_PREFERENCE, checksum_foundation,
    compute_priority,
};
use crate::connection::CandidatePairState;
use crate::port::{
    BindingRequest, STUN_ERROR_REASON_SERVER_ERROR, STUN_ERROR_REASON_STALE_CREDENTIALS,
    STUN_ERROR_SERVER_ERROR, STUN_ERROR_STALE_CREDENTIALS,
};
use crate::rand::generate_cand_id;

impl P2pTransportChannel {
    pub fn set_role(&mut self, role: IceRole) {
        self.role = role;
        for port in self.all_ports_mut() {
            port.set_role(role);
        }
    }

    pub fn set_tiebreaker(&mut self, tiebreaker: u64) {
        self.tiebreaker = tiebreaker;
        for port in self.all_ports_mut() {
            port.set_tiebreaker(tiebreaker);
        }
    }

    pub fn set_ice_protocol_type(&mut self, protocol: IceProtocolType) {
        self.ice_protocol = protocol;
        for port in self.all_ports_mut() {
            port.set_ice_protocol(protocol);
        }
    }

    /// Handles a valid check that arrived on `port_id` from an address no
    /// connection covers, learning a peer reflexive candidate if needed.
    pub(crate) fn on_unknown_address(
        &mut self,
        port_id: PortId,
        address: SocketAddr,
        protocol: TransportProtocol,
        request: BindingRequest,
        remote_username: String,
        port_muxed: bool,
    ) {
        let name = self.get_name();

        // Remote candidates either share one ufrag or carry one per port.
        let ufrag_per_port = self.remote_candidates.first().is_some_and(|first| {
            self.remote_candidates
                .iter()
                .any(|rc| rc.candidate.username() != first.candidate.username())
        });

        let mut known_username = false;
        let mut remote_password = String::new();
        let mut matched: Option<Candidate> = None;
        for rc in &self.remote_candidates {
            if rc.candidate.username() != remote_username {
                continue;
            }
            remote_password = rc.candidate.password().to_owned();
            known_username = true;
            // keep looking, a later one may match the address
            if ufrag_per_port
                || (rc.candidate.address() == address && rc.candidate.protocol() == protocol)
            {
                matched = Some(rc.candidate.clone());
                break;
            }
        }

        if !known_username {
            if port_muxed {
                // every channel of a muxed port sees the check; the owner answers
                return;
            }
            // May be a check racing ahead of the signaled candidates; the sender retries.
            debug!("[{name}]: check from {address} with unknown username {remote_username}");
            if let Some(port) = self.port_mut(port_id) {
                port.send_binding_error_response(
                    &request,
                    address,
                    STUN_ERROR_STALE_CREDENTIALS,
                    STUN_ERROR_REASON_STALE_CREDENTIALS,
                );
            }
            return;
        }

        let new_remote_candidate = match matched {
            Some(candidate) if ufrag_per_port => Ok(candidate.with_address(address)),
            Some(candidate) => Ok(candidate),
            None => self.new_peer_reflexive_candidate(
                port_id,
                address,
                protocol,
                remote_username,
                remote_password,
            ),
        };

        let created = match new_remote_candidate {
            Ok(candidate) => {
                info!("[{name}]: learned remote candidate {candidate} from a check on {port_id}");
                self.create_connections(&candidate, Some(port_id), true)
            }
            Err(err) => {
                error!("[{name}]: failed to build peer reflexive candidate for {address}: {err}");
                false
            }
        };

        if created {
            if let Some(port) = self.port_mut(port_id) {
                port.send_binding_response(&request, address);
            }
            // after the response, since sorting may drop the connection in question
            self.sort_connections();
        } else {
            error!("[{name}]: no connection on {port_id} for check from {address}");
            if let Some(port) = self.port_mut(port_id) {
                port.send_binding_error_response(
                    &request,
                    address,
                    STUN_ERROR_SERVER_ERROR,
                    STUN_ERROR_REASON_SERVER_ERROR,
                );
            }
        }
    }

    /// Peer reflexive candidates get a server reflexive priority and a foundation
    /// derived from their random id.
    fn new_peer_reflexive_candidate(
        &self,
        port_id: PortId,
        address: SocketAddr,
        protocol: TransportProtocol,
        username: String,
        password: String,
    ) -> Result<Candidate> {
        let component = self.config.component;
        let candidate_id = generate_cand_id();
        let foundation = checksum_foundation(candidate_id.as_bytes());
        let network_name = self
            .port(port_id)
            .map(|port| port.network().to_owned())
            .unwrap_or_default();

        CandidateConfig {
            candidate_id,
            candidate_type: CandidateType::PeerReflexive,
            component,
            protocol,
            address,
            priority: compute_priority(
                CandidateType::ServerReflexive,
                DEFAULT_LOCAL_PREFERENCE,
                component,
            ),
            username,
            password,
            network_name,
            generation: 0,
            foundation,
            related_address: None,
        }
        .new_candidate()
    }

    /// The controlling peer nominated `handle`. Honored only in the controlled role
    /// and once the pair's own check succeeded; bypasses the sort hysteresis.
    pub(crate) fn on_use_candidate(&mut self, handle: ConnectionHandle) {
        if self.role != IceRole::Controlled {
            debug!(
                "[{}]: ignoring use-candidate on {handle} outside the controlled role",
                self.get_name()
            );
            return;
        }

        let Some(entry) = self.arena.get_mut(handle) else {
            return;
        };
        if entry.conn.state() != CandidatePairState::Succeeded {
            return;
        }

        entry.conn.set_nominated(true);
        if self.best_connection != Some(handle) {
            self.switch_best_connection_to(Some(handle));
        }
    }
}
