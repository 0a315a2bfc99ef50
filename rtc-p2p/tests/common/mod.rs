//! In-memory ports, connections and allocator used to drive the channel
//! without sockets.
//!
//! Payloads carry test commands instead of STUN:
//! - `PING` is a connectivity check from the remote side
//! - `PING_RESPONSE:<ms>` answers our last check with the given rtt
//! - `USE` is a check carrying the nomination flag
//! - `DESTROY` tears the connection down
//! - `PROBE:<username>` is a check from an address no connection covers
//! - `PORT_DESTROYED` and `ROLE_CONFLICT` make the receiving port raise that event
//! - anything else is application data

#![allow(dead_code)]

use bytes::BytesMut;
use rtc_p2p::allocator::{PortAllocator, PortAllocatorSession, SessionEvent};
use rtc_p2p::candidate::{Candidate, CandidateConfig, CandidateType};
use rtc_p2p::channel::channel_config::ChannelConfig;
use rtc_p2p::connection::monitor::ConnectionMonitor;
use rtc_p2p::connection::{CandidatePairState, Connection, ConnectionEvent, ReadState, WriteState};
use rtc_p2p::port::{
    BindingRequest, CandidateOrigin, IceProtocolType, IceRole, Port, PortEvent, PortId,
    SocketOption,
};
use rtc_p2p::{ChannelEvent, P2pTransportChannel, TransportInput};
use sansio::Protocol;
use shared::error::{Error, Result};
use shared::{TaggedBytesMut, TransportContext, TransportMessage, TransportProtocol};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::{Duration, Instant};

pub const REMOTE_UFRAG: &str = "remote-ufrag";
pub const REMOTE_PWD: &str = "remote-password-remote-password";

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A local port the fake allocator hands out.
#[derive(Debug, Clone)]
pub struct PortSpec {
    pub address: SocketAddr,
    pub network: String,
    pub priority: u32,
}

impl PortSpec {
    pub fn new(address: &str, network: &str, priority: u32) -> Self {
        Self {
            address: address.parse().unwrap(),
            network: network.to_owned(),
            priority,
        }
    }
}

/// What the fakes observed; shared with the test after the channel took ownership.
#[derive(Default)]
pub struct AllocatorState {
    pub port_specs: Vec<PortSpec>,
    pub sessions_created: usize,
    pub stop_calls: usize,
    pub options: Vec<(PortId, SocketOption, i32)>,
    pub roles: Vec<(PortId, IceRole)>,
    next_port_id: u64,
    queues: Vec<VecDeque<SessionEvent>>,
}

pub type SharedState = Rc<RefCell<AllocatorState>>;

impl AllocatorState {
    fn new_port(&mut self, spec: &PortSpec, generation: u32, state: &SharedState) -> FakePort {
        self.next_port_id += 1;
        FakePort::new(PortId(self.next_port_id), spec, generation, state.clone())
    }
}

/// Offers one more port through the newest session.
pub fn offer_port(state: &SharedState, spec: PortSpec) -> PortId {
    let mut s = state.borrow_mut();
    let generation = s.queues.len().saturating_sub(1) as u32;
    let mut port = s.new_port(&spec, generation, state);
    port.prepare_address(Instant::now());
    let id = port.id();
    if let Some(queue) = s.queues.last_mut() {
        queue.push_back(SessionEvent::PortReady(Box::new(port)));
    }
    id
}

pub struct FakeAllocator {
    state: SharedState,
}

impl FakeAllocator {
    pub fn new(port_specs: Vec<PortSpec>) -> (Self, SharedState) {
        let state = Rc::new(RefCell::new(AllocatorState {
            port_specs,
            ..Default::default()
        }));
        (
            Self {
                state: state.clone(),
            },
            state,
        )
    }
}

impl PortAllocator for FakeAllocator {
    fn create_session(
        &mut self,
        _transport_id: &str,
        _component: u16,
        _ice_ufrag: &str,
        _ice_pwd: &str,
    ) -> Box<dyn PortAllocatorSession> {
        let mut s = self.state.borrow_mut();
        s.sessions_created += 1;
        s.queues.push(VecDeque::new());
        Box::new(FakeSession {
            index: s.queues.len() - 1,
            generation: 0,
            getting_all_ports: false,
            state: self.state.clone(),
        })
    }
}

pub struct FakeSession {
    index: usize,
    generation: u32,
    getting_all_ports: bool,
    state: SharedState,
}

impl PortAllocatorSession for FakeSession {
    fn generation(&self) -> u32 {
        self.generation
    }

    fn set_generation(&mut self, generation: u32) {
        self.generation = generation;
    }

    fn get_initial_ports(&mut self) {
        let mut s = self.state.borrow_mut();
        let mut events = vec![];
        for spec in s.port_specs.clone() {
            let mut port = s.new_port(&spec, self.generation, &self.state);
            port.prepare_address(Instant::now());
            events.push(SessionEvent::PortReady(Box::new(port)));
        }
        if let Some(queue) = s.queues.get_mut(self.index) {
            queue.extend(events);
        }
    }

    fn start_get_all_ports(&mut self) {
        self.getting_all_ports = true;
        let mut s = self.state.borrow_mut();
        if let Some(queue) = s.queues.get_mut(self.index) {
            queue.push_back(SessionEvent::CandidatesAllocationDone);
        }
    }

    fn stop_get_all_ports(&mut self) {
        self.getting_all_ports = false;
        self.state.borrow_mut().stop_calls += 1;
    }

    fn is_getting_all_ports(&self) -> bool {
        self.getting_all_ports
    }

    fn poll_event(&mut self) -> Option<SessionEvent> {
        self.state
            .borrow_mut()
            .queues
            .get_mut(self.index)
            .and_then(|queue| queue.pop_front())
    }
}

pub struct FakePort {
    id: PortId,
    candidates: Vec<Candidate>,
    generation: u32,
    ice_protocol: IceProtocolType,
    prepared: bool,
    state: SharedState,
    events: VecDeque<PortEvent>,
    writes: VecDeque<TaggedBytesMut>,
}

impl FakePort {
    fn new(id: PortId, spec: &PortSpec, generation: u32, state: SharedState) -> Self {
        let candidate = CandidateConfig {
            candidate_type: CandidateType::Host,
            address: spec.address,
            priority: spec.priority,
            username: "local-ufrag".to_owned(),
            password: "local-password".to_owned(),
            network_name: spec.network.clone(),
            generation,
            ..Default::default()
        }
        .new_candidate()
        .unwrap();

        Self {
            id,
            candidates: vec![candidate],
            generation,
            ice_protocol: IceProtocolType::Rfc5245,
            prepared: false,
            state,
            events: VecDeque::new(),
            writes: VecDeque::new(),
        }
    }

    fn local(&self) -> &Candidate {
        &self.candidates[0]
    }

    fn reply(&mut self, addr: SocketAddr, text: String) {
        self.writes.push_back(TransportMessage {
            now: Instant::now(),
            transport: TransportContext {
                local_addr: self.local().address(),
                peer_addr: addr,
                transport_protocol: TransportProtocol::UDP,
            },
            message: BytesMut::from(text.as_bytes()),
        });
    }
}

impl Port for FakePort {
    fn id(&self) -> PortId {
        self.id
    }

    fn local_addr(&self) -> SocketAddr {
        self.local().address()
    }

    fn network(&self) -> &str {
        self.local().network_name()
    }

    fn generation(&self) -> u32 {
        self.generation
    }

    fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    fn prepare_address(&mut self, _now: Instant) {
        if !self.prepared {
            self.prepared = true;
            self.events
                .push_back(PortEvent::AddressReady(self.candidates.clone()));
        }
    }

    fn supports_protocol(&self, protocol: TransportProtocol) -> bool {
        protocol == TransportProtocol::UDP
    }

    fn create_connection(
        &mut self,
        remote: &Candidate,
        _origin: CandidateOrigin,
    ) -> Option<Box<dyn Connection>> {
        Some(Box::new(FakeConnection::new(
            self.local().clone(),
            remote.clone(),
        )))
    }

    fn set_option(&mut self, option: SocketOption, value: i32) -> Result<()> {
        if option == SocketOption::Ipv6Only {
            return Err(Error::ErrSetOptionFailed(option.to_string()));
        }
        self.state.borrow_mut().options.push((self.id, option, value));
        Ok(())
    }

    fn ice_protocol(&self) -> IceProtocolType {
        self.ice_protocol
    }

    fn set_ice_protocol(&mut self, protocol: IceProtocolType) {
        self.ice_protocol = protocol;
    }

    fn set_role(&mut self, role: IceRole) {
        self.state.borrow_mut().roles.push((self.id, role));
    }

    fn set_tiebreaker(&mut self, _tiebreaker: u64) {}

    fn send_binding_response(&mut self, _request: &BindingRequest, addr: SocketAddr) {
        self.reply(addr, "BINDING_RESPONSE".to_owned());
    }

    fn send_binding_error_response(
        &mut self,
        _request: &BindingRequest,
        addr: SocketAddr,
        error_code: u16,
        _reason: &str,
    ) {
        self.reply(addr, format!("BINDING_ERROR:{error_code}"));
    }

    fn handle_read(&mut self, msg: TaggedBytesMut) -> Result<()> {
        let text = String::from_utf8_lossy(&msg.message).to_string();
        match text.as_str() {
            "PORT_DESTROYED" => {
                self.events.push_back(PortEvent::Destroyed);
                return Ok(());
            }
            "ROLE_CONFLICT" => {
                self.events.push_back(PortEvent::RoleConflict);
                return Ok(());
            }
            _ => {}
        }
        let Some(username) = text.strip_prefix("PROBE:") else {
            return Err(Error::ErrUnhandledPacket);
        };
        self.events.push_back(PortEvent::UnknownAddress {
            address: msg.transport.peer_addr,
            protocol: msg.transport.transport_protocol,
            request: BindingRequest {
                transaction_id: [0; 12],
                raw: msg.message.clone(),
            },
            remote_username: username.to_owned(),
            port_muxed: false,
        });
        Ok(())
    }

    fn poll_event(&mut self) -> Option<PortEvent> {
        self.events.pop_front()
    }

    fn poll_write(&mut self) -> Option<TaggedBytesMut> {
        self.writes.pop_front()
    }
}

pub struct FakeConnection {
    local: Candidate,
    remote: Candidate,
    monitor: ConnectionMonitor,
    nominated: bool,
    rtt: Option<Duration>,
    sent: u64,
    received: u64,
    events: VecDeque<ConnectionEvent>,
    writes: VecDeque<TaggedBytesMut>,
}

impl FakeConnection {
    fn new(local: Candidate, remote: Candidate) -> Self {
        Self {
            local,
            remote,
            monitor: ConnectionMonitor::new(),
            nominated: false,
            rtt: None,
            sent: 0,
            received: 0,
            events: VecDeque::new(),
            writes: VecDeque::new(),
        }
    }

    fn transmit(&mut self, now: Instant, data: &[u8]) {
        self.writes.push_back(TransportMessage {
            now,
            transport: TransportContext {
                local_addr: self.local.address(),
                peer_addr: self.remote.address(),
                transport_protocol: self.remote.protocol(),
            },
            message: BytesMut::from(data),
        });
    }
}

impl Connection for FakeConnection {
    fn local_candidate(&self) -> &Candidate {
        &self.local
    }

    fn remote_candidate(&self) -> &Candidate {
        &self.remote
    }

    fn read_state(&self) -> ReadState {
        self.monitor.read_state()
    }

    fn write_state(&self) -> WriteState {
        self.monitor.write_state()
    }

    fn state(&self) -> CandidatePairState {
        self.monitor.state()
    }

    fn connected(&self) -> bool {
        self.monitor.connected()
    }

    fn rtt(&self) -> Duration {
        self.rtt.unwrap_or_else(|| self.monitor.rtt())
    }

    fn last_ping_sent(&self) -> Option<Instant> {
        self.monitor.last_ping_sent()
    }

    fn nominated(&self) -> bool {
        self.nominated
    }

    fn set_nominated(&mut self, nominated: bool) {
        self.nominated = nominated;
    }

    fn update_state(&mut self, now: Instant) {
        self.monitor.update_state(now);
    }

    fn ping(&mut self, now: Instant) {
        self.monitor.ping(now);
        self.transmit(now, b"PING");
    }

    fn received_ping(&mut self, now: Instant) {
        self.monitor.received_ping(now);
    }

    fn prune(&mut self) {
        self.monitor.prune();
    }

    fn destroy(&mut self) {
        self.monitor.destroy();
    }

    fn send(&mut self, now: Instant, data: &[u8]) -> Result<usize> {
        if self.monitor.write_state() != WriteState::Writable {
            return Err(Error::ErrConnectionNotWritable);
        }
        self.sent += data.len() as u64;
        self.transmit(now, data);
        Ok(data.len())
    }

    fn handle_read(&mut self, msg: TaggedBytesMut) -> Result<()> {
        let text = String::from_utf8_lossy(&msg.message).to_string();
        if text == "PING" {
            self.monitor.received_ping(msg.now);
        } else if let Some(ms) = text.strip_prefix("PING_RESPONSE:") {
            let rtt = Duration::from_millis(ms.parse().map_err(|_| Error::ErrUnhandledPacket)?);
            self.monitor.received_ping_response(rtt);
            self.rtt = Some(rtt);
        } else if text == "USE" {
            self.monitor.received_ping(msg.now);
            self.events.push_back(ConnectionEvent::UseCandidate);
        } else if text == "DESTROY" {
            self.monitor.destroy();
        } else {
            self.received += msg.message.len() as u64;
            self.events
                .push_back(ConnectionEvent::ReadPacket(msg.message));
        }
        Ok(())
    }

    fn poll_event(&mut self) -> Option<ConnectionEvent> {
        self.monitor
            .poll_event()
            .or_else(|| self.events.pop_front())
    }

    fn poll_write(&mut self) -> Option<TaggedBytesMut> {
        self.writes.pop_front()
    }

    fn sent_total_bytes(&self) -> u64 {
        self.sent
    }

    fn recv_total_bytes(&self) -> u64 {
        self.received
    }
}

/// Builds a remote host candidate signaled by the peer.
pub fn remote_candidate(address: &str, priority: u32, generation: u32) -> Candidate {
    CandidateConfig {
        candidate_type: CandidateType::Host,
        address: address.parse().unwrap(),
        priority,
        username: REMOTE_UFRAG.to_owned(),
        password: REMOTE_PWD.to_owned(),
        generation,
        ..Default::default()
    }
    .new_candidate()
    .unwrap()
}

/// A channel with credentials, the given role and a fake allocator.
pub fn new_channel(role: IceRole, port_specs: Vec<PortSpec>) -> (P2pTransportChannel, SharedState) {
    init_log();
    let (allocator, state) = FakeAllocator::new(port_specs);
    let config = ChannelConfig::new()
        .with_transport_id("audio")
        .with_ice_credentials("local-ufrag", "local-password");
    let mut channel = P2pTransportChannel::new(config, Box::new(allocator));
    channel
        .handle_event(TransportInput::SetRole(role))
        .unwrap();
    (channel, state)
}

/// Delivers `payload` as if it arrived on `local` from `peer`.
pub fn deliver(
    channel: &mut P2pTransportChannel,
    now: Instant,
    local: SocketAddr,
    peer: SocketAddr,
    payload: &str,
) -> Result<()> {
    channel.handle_read(TransportMessage {
        now,
        transport: TransportContext {
            local_addr: local,
            peer_addr: peer,
            transport_protocol: TransportProtocol::UDP,
        },
        message: BytesMut::from(payload.as_bytes()),
    })
}

pub fn drain_events(channel: &mut P2pTransportChannel) -> Vec<ChannelEvent> {
    let mut events = vec![];
    while let Some(event) = channel.poll_event() {
        events.push(event);
    }
    events
}

pub fn drain_writes(channel: &mut P2pTransportChannel) -> Vec<TaggedBytesMut> {
    let mut writes = vec![];
    while let Some(transmit) = channel.poll_write() {
        writes.push(transmit);
    }
    writes
}

pub fn route_changes(events: &[ChannelEvent]) -> Vec<SocketAddr> {
    events
        .iter()
        .filter_map(|event| match event {
            ChannelEvent::RouteChange(candidate) => Some(candidate.address()),
            _ => None,
        })
        .collect()
}

/// Handle of the connection between the port bound to `local` and `remote`.
pub fn find_connection(
    channel: &P2pTransportChannel,
    local: SocketAddr,
    remote: SocketAddr,
) -> Option<rtc_p2p::ConnectionHandle> {
    channel.connections().iter().copied().find(|handle| {
        channel.connection(*handle).is_some_and(|conn| {
            conn.local_candidate().address() == local && conn.remote_candidate().address() == remote
        })
    })
}
