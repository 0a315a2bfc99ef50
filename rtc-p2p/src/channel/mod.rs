
mod arena;
pub mod channel_config;
mod channel_ping;
mod channel_proto;
mod channel_selector;
mod channel_unknown;

pub use arena::ConnectionHandle;

use arena::{ConnectionArena, ConnectionEntry};
use bytes::BytesMut;
use channel_config::ChannelConfig;
use log::{debug, error, info, trace, warn};
use shared::error::*;
use shared::{TaggedBytesMut, TransportContext, TransportMessage};
use std::collections::VecDeque;
use std::time::Instant;

use crate::allocator::{PortAllocator, PortAllocatorSession, SessionEvent};
use crate::candidate::Candidate;
use crate::connection::{Connection, ConnectionEvent, ReadState, WriteState};
use crate::port::{
    CandidateOrigin, IceProtocolType, IceRole, Port, PortEvent, PortId, SocketOption,
    SocketOptions,
};
use crate::rand::generate_tiebreaker;
use crate::stats::ConnectionInfo;

/// Signals the channel raises towards its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The best connection changed; carries its remote candidate.
    RouteChange(Candidate),
    /// A local candidate is ready to be signaled to the remote peer.
    CandidateReady(Candidate),
    CandidatesAllocationDone,
    /// Aggregate readable or writable state changed.
    StateChange { readable: bool, writable: bool },
    /// A port detected that both agents claim the same role.
    RoleConflict,
}

/// Commands posted to the channel by the task that owns it.
#[derive(Debug, Clone)]
pub enum TransportInput {
    Connect,
    Reset,
    SetRole(IceRole),
    SetTiebreaker(u64),
    SetIceProtocolType(IceProtocolType),
    SetIceCredentials { ufrag: String, pwd: String },
    AddRemoteCandidate(Candidate),
    SetOption(SocketOption, i32),
}

/// A remote candidate and the port that learned it, if any.
#[derive(Debug, Clone)]
pub(crate) struct RemoteCandidate {
    pub(crate) candidate: Candidate,
    pub(crate) origin_port: Option<PortId>,
}

/// An allocator session and the ports it produced.
struct AllocatorSessionEntry {
    session: Box<dyn PortAllocatorSession>,
    ports: Vec<Box<dyn Port>>,
}

/// ICE transport channel.
///
/// Cross-produces connections between the ports handed out by allocator sessions
/// and the remote candidates signaled by the peer, pings them, and keeps the best
/// working pair selected. The channel is sans-I/O: drive it through its
/// [`sansio::Protocol`] implementation.
pub struct P2pTransportChannel {
    pub(crate) config: ChannelConfig,
    allocator: Box<dyn PortAllocator>,
    sessions: Vec<AllocatorSessionEntry>,
    /// Ports of the newest session, in discovery order.
    pub(crate) ports: Vec<PortId>,

    pub(crate) arena: ConnectionArena,
    /// All connections, best first after a sort.
    pub(crate) order: Vec<ConnectionHandle>,
    pub(crate) remote_candidates: Vec<RemoteCandidate>,
    pub(crate) best_connection: Option<ConnectionHandle>,

    pub(crate) role: IceRole,
    pub(crate) tiebreaker: u64,
    pub(crate) ice_protocol: IceProtocolType,
    ice_ufrag: String,
    ice_pwd: String,
    socket_options: SocketOptions,

    pub(crate) readable: bool,
    pub(crate) writable: bool,
    pub(crate) was_writable: bool,
    pub(crate) was_timed_out: bool,
    reported_state: (bool, bool),

    pub(crate) sort_dirty: bool,
    connect_requested: bool,
    pub(crate) next_ping: Option<Instant>,
    pub(crate) last_now: Instant,
    closed: bool,

    read_outs: VecDeque<TaggedBytesMut>,
    pub(crate) event_outs: VecDeque<ChannelEvent>,
}

impl P2pTransportChannel {
    /// Creates a new channel; nothing is gathered until [`connect`](Self::connect).
    pub fn new(config: ChannelConfig, allocator: Box<dyn PortAllocator>) -> Self {
        Self {
            allocator,
            sessions: vec![],
            ports: vec![],

            arena: ConnectionArena::default(),
            order: vec![],
            remote_candidates: vec![],
            best_connection: None,

            role: IceRole::Unknown,
            tiebreaker: generate_tiebreaker(),
            ice_protocol: config.ice_protocol,
            ice_ufrag: config.ice_ufrag.clone(),
            ice_pwd: config.ice_pwd.clone(),
            socket_options: config.socket_options.clone(),

            readable: false,
            writable: false,
            was_writable: false,
            // starts timed out so that no second session is allocated while the
            // first one is still building up
            was_timed_out: true,
            reported_state: (false, false),

            sort_dirty: false,
            connect_requested: false,
            next_ping: None,
            last_now: Instant::now(),
            closed: false,

            read_outs: VecDeque::new(),
            event_outs: VecDeque::new(),

            config,
        }
    }

    /// Starts gathering and pinging. Requires ICE credentials.
    pub fn connect(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::ErrClosed);
        }
        if self.ice_ufrag.is_empty() || self.ice_pwd.is_empty() {
            error!(
                "[{}]: connect: the ice ufrag and the ice pwd are not set",
                self.get_name()
            );
            return Err(Error::ErrIceCredentialsMissing);
        }

        self.connect_requested = true;
        self.allocate();

        // Start pinging as the ports come in.
        self.next_ping = Some(self.last_now);
        self.process_events();

        Ok(())
    }

    /// Drops every session, port, connection and remote candidate and starts over.
    pub fn reset(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::ErrClosed);
        }
        info!("[{}]: reset", self.get_name());

        self.sessions.clear();
        self.ports.clear();
        self.order.clear();
        self.arena.clear();
        self.best_connection = None;
        self.remote_candidates.clear();
        // data from the dropped connections is no longer ours to deliver
        self.read_outs.clear();

        self.readable = false;
        self.writable = false;
        self.sort_dirty = false;
        self.was_writable = false;
        self.was_timed_out = true;
        self.update_reported_state();

        if self.connect_requested {
            self.allocate();
        }

        self.next_ping = Some(self.last_now);
        self.process_events();

        Ok(())
    }

    pub fn set_ice_credentials(&mut self, ufrag: impl Into<String>, pwd: impl Into<String>) {
        self.ice_ufrag = ufrag.into();
        self.ice_pwd = pwd.into();
    }

    /// Pairs a candidate signaled by the remote peer with every active port.
    pub fn add_remote_candidate(&mut self, candidate: Candidate) -> Result<()> {
        if self.closed {
            return Err(Error::ErrClosed);
        }

        self.create_connections(&candidate, None, false);
        self.sort_connections();
        self.process_events();

        Ok(())
    }

    /// Remembers a socket option and applies it to every active port.
    pub fn set_option(&mut self, option: SocketOption, value: i32) {
        if self.socket_options.get(option) == Some(value) {
            return;
        }
        self.socket_options.set(option, value);

        let name = self.get_name();
        for port_id in self.ports.clone() {
            if let Some(port) = self.port_mut(port_id)
                && let Err(err) = port.set_option(option, value)
            {
                warn!("[{name}]: set_option({option}, {value}) failed on {port_id}: {err}");
            }
        }
    }

    /// Sends application data over the best connection.
    pub fn send_packet(&mut self, data: &[u8]) -> Result<usize> {
        let handle = self.best_connection.ok_or(Error::ErrNoBestConnection)?;
        let now = self.last_now;
        let entry = self
            .arena
            .get_mut(handle)
            .ok_or(Error::ErrNoBestConnection)?;
        entry.conn.send(now, data)
    }

    /// Reports every connection in sorted order.
    pub fn get_stats(&mut self) -> Vec<ConnectionInfo> {
        let mut infos = Vec::with_capacity(self.order.len());
        for &handle in &self.order {
            let is_best = self.best_connection == Some(handle);
            let Some(entry) = self.arena.get_mut(handle) else {
                continue;
            };
            let conn = &entry.conn;
            infos.push(ConnectionInfo {
                handle,
                best_connection: is_best,
                readable: conn.read_state() == ReadState::Readable,
                writable: conn.write_state() == WriteState::Writable,
                timeout: conn.write_state() == WriteState::Timeout,
                new_connection: !entry.reported,
                nominated: conn.nominated(),
                read_state: conn.read_state(),
                write_state: conn.write_state(),
                state: conn.state(),
                rtt: conn.rtt(),
                sent_total_bytes: conn.sent_total_bytes(),
                recv_total_bytes: conn.recv_total_bytes(),
                local_candidate: conn.local_candidate().clone(),
                remote_candidate: conn.remote_candidate().clone(),
            });
            entry.reported = true;
        }
        infos
    }

    pub fn readable(&self) -> bool {
        self.readable
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    pub fn role(&self) -> IceRole {
        self.role
    }

    pub fn tiebreaker(&self) -> u64 {
        self.tiebreaker
    }

    pub fn ice_protocol_type(&self) -> IceProtocolType {
        self.ice_protocol
    }

    pub fn best_connection(&self) -> Option<&dyn Connection> {
        self.best_connection
            .and_then(|handle| self.arena.get(handle))
            .map(|entry| entry.conn.as_ref())
    }

    pub fn best_connection_handle(&self) -> Option<ConnectionHandle> {
        self.best_connection
    }

    pub fn connection(&self, handle: ConnectionHandle) -> Option<&dyn Connection> {
        self.arena.get(handle).map(|entry| entry.conn.as_ref())
    }

    /// Port the connection was built on.
    pub fn connection_port(&self, handle: ConnectionHandle) -> Option<PortId> {
        self.arena.get(handle).map(|entry| entry.port)
    }

    /// Handles of all connections, best first as of the last sort.
    pub fn connections(&self) -> &[ConnectionHandle] {
        &self.order
    }

    /// Ports new remote candidates are paired with.
    pub fn ports(&self) -> &[PortId] {
        &self.ports
    }

    pub fn remote_candidates(&self) -> Vec<&Candidate> {
        self.remote_candidates
            .iter()
            .map(|rc| &rc.candidate)
            .collect()
    }

    /// Number of allocator sessions started since creation or the last reset.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub(crate) fn get_name(&self) -> &'static str {
        match self.role {
            IceRole::Controlling => "controlling",
            IceRole::Controlled => "controlled",
            IceRole::Unknown => "unknown",
        }
    }

    pub(crate) fn port(&self, port_id: PortId) -> Option<&dyn Port> {
        self.sessions
            .iter()
            .flat_map(|entry| entry.ports.iter())
            .find(|port| port.id() == port_id)
            .map(|port| port.as_ref())
    }

    pub(crate) fn port_mut(&mut self, port_id: PortId) -> Option<&mut Box<dyn Port>> {
        self.sessions
            .iter_mut()
            .flat_map(|entry| entry.ports.iter_mut())
            .find(|port| port.id() == port_id)
    }

    pub(crate) fn all_ports_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn Port>> {
        self.sessions
            .iter_mut()
            .flat_map(|entry| entry.ports.iter_mut())
    }

    /// Starts a new allocator session; new remote candidates only go to its ports.
    pub(crate) fn allocate(&mut self) {
        let mut session = self.allocator.create_session(
            &self.config.transport_id,
            self.config.component,
            &self.ice_ufrag,
            &self.ice_pwd,
        );
        session.set_generation(self.sessions.len() as u32);
        info!(
            "[{}]: starting allocator session generation {}",
            self.get_name(),
            session.generation()
        );

        // Candidates received from now on replace those of previous sessions.
        self.ports.clear();

        session.get_initial_ports();
        session.start_get_all_ports();
        self.sessions.push(AllocatorSessionEntry {
            session,
            ports: vec![],
        });
    }

    fn on_session_event(&mut self, session_index: usize, event: SessionEvent) {
        match event {
            SessionEvent::PortReady(port) => self.on_port_ready(session_index, port),
            SessionEvent::CandidatesReady(candidates) => {
                for candidate in candidates {
                    self.event_outs
                        .push_back(ChannelEvent::CandidateReady(candidate));
                }
            }
            SessionEvent::CandidatesAllocationDone => {
                self.event_outs
                    .push_back(ChannelEvent::CandidatesAllocationDone);
            }
        }
    }

    /// Configures a new port and pairs it with every remembered remote candidate.
    fn on_port_ready(&mut self, session_index: usize, mut port: Box<dyn Port>) {
        let name = self.get_name();
        for (option, value) in self.socket_options.iter() {
            if let Err(err) = port.set_option(option, value) {
                warn!(
                    "[{name}]: set_option({option}, {value}) failed on {}: {err}",
                    port.id()
                );
            }
        }

        port.set_ice_protocol(self.ice_protocol);
        port.set_role(self.role);
        port.set_tiebreaker(self.tiebreaker);

        let port_id = port.id();
        let Some(entry) = self.sessions.get_mut(session_index) else {
            return;
        };
        entry.ports.push(port);
        self.ports.push(port_id);
        debug!("[{name}]: {port_id} ready ({} active)", self.ports.len());

        for rc in self.remote_candidates.clone() {
            if let Err(err) = self.create_connection(port_id, &rc.candidate, rc.origin_port, false)
            {
                debug!(
                    "[{name}]: no connection from {port_id} to {}: {err}",
                    rc.candidate
                );
            }
        }

        self.sort_connections();
    }

    fn on_port_event(&mut self, port_id: PortId, event: PortEvent) {
        match event {
            PortEvent::AddressReady(candidates) => {
                for candidate in candidates {
                    self.event_outs
                        .push_back(ChannelEvent::CandidateReady(candidate));
                }
            }
            PortEvent::UnknownAddress {
                address,
                protocol,
                request,
                remote_username,
                port_muxed,
            } => self.on_unknown_address(
                port_id,
                address,
                protocol,
                request,
                remote_username,
                port_muxed,
            ),
            PortEvent::Destroyed => self.on_port_destroyed(port_id),
            PortEvent::RoleConflict => {
                // a check is sent again once the owner resolves the conflict with set_role
                self.event_outs.push_back(ChannelEvent::RoleConflict);
            }
        }
    }

    /// Forgets a port; connections built on it keep running.
    fn on_port_destroyed(&mut self, port_id: PortId) {
        self.ports.retain(|id| *id != port_id);
        for entry in &mut self.sessions {
            entry.ports.retain(|port| port.id() != port_id);
        }
        info!(
            "[{}]: removed {port_id}: {} remaining",
            self.get_name(),
            self.ports.len()
        );
    }

    /// Pairs `candidate` with every active port, and with `origin_port` even if it
    /// is no longer active. Returns whether a connection exists on the origin port.
    pub(crate) fn create_connections(
        &mut self,
        candidate: &Candidate,
        origin_port: Option<PortId>,
        readable: bool,
    ) -> bool {
        let name = self.get_name();
        let mut created = false;

        let ports: Vec<PortId> = self.ports.iter().rev().copied().collect();
        for port_id in ports {
            match self.create_connection(port_id, candidate, origin_port, readable) {
                Ok(_) => {
                    if Some(port_id) == origin_port {
                        created = true;
                    }
                }
                Err(err) => debug!("[{name}]: no connection from {port_id} to {candidate}: {err}"),
            }
        }

        if let Some(origin) = origin_port
            && !self.ports.contains(&origin)
        {
            match self.create_connection(origin, candidate, origin_port, readable) {
                Ok(_) => created = true,
                Err(err) => debug!("[{name}]: no connection from {origin} to {candidate}: {err}"),
            }
        }

        self.remember_remote_candidate(candidate, origin_port);

        created
    }

    /// Creates the connection from `port_id` to `remote`, or confirms an equivalent one.
    pub(crate) fn create_connection(
        &mut self,
        port_id: PortId,
        remote: &Candidate,
        origin_port: Option<PortId>,
        readable: bool,
    ) -> Result<ConnectionHandle> {
        let handle = if let Some(handle) = self.arena.find(port_id, remote.address()) {
            let entry = self.arena.get(handle).ok_or(Error::ErrConnectionNotFound)?;
            // the other side may repeat a candidate but must not change it
            if !remote.is_equivalent(entry.conn.remote_candidate()) {
                info!(
                    "[{}]: attempt to change remote candidate {}",
                    self.get_name(),
                    remote.address()
                );
                return Err(Error::ErrRemoteCandidateChanged);
            }
            handle
        } else {
            let origin = match origin_port {
                None => CandidateOrigin::Message,
                Some(origin) if origin == port_id => CandidateOrigin::ThisPort,
                Some(_) => CandidateOrigin::OtherPort,
            };
            if origin == CandidateOrigin::Message && self.config.incoming_only {
                return Err(Error::ErrIncomingOnly);
            }

            let port = self.port_mut(port_id).ok_or(Error::ErrPortNotFound)?;
            if !port.supports_protocol(remote.protocol()) {
                return Err(Error::ErrIncompatibleProtocol);
            }
            let conn = port
                .create_connection(remote, origin)
                .ok_or(Error::ErrConnectionRefused)?;
            let entry = ConnectionEntry::new(conn, port.as_ref());

            let handle = self.arena.insert(entry);
            self.order.push(handle);
            info!(
                "[{}]: created connection {handle} with origin={origin:?}, ({} total)",
                self.get_name(),
                self.order.len()
            );
            handle
        };

        // Created in response to a check from the other side.
        if readable {
            let now = self.last_now;
            if let Some(entry) = self.arena.get_mut(handle) {
                entry.conn.received_ping(now);
            }
        }

        Ok(handle)
    }

    /// Remembers `candidate` for future ports, dropping older generations and duplicates.
    fn remember_remote_candidate(&mut self, candidate: &Candidate, origin_port: Option<PortId>) {
        let name = self.get_name();
        self.remote_candidates.retain(|rc| {
            if rc.candidate.generation() < candidate.generation() {
                info!(
                    "[{name}]: pruning candidate from old generation: {}",
                    rc.candidate.address()
                );
                false
            } else {
                true
            }
        });

        if self
            .remote_candidates
            .iter()
            .any(|rc| rc.candidate.is_equivalent(candidate))
        {
            info!("[{name}]: duplicate candidate: {}", candidate.address());
            return;
        }

        self.remote_candidates.push(RemoteCandidate {
            candidate: candidate.clone(),
            origin_port,
        });
    }

    fn on_connection_event(&mut self, handle: ConnectionHandle, event: ConnectionEvent) {
        match event {
            ConnectionEvent::StateChange => self.request_sort(),
            ConnectionEvent::Destroyed => self.on_connection_destroyed(handle),
            ConnectionEvent::UseCandidate => self.on_use_candidate(handle),
            ConnectionEvent::ReadPacket(data) => self.on_read_packet(handle, data),
        }
    }

    pub(crate) fn request_sort(&mut self) {
        self.sort_dirty = true;
    }

    /// Removes a connection; a best connection is deselected before it is dropped.
    pub(crate) fn on_connection_destroyed(&mut self, handle: ConnectionHandle) {
        self.order.retain(|h| *h != handle);
        if self.best_connection == Some(handle) {
            self.switch_best_connection_to(None);
        }
        if self.arena.remove(handle).is_none() {
            return;
        }

        info!(
            "[{}]: removed connection {handle} ({} remaining)",
            self.get_name(),
            self.order.len()
        );
        self.request_sort();
    }

    fn on_read_packet(&mut self, handle: ConnectionHandle, data: BytesMut) {
        // Do not deliver, if the connection no longer belongs to this channel.
        let Some(entry) = self.arena.get(handle) else {
            trace!("[{}]: dropped packet from stale {handle}", self.get_name());
            return;
        };

        let remote = entry.conn.remote_candidate();
        self.read_outs.push_back(TransportMessage {
            now: self.last_now,
            transport: TransportContext {
                local_addr: entry.local_addr,
                peer_addr: remote.address(),
                transport_protocol: remote.protocol(),
            },
            message: data,
        });
    }

    /// Pulls signals out of sessions, ports and connections until none is left.
    pub(crate) fn process_events(&mut self) {
        loop {
            let mut progressed = false;

            let mut session_index = 0;
            while session_index < self.sessions.len() {
                while let Some(event) = self
                    .sessions
                    .get_mut(session_index)
                    .and_then(|entry| entry.session.poll_event())
                {
                    progressed = true;
                    self.on_session_event(session_index, event);
                }
                session_index += 1;
            }

            let port_ids: Vec<PortId> = self
                .sessions
                .iter()
                .flat_map(|entry| entry.ports.iter().map(|port| port.id()))
                .collect();
            for port_id in port_ids {
                while let Some(event) = self.port_mut(port_id).and_then(|port| port.poll_event()) {
                    progressed = true;
                    self.on_port_event(port_id, event);
                }
            }

            if self.drain_connection_events() {
                progressed = true;
            }

            if !progressed {
                break;
            }
        }
    }

    /// Handles queued connection signals; returns whether there were any.
    pub(crate) fn drain_connection_events(&mut self) -> bool {
        let mut progressed = false;
        for handle in self.order.clone() {
            while let Some(event) = self
                .arena
                .get_mut(handle)
                .and_then(|entry| entry.conn.poll_event())
            {
                progressed = true;
                self.on_connection_event(handle, event);
            }
        }
        progressed
    }

    /// Raises [`ChannelEvent::StateChange`] if readable or writable moved since the
    /// last report.
    pub(crate) fn update_reported_state(&mut self) {
        let state = (self.readable, self.writable);
        if state != self.reported_state {
            self.reported_state = state;
            self.event_outs.push_back(ChannelEvent::StateChange {
                readable: self.readable,
                writable: self.writable,
            });
        }
    }

    fn poll_transmit(&mut self) -> Option<TaggedBytesMut> {
        for port in self.all_ports_mut() {
            if let Some(transmit) = port.poll_write() {
                return Some(transmit);
            }
        }
        for handle in self.order.clone() {
            if let Some(transmit) = self
                .arena
                .get_mut(handle)
                .and_then(|entry| entry.conn.poll_write())
            {
                return Some(transmit);
            }
        }
        None
    }

    fn shutdown(&mut self) {
        info!("[{}]: closing", self.get_name());
        self.switch_best_connection_to(None);
        self.order.clear();
        self.arena.clear();
        self.sessions.clear();
        self.ports.clear();
        self.remote_candidates.clear();
        self.read_outs.clear();
        self.next_ping = None;
        self.sort_dirty = false;
        self.readable = false;
        self.writable = false;
        self.update_reported_state();
        self.closed = true;
    }
}
