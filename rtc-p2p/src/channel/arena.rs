use serde::Serialize;
use slab::Slab;
use std::fmt;
use std::net::SocketAddr;

use crate::connection::Connection;
use crate::port::{IceProtocolType, Port, PortId};

/// Generation-checked reference to a connection owned by the channel.
///
/// A handle outlives its connection harmlessly: once the connection is removed the
/// handle no longer resolves, even after its slab slot is reused.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectionHandle {
    index: usize,
    generation: u64,
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}.{}", self.index, self.generation)
    }
}

/// A connection and what the channel knows about the port it was built on.
pub(crate) struct ConnectionEntry {
    pub(crate) conn: Box<dyn Connection>,
    pub(crate) port: PortId,
    pub(crate) local_addr: SocketAddr,
    pub(crate) network: String,
    pub(crate) port_generation: u32,
    pub(crate) ice_protocol: IceProtocolType,
    pub(crate) reported: bool,
    generation: u64,
}

impl ConnectionEntry {
    pub(crate) fn new(conn: Box<dyn Connection>, port: &dyn Port) -> Self {
        Self {
            conn,
            port: port.id(),
            local_addr: port.local_addr(),
            network: port.network().to_owned(),
            port_generation: port.generation(),
            ice_protocol: port.ice_protocol(),
            reported: false,
            generation: 0,
        }
    }

    /// Remote candidate generation plus port generation.
    pub(crate) fn pair_generation(&self) -> u32 {
        self.conn
            .remote_candidate()
            .generation()
            .saturating_add(self.port_generation)
    }
}

#[derive(Default)]
pub(crate) struct ConnectionArena {
    entries: Slab<ConnectionEntry>,
    next_generation: u64,
}

impl ConnectionArena {
    pub(crate) fn insert(&mut self, mut entry: ConnectionEntry) -> ConnectionHandle {
        self.next_generation += 1;
        entry.generation = self.next_generation;
        let index = self.entries.insert(entry);
        ConnectionHandle {
            index,
            generation: self.next_generation,
        }
    }

    pub(crate) fn get(&self, handle: ConnectionHandle) -> Option<&ConnectionEntry> {
        self.entries
            .get(handle.index)
            .filter(|entry| entry.generation == handle.generation)
    }

    pub(crate) fn get_mut(&mut self, handle: ConnectionHandle) -> Option<&mut ConnectionEntry> {
        self.entries
            .get_mut(handle.index)
            .filter(|entry| entry.generation == handle.generation)
    }

    pub(crate) fn contains(&self, handle: ConnectionHandle) -> bool {
        self.get(handle).is_some()
    }

    pub(crate) fn remove(&mut self, handle: ConnectionHandle) -> Option<ConnectionEntry> {
        if self.contains(handle) {
            Some(self.entries.remove(handle.index))
        } else {
            None
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    /// Connection built on `port` towards `remote`, if any.
    pub(crate) fn find(&self, port: PortId, remote: SocketAddr) -> Option<ConnectionHandle> {
        self.entries.iter().find_map(|(index, entry)| {
            if entry.port == port && entry.conn.remote_candidate().address() == remote {
                Some(ConnectionHandle {
                    index,
                    generation: entry.generation,
                })
            } else {
                None
            }
        })
    }

    /// Connection whose socket and remote addresses match a received datagram.
    pub(crate) fn find_by_addrs(
        &self,
        local: SocketAddr,
        remote: SocketAddr,
    ) -> Option<ConnectionHandle> {
        self.entries.iter().find_map(|(index, entry)| {
            if entry.local_addr == local && entry.conn.remote_candidate().address() == remote
            {
                Some(ConnectionHandle {
                    index,
                    generation: entry.generation,
                })
            } else {
                None
            }
        })
    }
}
