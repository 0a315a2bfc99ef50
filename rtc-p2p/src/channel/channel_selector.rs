use std::cmp::Ordering;
use std::collections::BTreeSet;

use super::*;
use crate::connection::pair_priority;

/// Compares two connections on static information only. `Greater` means `a` is
/// better: higher pair priority, then the newer generation.
pub(crate) fn compare_connection_candidates(
    a: &ConnectionEntry,
    b: &ConnectionEntry,
    controlling: bool,
) -> Ordering {
    let a_priority = pair_priority(
        a.conn.local_candidate().priority(),
        a.conn.remote_candidate().priority(),
        controlling,
    );
    let b_priority = pair_priority(
        b.conn.local_candidate().priority(),
        b.conn.remote_candidate().priority(),
        controlling,
    );

    a_priority
        .cmp(&b_priority)
        .then_with(|| a.pair_generation().cmp(&b.pair_generation()))
}

/// Compares two connections on write state, then on static information.
/// `Greater` means `a` is better.
pub(crate) fn compare_connections(
    a: &ConnectionEntry,
    b: &ConnectionEntry,
    controlling: bool,
) -> Ordering {
    // better write states have lower values
    b.conn
        .write_state()
        .cmp(&a.conn.write_state())
        .then_with(|| compare_connection_candidates(a, b, controlling))
}

impl P2pTransportChannel {
    pub(crate) fn is_controlling(&self) -> bool {
        self.role == IceRole::Controlling
    }

    /// Whether `top` should replace `current` as the best connection.
    pub(crate) fn should_switch(
        &self,
        current: Option<ConnectionHandle>,
        top: Option<ConnectionHandle>,
    ) -> bool {
        if current == top {
            return false;
        }

        let (Some(a), Some(b)) = (
            current.and_then(|handle| self.arena.get(handle)),
            top.and_then(|handle| self.arena.get(handle)),
        ) else {
            return true;
        };

        match compare_connections(a, b, self.is_controlling()) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => b.conn.rtt() <= a.conn.rtt() + self.config.min_rtt_improvement,
        }
    }

    pub(crate) fn switch_best_connection_to(&mut self, handle: Option<ConnectionHandle>) {
        let previous = self.best_connection;
        self.best_connection = handle.filter(|h| self.arena.contains(*h));

        let Some(entry) = self.best_connection.and_then(|h| self.arena.get(h)) else {
            info!("[{}]: no best connection", self.get_name());
            return;
        };

        if let Some(previous) = previous.and_then(|h| self.arena.get(h)) {
            info!(
                "[{}]: previous best connection: {:?}",
                self.get_name(),
                previous.conn
            );
        }
        info!(
            "[{}]: new best connection: {:?}",
            self.get_name(),
            entry.conn
        );

        let remote = entry.conn.remote_candidate().clone();
        self.event_outs.push_back(ChannelEvent::RouteChange(remote));
        self.nominate_best_connection();
    }

    /// The controlling agent nominates the best pair on ports speaking RFC 5245.
    fn nominate_best_connection(&mut self) {
        let controlling = self.is_controlling();
        if let Some(entry) = self
            .best_connection
            .and_then(|handle| self.arena.get_mut(handle))
            && entry.ice_protocol == IceProtocolType::Rfc5245
            && controlling
        {
            entry.conn.set_nominated(true);
        }
    }

    /// Best connection on `network`: the channel's best if it lives there, else the
    /// first one in sorted order.
    fn best_connection_on_network(&self, network: &str) -> Option<ConnectionHandle> {
        if let Some(best) = self.best_connection
            && self
                .arena
                .get(best)
                .is_some_and(|entry| entry.network == network)
        {
            return Some(best);
        }

        self.order.iter().copied().find(|handle| {
            self.arena
                .get(*handle)
                .is_some_and(|entry| entry.network == network)
        })
    }

    /// Re-ranks every connection, switches the best one if warranted, prunes
    /// superseded pairs and recomputes the aggregate readable/writable state.
    pub(crate) fn sort_connections(&mut self) {
        let now = self.last_now;
        // states feed the ranking
        self.update_connection_states(now);
        self.drain_connection_events();

        // Any changes after this point will require a re-sort.
        self.sort_dirty = false;

        let controlling = self.is_controlling();
        let arena = &self.arena;
        self.order.retain(|handle| arena.contains(*handle));
        self.order.sort_by(|a, b| match (arena.get(*a), arena.get(*b)) {
            (Some(a), Some(b)) => {
                compare_connections(b, a, controlling).then_with(|| a.conn.rtt().cmp(&b.conn.rtt()))
            }
            _ => Ordering::Equal,
        });

        trace!("[{}]: sorting available connections:", self.get_name());
        for handle in &self.order {
            if let Some(entry) = self.arena.get(*handle) {
                trace!("[{}]: {handle} {:?}", self.get_name(), entry.conn);
            }
        }

        let top = self.order.first().copied();
        if self.should_switch(self.best_connection, top) {
            self.switch_best_connection_to(top);
        }

        self.prune_connections();

        let mut writable = 0;
        let mut not_writable = 0;
        for entry in self.order.iter().filter_map(|handle| self.arena.get(*handle)) {
            match entry.conn.write_state() {
                WriteState::Writable => writable += 1,
                WriteState::Unreliable | WriteState::Init => not_writable += 1,
                WriteState::Timeout => {}
            }
        }

        if writable > 0 {
            self.handle_writable();
        } else if not_writable > 0 {
            self.handle_not_writable();
        } else {
            self.handle_all_timed_out();
        }

        self.update_channel_state();
    }

    /// Prunes every connection that a writable connection on the same network beats
    /// or ties. Connections on other networks may be independent paths and are kept.
    fn prune_connections(&mut self) {
        let name = self.get_name();
        let controlling = self.is_controlling();
        let networks: BTreeSet<String> = self
            .order
            .iter()
            .filter_map(|handle| self.arena.get(*handle))
            .map(|entry| entry.network.clone())
            .collect();

        for network in &networks {
            let Some(premier) = self.best_connection_on_network(network) else {
                continue;
            };
            let Some(premier_entry) = self.arena.get(premier) else {
                continue;
            };
            if premier_entry.conn.write_state() != WriteState::Writable {
                continue;
            }

            let superseded: Vec<ConnectionHandle> = self
                .order
                .iter()
                .copied()
                .filter(|handle| *handle != premier)
                .filter(|handle| {
                    self.arena.get(*handle).is_some_and(|entry| {
                        entry.network == *network
                            && compare_connection_candidates(premier_entry, entry, controlling)
                                != Ordering::Less
                    })
                })
                .collect();

            for handle in superseded {
                if let Some(entry) = self.arena.get_mut(handle) {
                    trace!("[{name}]: pruning {handle}");
                    entry.conn.prune();
                }
            }
        }
    }

    /// At least one connection is writable.
    fn handle_writable(&mut self) {
        if !self.writable {
            // a working path was found, further gathering is optional
            for entry in &mut self.sessions {
                if entry.session.is_getting_all_ports() {
                    entry.session.stop_get_all_ports();
                }
            }
        }

        self.was_writable = true;
        self.was_timed_out = false;
        self.writable = true;
    }

    /// Nothing is writable yet, but some connection may still become so.
    fn handle_not_writable(&mut self) {
        if self.was_writable {
            // react to path loss right away
            self.was_writable = false;
            self.allocate();
        }

        self.was_timed_out = false;
        self.writable = false;
    }

    /// Every connection timed out writing.
    fn handle_all_timed_out(&mut self) {
        if !self.was_timed_out {
            // still timed out until the new session hands out ports
            self.allocate();
        }

        self.was_timed_out = true;
        self.was_writable = false;
        self.writable = false;
    }

    fn update_channel_state(&mut self) {
        let best_writable = self
            .best_connection()
            .is_some_and(|conn| conn.write_state() == WriteState::Writable);
        if best_writable != self.writable {
            error!(
                "[{}]: update_channel_state: writable state mismatch",
                self.get_name()
            );
        }

        self.readable = self
            .order
            .iter()
            .filter_map(|handle| self.arena.get(*handle))
            .any(|entry| entry.conn.read_state() == ReadState::Readable);

        self.update_reported_state();
    }
}
