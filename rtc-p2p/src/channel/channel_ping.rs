use super::*;

impl P2pTransportChannel {
    /// Refreshes the time-derived state of every connection.
    pub(crate) fn update_connection_states(&mut self, now: Instant) {
        for handle in self.order.clone() {
            if let Some(entry) = self.arena.get_mut(handle) {
                entry.conn.update_state(now);
            }
        }
    }

    /// Whether the connection is worth a connectivity check.
    pub(crate) fn is_pingable(&self, conn: &dyn Connection) -> bool {
        // An unconnected connection cannot be written to at all.
        if !conn.connected() {
            return false;
        }

        if self.writable {
            // only pairs that were not pruned could beat the current one
            conn.write_state() != WriteState::Timeout
        } else {
            // A pruned pair the other side still checks may well work.
            conn.write_state() != WriteState::Timeout || conn.read_state() != ReadState::Timeout
        }
    }

    /// The oldest pingable connection, unless the writable best connection is due.
    pub(crate) fn find_next_pingable_connection(&self, now: Instant) -> Option<ConnectionHandle> {
        if let Some(best) = self.best_connection
            && let Some(entry) = self.arena.get(best)
            && entry.conn.write_state() == WriteState::Writable
            && entry
                .conn
                .last_ping_sent()
                .is_none_or(|sent| sent + self.config.max_current_writable_delay <= now)
        {
            return Some(best);
        }

        let mut oldest: Option<(ConnectionHandle, Option<Instant>)> = None;
        for &handle in &self.order {
            let Some(entry) = self.arena.get(handle) else {
                continue;
            };
            if !self.is_pingable(entry.conn.as_ref()) {
                continue;
            }

            // never pinged sorts first
            let last_ping_sent = entry.conn.last_ping_sent();
            match oldest {
                Some((_, oldest_sent)) if oldest_sent <= last_ping_sent => {}
                _ => oldest = Some((handle, last_ping_sent)),
            }
        }

        oldest.map(|(handle, _)| handle)
    }

    /// One tick of the check scheduler: ping the next connection and schedule the
    /// following tick, slower once the channel is writable.
    pub(crate) fn on_ping(&mut self, now: Instant) {
        self.update_connection_states(now);

        if let Some(handle) = self.find_next_pingable_connection(now) {
            let name = self.get_name();
            if let Some(entry) = self.arena.get_mut(handle) {
                trace!("[{name}]: pinging {handle} {:?}", entry.conn);
                entry.conn.ping(now);
            }
        }

        let delay = if self.writable {
            self.config.writable_delay
        } else {
            self.config.unwritable_delay
        };
        self.next_ping = Some(now + delay);
    }
}
