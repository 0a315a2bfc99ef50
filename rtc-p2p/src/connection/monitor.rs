use log::{debug, trace};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::*;

/// Readable connections time out after this long without a ping.
pub(crate) const CONNECTION_READ_TIMEOUT: Duration = Duration::from_secs(30);
/// Unwritable connections time out after this long without a response.
pub(crate) const CONNECTION_WRITE_TIMEOUT: Duration = Duration::from_secs(15);
/// A writable connection becomes unreliable after this long without a response...
pub(crate) const CONNECTION_WRITE_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// ...and this many unanswered pings.
pub(crate) const CONNECTION_WRITE_CONNECT_FAILURES: usize = 5;

pub(crate) const MINIMUM_RTT: Duration = Duration::from_millis(100);
pub(crate) const MAXIMUM_RTT: Duration = Duration::from_secs(3);
/// Used until the first response arrives; large in case the path is slow.
pub(crate) const DEFAULT_RTT: Duration = MAXIMUM_RTT;
/// Weighting of the old rtt value to new data, 3 : 1.
pub(crate) const RTT_RATIO: u32 = 3;

/// Recoverable STUN error codes: unknown attribute, role conflict, server error,
/// unauthorized and stale credentials.
const RECOVERABLE_ERROR_CODES: [u16; 5] = [420, 487, 500, 401, 430];

fn conservative_rtt_estimate(rtt: Duration) -> Duration {
    (rtt * 2).clamp(MINIMUM_RTT, MAXIMUM_RTT)
}

/// Whether at least `maximum_failures` pings went unanswered past their response window.
fn too_many_failures(
    pings_since_last_response: &[Instant],
    maximum_failures: usize,
    rtt_estimate: Duration,
    now: Instant,
) -> bool {
    if maximum_failures == 0 || pings_since_last_response.len() < maximum_failures {
        return false;
    }

    pings_since_last_response[maximum_failures - 1] + rtt_estimate < now
}

/// Whether the oldest unanswered ping is older than `maximum_time`.
fn too_long_without_response(
    pings_since_last_response: &[Instant],
    maximum_time: Duration,
    now: Instant,
) -> bool {
    match pings_since_last_response.first() {
        Some(first) => *first + maximum_time < now,
        None => false,
    }
}

/// Read/write state machine of a single candidate pair.
///
/// `ConnectionMonitor` tracks pings sent and received and derives the pair's
/// [`ReadState`], [`WriteState`] and [`CandidatePairState`] from them. Every
/// change queues [`ConnectionEvent::StateChange`]; once both directions time out
/// [`ConnectionEvent::Destroyed`] is queued exactly once.
#[derive(Debug)]
pub struct ConnectionMonitor {
    read_state: ReadState,
    write_state: WriteState,
    check_state: CandidatePairState,
    connected: bool,
    pruned: bool,
    rtt: Duration,
    last_ping_sent: Option<Instant>,
    last_ping_received: Option<Instant>,
    pings_since_last_response: Vec<Instant>,
    destroyed: bool,
    events: VecDeque<ConnectionEvent>,
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMonitor {
    pub fn new() -> Self {
        Self {
            read_state: ReadState::Init,
            write_state: WriteState::Init,
            check_state: CandidatePairState::Waiting,
            connected: true,
            pruned: false,
            rtt: DEFAULT_RTT,
            last_ping_sent: None,
            last_ping_received: None,
            pings_since_last_response: vec![],
            destroyed: false,
            events: VecDeque::new(),
        }
    }

    pub fn read_state(&self) -> ReadState {
        self.read_state
    }

    pub fn write_state(&self) -> WriteState {
        self.write_state
    }

    pub fn state(&self) -> CandidatePairState {
        self.check_state
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub fn pruned(&self) -> bool {
        self.pruned
    }

    pub fn rtt(&self) -> Duration {
        self.rtt
    }

    pub fn last_ping_sent(&self) -> Option<Instant> {
        self.last_ping_sent
    }

    pub fn last_ping_received(&self) -> Option<Instant> {
        self.last_ping_received
    }

    /// Number of pings still waiting for a response.
    pub fn pending_pings(&self) -> usize {
        self.pings_since_last_response.len()
    }

    pub fn update_state(&mut self, now: Instant) {
        let read_expired = self
            .last_ping_received
            .is_some_and(|last| last + CONNECTION_READ_TIMEOUT <= now);
        if self.read_state == ReadState::Readable && read_expired {
            self.set_read_state(ReadState::Timeout);
        }

        // Before becoming unreliable, a fixed number of pings may fail, each
        // given a conservative window for its response. Timing out takes a
        // fixed amount of time to ride out network changes.
        let rtt = conservative_rtt_estimate(self.rtt);
        trace!(
            "update_state: {} pings since last response, rtt {:?}",
            self.pings_since_last_response.len(),
            rtt
        );

        if self.write_state == WriteState::Writable
            && too_many_failures(
                &self.pings_since_last_response,
                CONNECTION_WRITE_CONNECT_FAILURES,
                rtt,
                now,
            )
            && too_long_without_response(
                &self.pings_since_last_response,
                CONNECTION_WRITE_CONNECT_TIMEOUT,
                now,
            )
        {
            self.set_write_state(WriteState::Unreliable);
        }

        if (self.write_state == WriteState::Unreliable || self.write_state == WriteState::Init)
            && too_long_without_response(
                &self.pings_since_last_response,
                CONNECTION_WRITE_TIMEOUT,
                now,
            )
        {
            self.set_write_state(WriteState::Timeout);
        }
    }

    pub fn ping(&mut self, now: Instant) {
        self.last_ping_sent = Some(now);
        self.pings_since_last_response.push(now);
        if self.check_state == CandidatePairState::Waiting {
            self.check_state = CandidatePairState::InProgress;
        }
    }

    pub fn received_ping(&mut self, now: Instant) {
        self.last_ping_received = Some(now);
        self.set_read_state(ReadState::Readable);

        // If timed out sending writability checks, start up again
        if !self.pruned && self.write_state == WriteState::Timeout {
            self.set_write_state(WriteState::Init);
        }
    }

    /// A valid response may bring a pruned connection back to life; the owner
    /// can always prune it again.
    pub fn received_ping_response(&mut self, rtt: Duration) {
        self.set_write_state(WriteState::Writable);
        self.pings_since_last_response.clear();
        self.rtt = (self.rtt * RTT_RATIO + rtt) / (RTT_RATIO + 1);
        self.check_state = CandidatePairState::Succeeded;
        trace!("received ping response after {rtt:?}, rtt now {:?}", self.rtt);
    }

    pub fn received_error_response(&mut self, error_code: u16) {
        if RECOVERABLE_ERROR_CODES.contains(&error_code) {
            trace!("recoverable error response {error_code}, retrying");
            return;
        }

        debug!("received error response {error_code}; killing connection");
        self.check_state = CandidatePairState::Failed;
        self.set_write_state(WriteState::Timeout);
    }

    pub fn prune(&mut self) {
        if !self.pruned {
            trace!("connection pruned");
            self.pruned = true;
            self.pings_since_last_response.clear();
            self.set_write_state(WriteState::Timeout);
        }
    }

    pub fn destroy(&mut self) {
        trace!("connection destroyed");
        self.set_read_state(ReadState::Timeout);
        self.set_write_state(WriteState::Timeout);
    }

    pub fn poll_event(&mut self) -> Option<ConnectionEvent> {
        self.events.pop_front()
    }

    fn set_read_state(&mut self, state: ReadState) {
        if self.read_state != state {
            trace!("read state {} -> {}", self.read_state, state);
            self.read_state = state;
            self.events.push_back(ConnectionEvent::StateChange);
            self.check_timeout();
        }
    }

    fn set_write_state(&mut self, state: WriteState) {
        if self.write_state != state {
            trace!("write state {} -> {}", self.write_state, state);
            self.write_state = state;
            self.events.push_back(ConnectionEvent::StateChange);
            self.check_timeout();
        }
    }

    // With both directions timed out the pair contributes nothing more.
    fn check_timeout(&mut self) {
        if !self.destroyed
            && self.read_state == ReadState::Timeout
            && self.write_state == WriteState::Timeout
        {
            self.destroyed = true;
            self.events.push_back(ConnectionEvent::Destroyed);
        }
    }
}
