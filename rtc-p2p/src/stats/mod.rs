use serde::Serialize;
use std::time::Duration;

use crate::candidate::Candidate;
use crate::channel::ConnectionHandle;
use crate::connection::{CandidatePairState, ReadState, WriteState};

/// Snapshot of one connection reported by `P2pTransportChannel::get_stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    pub handle: ConnectionHandle,
    /// Whether this is the connection currently used for sending.
    pub best_connection: bool,
    pub readable: bool,
    pub writable: bool,
    /// Write state timed out, the pair is not checked anymore.
    pub timeout: bool,
    /// First time this connection shows up in the stats.
    pub new_connection: bool,
    pub nominated: bool,
    pub read_state: ReadState,
    pub write_state: WriteState,
    pub state: CandidatePairState,
    pub rtt: Duration,
    pub sent_total_bytes: u64,
    pub recv_total_bytes: u64,
    pub local_candidate: Candidate,
    pub remote_candidate: Candidate,
}
