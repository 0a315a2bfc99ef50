#[cfg(test)]
mod monitor_test;

pub mod monitor;

use bytes::BytesMut;
use serde::Serialize;
use shared::TaggedBytesMut;
use shared::error::Result;
use std::fmt;
use std::time::{Duration, Instant};

use crate::candidate::Candidate;

/// Whether the remote side is checking us.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ReadState {
    /// We have yet to receive a ping.
    #[default]
    #[serde(rename = "init")]
    Init = 0,
    /// We have received pings recently.
    #[serde(rename = "readable")]
    Readable = 1,
    /// We haven't received pings in a while.
    #[serde(rename = "timeout")]
    Timeout = 2,
}

impl fmt::Display for ReadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Init => "init",
            Self::Readable => "readable",
            Self::Timeout => "timeout",
        };
        write!(f, "{s}")
    }
}

/// Whether our checks are being answered. Variants are ordered best first.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum WriteState {
    /// We have received ping responses recently.
    #[serde(rename = "writable")]
    Writable = 0,
    /// We have had a few ping failures.
    #[serde(rename = "unreliable")]
    Unreliable = 1,
    /// We have yet to receive a ping response.
    #[default]
    #[serde(rename = "init")]
    Init = 2,
    /// We have had a large number of ping failures.
    #[serde(rename = "timeout")]
    Timeout = 3,
}

impl fmt::Display for WriteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Writable => "writable",
            Self::Unreliable => "unreliable",
            Self::Init => "init",
            Self::Timeout => "timeout",
        };
        write!(f, "{s}")
    }
}

/// Represent the ICE candidate pair state.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CandidatePairState {
    /// Means a check has not been performed for this pair.
    #[default]
    #[serde(rename = "waiting")]
    Waiting = 0,

    /// Means a check has been sent for this pair, but the transaction is in progress.
    #[serde(rename = "in-progress")]
    InProgress = 1,

    /// Means a check for this pair was already done and produced a successful result.
    #[serde(rename = "succeeded")]
    Succeeded = 2,

    /// Means a check for this pair was already done and failed, either never producing any response
    /// or producing an unrecoverable failure response.
    #[serde(rename = "failed")]
    Failed = 3,
}

impl fmt::Display for CandidatePairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Waiting => "waiting",
            Self::InProgress => "in-progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };

        write!(f, "{s}")
    }
}

/// Signals a [`Connection`] raises towards the channel that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Read or write state changed.
    StateChange,
    /// Both directions timed out, the connection is of no further use.
    Destroyed,
    /// The controlling peer nominated this pair.
    UseCandidate,
    /// Application data arrived over this pair.
    ReadPacket(BytesMut),
}

/// RFC 5245 - 5.7.2.  Computing Pair Priority and Ordering Pairs
/// Let G be the priority for the candidate provided by the controlling
/// agent.  Let D be the priority for the candidate provided by the
/// controlled agent.
/// pair priority = 2^32*MIN(G,D) + 2*MAX(G,D) + (G>D?1:0)
pub fn pair_priority(local_priority: u32, remote_priority: u32, controlling: bool) -> u64 {
    let (g, d) = if controlling {
        (local_priority, remote_priority)
    } else {
        (remote_priority, local_priority)
    };

    // 1<<32 overflows uint32; and if both g && d are
    // maxUint32, this result would overflow uint64
    ((1 << 32_u64) - 1) * u64::from(std::cmp::min(g, d))
        + 2 * u64::from(std::cmp::max(g, d))
        + u64::from(g > d)
}

/// A connectivity check pairing between one local port and one remote candidate.
///
/// Implementations own the wire protocol (STUN checks, TURN channels, ...). The
/// transport channel only observes states and drives the checks. Most implementors
/// embed a [`monitor::ConnectionMonitor`] for the state machine.
pub trait Connection {
    fn local_candidate(&self) -> &Candidate;
    fn remote_candidate(&self) -> &Candidate;

    fn read_state(&self) -> ReadState;
    fn write_state(&self) -> WriteState;
    /// ICE check state of the pair.
    fn state(&self) -> CandidatePairState;
    fn connected(&self) -> bool;
    fn rtt(&self) -> Duration;
    fn last_ping_sent(&self) -> Option<Instant>;

    fn nominated(&self) -> bool;
    fn set_nominated(&mut self, nominated: bool);

    /// Refreshes time-derived read/write state.
    fn update_state(&mut self, now: Instant);
    /// Sends a connectivity check.
    fn ping(&mut self, now: Instant);
    /// Records an incoming connectivity check from the remote side.
    fn received_ping(&mut self, now: Instant);
    /// Stops checking this pair; it stays usable for reads.
    fn prune(&mut self);
    /// Times out both directions, which eventually raises [`ConnectionEvent::Destroyed`].
    fn destroy(&mut self);

    /// Sends application data to the remote candidate.
    fn send(&mut self, now: Instant, data: &[u8]) -> Result<usize>;
    /// Handles a datagram received from the remote candidate's address.
    fn handle_read(&mut self, msg: TaggedBytesMut) -> Result<()>;
    fn poll_event(&mut self) -> Option<ConnectionEvent>;
    fn poll_write(&mut self) -> Option<TaggedBytesMut>;

    fn sent_total_bytes(&self) -> u64;
    fn recv_total_bytes(&self) -> u64;
}

impl fmt::Debug for dyn Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Conn[{}->{}|{}{}{}|{}|{}ms]",
            self.local_candidate().address(),
            self.remote_candidate().address(),
            if self.connected() { 'C' } else { '-' },
            match self.read_state() {
                ReadState::Init => 'i',
                ReadState::Readable => 'R',
                ReadState::Timeout => '-',
            },
            match self.write_state() {
                WriteState::Writable => 'W',
                WriteState::Unreliable => 'w',
                WriteState::Init => 'i',
                WriteState::Timeout => '-',
            },
            self.state(),
            self.rtt().as_millis(),
        )
    }
}
