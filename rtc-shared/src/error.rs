#![allow(dead_code)]

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum Error {
    // Channel configuration errors
    #[error("ice ufrag and ice pwd must be set before connect")]
    ErrIceCredentialsMissing,
    #[error("transport channel is closed")]
    ErrClosed,

    // Candidate errors
    #[error("unknown candidate type")]
    ErrUnknownCandidateType,
    #[error("candidate component must not be zero")]
    ErrComponentZero,

    // Connection creation errors
    #[error("remote candidate does not match the existing connection for its address")]
    ErrRemoteCandidateChanged,
    #[error("outgoing connections are not allowed for signaled candidates")]
    ErrIncomingOnly,
    #[error("port does not support the candidate protocol")]
    ErrIncompatibleProtocol,
    #[error("port refused to create a connection")]
    ErrConnectionRefused,
    #[error("no such port")]
    ErrPortNotFound,
    #[error("no such connection")]
    ErrConnectionNotFound,

    // Data path errors
    #[error("no best connection, send would block")]
    ErrNoBestConnection,
    #[error("connection is not writable")]
    ErrConnectionNotWritable,
    #[error("packet does not belong to any port or connection")]
    ErrUnhandledPacket,
    #[error("set option {0} failed")]
    ErrSetOptionFailed(String),

    #[error("{0}")]
    Other(String),
}
