#![warn(rust_2018_idioms)]
#![allow(dead_code)]

pub mod allocator;
pub mod candidate;
pub mod channel;
pub mod connection;
pub mod port;
pub mod rand;
pub mod stats;

pub use channel::channel_config::ChannelConfig;
pub use channel::{ChannelEvent, ConnectionHandle, P2pTransportChannel, TransportInput};
