//! Configuration for a [`P2pTransportChannel`](super::P2pTransportChannel).
//!
//! ```rust
//! use rtc_p2p::channel::channel_config::ChannelConfig;
//! use std::time::Duration;
//!
//! let config = ChannelConfig::default()
//!     .with_transport_id("audio")
//!     .with_unwritable_delay(Duration::from_millis(100));
//! ```

use std::time::Duration;

use crate::candidate::COMPONENT_RTP;
use crate::port::{IceProtocolType, SocketOption, SocketOptions};
use crate::rand::{generate_pwd, generate_ufrag};

/// Ping interval once the channel is writable (60 byte pings at 1 kbps).
pub(crate) const DEFAULT_WRITABLE_DELAY: Duration = Duration::from_millis(480);

/// Ping interval while the channel is not writable (60 byte pings at 10 kbps).
pub(crate) const DEFAULT_UNWRITABLE_DELAY: Duration = Duration::from_millis(50);

/// The best connection is pinged at least this often while writable.
pub(crate) const DEFAULT_MAX_CURRENT_WRITABLE_DELAY: Duration = Duration::from_millis(900);

/// The minimum improvement in RTT that justifies a switch.
pub(crate) const DEFAULT_MIN_RTT_IMPROVEMENT: Duration = Duration::from_millis(10);

/// Configuration for an ICE transport channel.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// Identifies the transport in allocator sessions.
    pub transport_id: String,

    /// ICE component this channel carries.
    ///
    /// Default: 1 (RTP)
    pub component: u16,

    /// Local ICE credentials; required before `connect`.
    pub ice_ufrag: String,
    pub ice_pwd: String,

    /// When set, candidates signaled by the remote side are never probed; only
    /// pairs learned from incoming checks are created.
    ///
    /// Default: false
    pub incoming_only: bool,

    /// ICE dialect handed to every port.
    ///
    /// Default: [`IceProtocolType::Rfc5245`]
    pub ice_protocol: IceProtocolType,

    /// Socket options applied to every port as it becomes ready.
    pub socket_options: SocketOptions,

    /// Default: 480 ms
    pub writable_delay: Duration,
    /// Default: 50 ms
    pub unwritable_delay: Duration,
    /// Default: 900 ms
    pub max_current_writable_delay: Duration,
    /// Equal ranked pairs only replace the best one if their RTT is no worse than
    /// this much above it.
    ///
    /// Default: 10 ms
    pub min_rtt_improvement: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            transport_id: String::new(),
            component: COMPONENT_RTP,
            ice_ufrag: String::new(),
            ice_pwd: String::new(),
            incoming_only: false,
            ice_protocol: IceProtocolType::default(),
            socket_options: SocketOptions::default(),
            writable_delay: DEFAULT_WRITABLE_DELAY,
            unwritable_delay: DEFAULT_UNWRITABLE_DELAY,
            max_current_writable_delay: DEFAULT_MAX_CURRENT_WRITABLE_DELAY,
            min_rtt_improvement: DEFAULT_MIN_RTT_IMPROVEMENT,
        }
    }
}

impl ChannelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transport_id(mut self, transport_id: impl Into<String>) -> Self {
        self.transport_id = transport_id.into();
        self
    }

    pub fn with_component(mut self, component: u16) -> Self {
        self.component = component;
        self
    }

    pub fn with_ice_credentials(
        mut self,
        ice_ufrag: impl Into<String>,
        ice_pwd: impl Into<String>,
    ) -> Self {
        self.ice_ufrag = ice_ufrag.into();
        self.ice_pwd = ice_pwd.into();
        self
    }

    /// Uses a freshly generated ufrag and pwd as the local ICE credentials.
    pub fn with_random_ice_credentials(self) -> Self {
        self.with_ice_credentials(generate_ufrag(), generate_pwd())
    }

    pub fn with_incoming_only(mut self, incoming_only: bool) -> Self {
        self.incoming_only = incoming_only;
        self
    }

    pub fn with_ice_protocol(mut self, ice_protocol: IceProtocolType) -> Self {
        self.ice_protocol = ice_protocol;
        self
    }

    pub fn with_socket_option(mut self, option: SocketOption, value: i32) -> Self {
        self.socket_options.set(option, value);
        self
    }

    pub fn with_writable_delay(mut self, delay: Duration) -> Self {
        self.writable_delay = delay;
        self
    }

    pub fn with_unwritable_delay(mut self, delay: Duration) -> Self {
        self.unwritable_delay = delay;
        self
    }

    pub fn with_max_current_writable_delay(mut self, delay: Duration) -> Self {
        self.max_current_writable_delay = delay;
        self
    }

    pub fn with_min_rtt_improvement(mut self, improvement: Duration) -> Self {
        self.min_rtt_improvement = improvement;
        self
    }
}
