use std::net::IpAddr;

use thiserror::Error;

/// Errors surfaced by the pad subsystem's public operations.
#[derive(Debug, Error)]
pub enum PadError {
    /// The slot index is not part of the configured fleet.
    #[error("slot {slot} out of range (fleet size {fleet_size})")]
    SlotOutOfRange { slot: usize, fleet_size: usize },

    /// Fleet size or timing settings cannot be run.
    #[error("invalid settings: {0}")]
    Config(#[from] crate::validation::ConfigError),

    /// Socket setup failed (e.g. the discovery port is already bound).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a discovery datagram was dropped. No state is modified for any of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryReject {
    #[error("short datagram ({len} bytes)")]
    TooShort { len: usize },

    #[error("invalid auth token")]
    BadToken,

    #[error("invalid pad index {slot} (fleet size {fleet_size})")]
    SlotOutOfRange { slot: usize, fleet_size: usize },
}

/// Why a command byte was not handed to the transport.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("slot {slot} out of range (fleet size {fleet_size})")]
    SlotOutOfRange { slot: usize, fleet_size: usize },

    #[error("no known peer for slot {0}")]
    NoKnownPeer(usize),

    #[error("not connected to {0}")]
    NotConnected(IpAddr),

    #[error("write to {peer} failed: {source}")]
    Transport {
        peer: IpAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("write to {0} timed out")]
    Timeout(IpAddr),
}
