//! # veilmux
//!
//! Client core of a covert tunneling transport. Multiplexes reliable
//! byte-streams over a raw link-layer packet channel, disguises outgoing
//! traffic with per-peer TCP fingerprint profiles, and exposes virtual UDP
//! sessions to an application-facing proxy layer.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │               Proxy Front-End (SOCKS5)              │
//! ├─────────────────────────────────────────────────────┤
//! │                       Client                        │
//! │  (connection pool, stream creation, UDP sessions)   │
//! ├─────────────────────────────────────────────────────┤
//! │           Multiplexed Connection (ARQ/QUIC)         │
//! ├─────────────────────────────────────────────────────┤
//! │                     Packet Conn                     │
//! │    (deadlines, cancellation, fingerprint table)     │
//! ├─────────────────────────────────────────────────────┤
//! │           Link-Layer Send/Receive Handles           │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! The reliable-transport engines themselves (a KCP-like ARQ protocol plus a
//! stream multiplexer, or a QUIC stack) are external collaborators consumed
//! through the capability traits in [`transport`]; this crate dials them over
//! a [`pconn::PacketConn`] and manages everything around them.

pub mod client;
pub mod config;
pub mod pconn;
pub mod protocol;
pub mod rotor;
pub mod transport;

pub use client::Client;
pub use config::Config;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum control frame size (64 KB)
pub const MAX_FRAME_SIZE: usize = 65535;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Packet conn error: {0}")]
    Pconn(#[from] pconn::PconnError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    #[error("Client error: {0}")]
    Client(#[from] client::ClientError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}
