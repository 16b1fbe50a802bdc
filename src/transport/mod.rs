//! Transport engine seam
//!
//! The reliable-transport engines (a KCP-like ARQ protocol with a stream
//! multiplexer, or a QUIC stack) live outside this crate. Both are consumed
//! through the same capability set: dial a multiplexed connection over a
//! packet conn, open independent logical streams on it, and probe liveness
//! out-of-band. Which engine backs [`Dialer`] is selected by
//! [`crate::config::Protocol`]; the client never type-switches on the engine.

use crate::pconn::PacketConn;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

/// Transport layer errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("dial failed: {0}")]
    Dial(String),

    #[error("failed to open stream: {0}")]
    OpenStream(String),

    #[error("ping failed: {0}")]
    Ping(String),

    #[error("stream closed")]
    StreamClosed,

    #[error("connection closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One logical byte-stream multiplexed over a connection.
#[async_trait]
pub trait Strm: Send + Sync {
    /// Stream identifier within its connection
    fn id(&self) -> u32;

    async fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError>;

    async fn write_all(&self, buf: &[u8]) -> Result<(), TransportError>;

    async fn close(&self);
}

/// A multiplexed reliable connection to the tunnel server.
#[async_trait]
pub trait Conn: Send + Sync {
    async fn open_stream(&self) -> Result<Arc<dyn Strm>, TransportError>;

    /// Out-of-band liveness probe, distinct from ordinary data streams.
    /// With `quick` set the probe returns once the frame is queued instead
    /// of waiting for the peer's reply.
    async fn ping(&self, quick: bool) -> Result<(), TransportError>;

    async fn close(&self);
}

/// Dials an engine-backed connection over a raw packet conn, consuming it.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(
        &self,
        server: SocketAddr,
        pconn: PacketConn,
    ) -> Result<Box<dyn Conn>, TransportError>;
}
