//! Link-layer capability traits
//!
//! The packet conn only depends on this capability set, not on how packets
//! actually reach the wire (pcap injection, AF_PACKET, a test harness, ...).

use super::{PconnError, TcpFingerprint};
use crate::config::NetworkConfig;
use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;

/// Injection side of a link-layer handle pair.
#[async_trait]
pub trait SendHandle: Send + Sync {
    /// Shape one packet toward `dst` and inject it. The `fingerprint`
    /// profile, when present, dictates the TCP header disguise.
    async fn write(
        &self,
        payload: &[u8],
        dst: SocketAddr,
        fingerprint: Option<TcpFingerprint>,
    ) -> Result<(), PconnError>;

    async fn close(&self);
}

/// Capture side of a link-layer handle pair.
#[async_trait]
pub trait RecvHandle: Send + Sync {
    /// Block until the next packet addressed to the local endpoint arrives,
    /// returning its payload and source address.
    async fn recv(&self) -> Result<(Bytes, SocketAddr), PconnError>;

    async fn close(&self);
}

/// Opens a fresh send/receive handle pair for one packet conn. Each dialed
/// connection gets its own pair; reconnection opens a new one.
pub trait LinkOpener: Send + Sync {
    fn open(
        &self,
        cfg: &NetworkConfig,
    ) -> Result<(Arc<dyn SendHandle>, Arc<dyn RecvHandle>), PconnError>;
}
