//! Raw packet conn
//!
//! Adapts a link-layer send/receive handle pair into an address-oriented
//! packet socket with independent read/write deadlines and cooperative
//! cancellation, suitable for layering a reliable multiplexed transport on
//! top. The underlying handles have no native deadline support, so deadlines
//! are a timer race against cancellation and completion rather than a
//! syscall-level timeout.

mod fingerprint;
mod handle;

pub use fingerprint::{hash_addr, FingerprintTable, TcpFingerprint};
pub use handle::{LinkOpener, RecvHandle, SendHandle};

use crate::config::NetworkConfig;
use rand::Rng;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Packet conn errors
#[derive(Debug, Error)]
pub enum PconnError {
    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("packet conn closed")]
    Cancelled,

    #[error("invalid destination address: {0}")]
    InvalidAddress(SocketAddr),

    #[error("link layer error: {0}")]
    Link(String),
}

/// A deadline-aware, cancelable packet socket over raw link-layer handles.
pub struct PacketConn {
    local_addr: SocketAddr,
    send_handle: Arc<dyn SendHandle>,
    recv_handle: Arc<dyn RecvHandle>,
    fingerprints: FingerprintTable,
    read_deadline: Mutex<Option<Instant>>,
    write_deadline: Mutex<Option<Instant>>,
    shutdown: CancellationToken,
}

impl PacketConn {
    /// Open a handle pair on the configured interface. A configured local
    /// port of 0 picks a random ephemeral port.
    pub fn new(
        parent: &CancellationToken,
        cfg: &NetworkConfig,
        link: &dyn LinkOpener,
    ) -> Result<Self, PconnError> {
        let mut local_addr = cfg.local_addr;
        if local_addr.port() == 0 {
            local_addr.set_port(rand::thread_rng().gen_range(32768..=65535));
            warn!(port = local_addr.port(), "packet conn ephemeral port");
        }

        let (send_handle, recv_handle) = link.open(cfg)?;

        Ok(Self {
            local_addr,
            send_handle,
            recv_handle,
            fingerprints: FingerprintTable::new(),
            read_deadline: Mutex::new(None),
            write_deadline: Mutex::new(None),
            shutdown: parent.child_token(),
        })
    }

    /// Receive one packet, truncating to the caller's buffer if shorter.
    /// Returns the number of bytes copied and the packet's source address.
    pub async fn read_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), PconnError> {
        let deadline = *self.read_deadline.lock().unwrap();
        let (payload, src) = self.race(deadline, self.recv_handle.recv()).await?;
        let n = payload.len().min(buf.len());
        buf[..n].copy_from_slice(&payload[..n]);
        Ok((n, src))
    }

    /// Shape and inject one packet toward `dst`. The destination must share
    /// the local address family.
    pub async fn write_to(&self, buf: &[u8], dst: SocketAddr) -> Result<usize, PconnError> {
        if dst.is_ipv4() != self.local_addr.is_ipv4() {
            return Err(PconnError::InvalidAddress(dst));
        }
        let deadline = *self.write_deadline.lock().unwrap();
        let fingerprint = self.fingerprints.next_profile(&dst);
        self.race(deadline, self.send_handle.write(buf, dst, fingerprint))
            .await?;
        Ok(buf.len())
    }

    /// Race an operation against cancellation and an optional deadline.
    /// Biased so a cancelled conn or an already-elapsed deadline returns
    /// without polling the operation.
    async fn race<T, F>(&self, deadline: Option<Instant>, op: F) -> Result<T, PconnError>
    where
        F: Future<Output = Result<T, PconnError>>,
    {
        match deadline {
            Some(at) => {
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => Err(PconnError::Cancelled),
                    _ = time::sleep_until(at) => Err(PconnError::DeadlineExceeded),
                    res = op => res,
                }
            }
            None => {
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => Err(PconnError::Cancelled),
                    res = op => res,
                }
            }
        }
    }

    /// Cancel the conn's lifetime scope and tear down both handles in the
    /// background. Idempotent.
    pub fn close(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();

        let send_handle = Arc::clone(&self.send_handle);
        tokio::spawn(async move { send_handle.close().await });
        let recv_handle = Arc::clone(&self.recv_handle);
        tokio::spawn(async move { recv_handle.close().await });
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Install the ordered fingerprint profile list for the bucket `addr`
    /// hashes into; last write wins on bucket collisions.
    pub fn set_fingerprint_profiles(&self, addr: &SocketAddr, profiles: Vec<TcpFingerprint>) {
        self.fingerprints.set_profiles(addr, profiles);
    }

    /// Set both deadlines. `None` disables the timer race.
    pub fn set_deadline(&self, at: Option<Instant>) {
        self.set_read_deadline(at);
        self.set_write_deadline(at);
    }

    pub fn set_read_deadline(&self, at: Option<Instant>) {
        *self.read_deadline.lock().unwrap() = at;
    }

    pub fn set_write_deadline(&self, at: Option<Instant>) {
        *self.write_deadline.lock().unwrap() = at;
    }
}
