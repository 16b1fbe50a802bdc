//! Virtual UDP session pool
//!
//! Gives every (local, target) UDP address pair a stable logical stream,
//! reused across calls and evicted when idle. Sessions are keyed by a 64-bit
//! hash of the concatenated address strings; lookups and timestamp bumps
//! take the read side of the table lock, insert/delete/sweep take the write
//! side, and stream closes from under the lock are handed to background
//! tasks so the lock is never held across blocking I/O.

use super::{Client, ClientError};
use crate::protocol::ControlFrame;
use crate::transport::Strm;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};
use tokio::time::{self, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// How often the idle sweeper runs.
pub(super) const SWEEP_INTERVAL: Duration = Duration::from_secs(30);
/// Sessions untouched for this long are evicted by the next sweep.
pub(super) const IDLE_THRESHOLD: Duration = Duration::from_secs(120);

struct UdpSess {
    strm: Arc<dyn Strm>,
    last_active: Mutex<Instant>,
}

pub(super) struct UdpPool {
    sessions: RwLock<HashMap<u64, UdpSess>>,
}

impl UdpPool {
    pub(super) fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Session key for an address pair. Pure: equal pair strings always
    /// yield the same key within a process; the 64-bit width makes a
    /// collision between genuinely different pairs vanishingly unlikely
    /// (~2^-64 per pair), though not impossible. Hashing the pair as a
    /// tuple keeps the two strings delimited, so shifting bytes across the
    /// boundary changes the key.
    pub(super) fn session_key(local_addr: &str, target_addr: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        (local_addr, target_addr).hash(&mut hasher);
        hasher.finish()
    }

    /// Look up a live session, bumping its last-active timestamp on a hit.
    fn touch(&self, key: u64) -> Option<Arc<dyn Strm>> {
        let sessions = self.sessions.read().unwrap();
        sessions.get(&key).map(|sess| {
            *sess.last_active.lock().unwrap() = Instant::now();
            Arc::clone(&sess.strm)
        })
    }

    fn insert(&self, key: u64, strm: Arc<dyn Strm>) {
        let mut sessions = self.sessions.write().unwrap();
        sessions.insert(
            key,
            UdpSess {
                strm,
                last_active: Mutex::new(Instant::now()),
            },
        );
    }

    /// Explicit removal; a missing key is a no-op.
    pub(super) fn close_session(&self, key: u64) {
        let mut sessions = self.sessions.write().unwrap();
        if let Some(sess) = sessions.remove(&key) {
            debug!("closing UDP session stream {}", sess.strm.id());
            close_in_background(sess.strm);
        } else {
            debug!("UDP session key {key} not found for close");
        }
    }

    /// Shutdown path: close every live session and reset the table.
    pub(super) fn close_all(&self) {
        let mut sessions = self.sessions.write().unwrap();
        if !sessions.is_empty() {
            info!("closing {} UDP sessions", sessions.len());
        }
        for (_, sess) in sessions.drain() {
            close_in_background(sess.strm);
        }
    }

    /// Evict every session idle for at least [`IDLE_THRESHOLD`].
    pub(super) fn sweep(&self) {
        let mut sessions = self.sessions.write().unwrap();
        let now = Instant::now();
        sessions.retain(|_, sess| {
            let last_active = *sess.last_active.lock().unwrap();
            if now.duration_since(last_active) >= IDLE_THRESHOLD {
                debug!("evicting idle UDP session stream {}", sess.strm.id());
                close_in_background(Arc::clone(&sess.strm));
                false
            } else {
                true
            }
        });
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }
}

/// Best-effort close without holding the table lock across the await.
fn close_in_background(strm: Arc<dyn Strm>) {
    tokio::spawn(async move { strm.close().await });
}

pub(super) async fn sweep_loop(pool: Arc<UdpPool>, shutdown: CancellationToken) {
    let mut ticker = time::interval(SWEEP_INTERVAL);
    ticker.tick().await; // skip the immediate first tick
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => pool.sweep(),
        }
    }
}

impl Client {
    /// The stable stream for a (local, target) UDP address pair, created on
    /// first use. Returns the stream, whether it was newly created, and the
    /// session key for a later [`Client::close_udp`].
    pub async fn udp(
        &self,
        local_addr: &str,
        target_addr: &str,
    ) -> Result<(Arc<dyn Strm>, bool, u64), ClientError> {
        let key = UdpPool::session_key(local_addr, target_addr);
        if let Some(strm) = self.udp_pool.touch(key) {
            debug!(
                "reusing UDP stream {} for {local_addr} -> {target_addr}",
                strm.id()
            );
            return Ok((strm, false, key));
        }
        debug!("creating new UDP stream for {local_addr} -> {target_addr}");

        let strm = self.new_stream().await?;

        let target = match resolve_udp(target_addr).await {
            Ok(target) => target,
            Err(err) => {
                debug!("invalid UDP address {target_addr}: {err}");
                strm.close().await;
                return Err(err);
            }
        };
        if let Err(err) = ControlFrame::UdpOpen(target).write_to(&*strm).await {
            debug!(
                "failed to write UDP open for {local_addr} -> {target_addr} on stream {}: {err}",
                strm.id()
            );
            strm.close().await;
            return Err(err.into());
        }

        self.udp_pool.insert(key, Arc::clone(&strm));
        debug!(
            "established UDP stream {} for {local_addr} -> {target_addr}",
            strm.id()
        );
        Ok((strm, true, key))
    }

    /// Close one UDP session by key; unknown keys are a no-op.
    pub fn close_udp(&self, key: u64) {
        self.udp_pool.close_session(key);
    }
}

async fn resolve_udp(addr: &str) -> Result<SocketAddr, ClientError> {
    match tokio::net::lookup_host(addr).await {
        Ok(mut addrs) => addrs.next().ok_or_else(|| ClientError::Resolve {
            addr: addr.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses"),
        }),
        Err(source) => Err(ClientError::Resolve {
            addr: addr.to_string(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct DummyStrm {
        id: u32,
        closed: AtomicBool,
    }

    #[async_trait]
    impl Strm for DummyStrm {
        fn id(&self) -> u32 {
            self.id
        }

        async fn read(&self, _buf: &mut [u8]) -> Result<usize, TransportError> {
            Err(TransportError::StreamClosed)
        }

        async fn write_all(&self, _buf: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn strm(id: u32) -> Arc<DummyStrm> {
        Arc::new(DummyStrm {
            id,
            closed: AtomicBool::new(false),
        })
    }

    #[test]
    fn test_session_key_is_pure() {
        let a = UdpPool::session_key("10.0.0.5:1234", "8.8.8.8:53");
        let b = UdpPool::session_key("10.0.0.5:1234", "8.8.8.8:53");
        assert_eq!(a, b);
    }

    #[test]
    fn test_session_key_distinguishes_pairs() {
        let base = UdpPool::session_key("10.0.0.5:1234", "8.8.8.8:53");
        assert_ne!(base, UdpPool::session_key("10.0.0.5:1235", "8.8.8.8:53"));
        assert_ne!(base, UdpPool::session_key("10.0.0.5:1234", "8.8.4.4:53"));
        // concatenation boundary moves but the pair differs
        assert_ne!(base, UdpPool::session_key("10.0.0.5:123", "48.8.8.8:53"));
    }

    #[tokio::test]
    async fn test_close_session_tolerates_missing_key() {
        let pool = UdpPool::new();
        pool.close_session(42);
    }

    #[tokio::test]
    async fn test_close_all_resets_table() {
        let pool = UdpPool::new();
        pool.insert(1, strm(1));
        pool.insert(2, strm(2));
        pool.close_all();
        assert_eq!(pool.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_only_idle_sessions() {
        let pool = UdpPool::new();
        let idle = strm(1);
        let busy = strm(2);
        pool.insert(1, Arc::clone(&idle) as Arc<dyn Strm>);
        pool.insert(2, Arc::clone(&busy) as Arc<dyn Strm>);

        time::advance(IDLE_THRESHOLD - Duration::from_secs(1)).await;
        pool.touch(2);
        time::advance(Duration::from_secs(1)).await;

        pool.sweep();
        assert!(pool.touch(1).is_none());
        assert!(pool.touch(2).is_some());

        tokio::task::yield_now().await;
        assert!(idle.closed.load(Ordering::SeqCst));
        assert!(!busy.closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_touched_session_survives_many_sweeps() {
        let pool = UdpPool::new();
        pool.insert(1, strm(1));
        for _ in 0..10 {
            time::advance(SWEEP_INTERVAL).await;
            pool.touch(1);
            pool.sweep();
            assert_eq!(pool.len(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_loop_eviction_boundary() {
        let pool = Arc::new(UdpPool::new());
        let shutdown = CancellationToken::new();
        tokio::spawn(sweep_loop(Arc::clone(&pool), shutdown.clone()));
        tokio::task::yield_now().await;

        pool.insert(1, strm(1));

        // sweeps at t=30/60/90 leave the session in place
        time::advance(Duration::from_secs(119)).await;
        assert_eq!(pool.len(), 1);

        // the t=120 sweep evicts it
        time::advance(Duration::from_secs(2)).await;
        assert_eq!(pool.len(), 0);

        shutdown.cancel();
    }
}
